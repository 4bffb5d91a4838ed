//! Write permission for the local session.
//!
//! The gate only tracks whether an identity is present. Observers (toolbar
//! state, prompts) follow [`AuthorityGate::subscribe`].

use tokio::sync::watch;

use podium_core::Identity;

/// Result of an identity transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityChange {
    Granted(Identity),
    Revoked,
    Unchanged,
}

#[derive(Debug)]
pub struct AuthorityGate {
    identity: Option<Identity>,
    can_write: watch::Sender<bool>,
}

impl AuthorityGate {
    pub fn new() -> Self {
        let (can_write, _) = watch::channel(false);
        Self {
            identity: None,
            can_write,
        }
    }

    pub fn can_write(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Called by the authentication side on sign-in, sign-out or expiry.
    pub fn on_identity_changed(&mut self, identity: Option<Identity>) -> AuthorityChange {
        if self.identity == identity {
            return AuthorityChange::Unchanged;
        }
        self.identity = identity.clone();
        self.can_write.send_replace(self.identity.is_some());
        match identity {
            Some(identity) => AuthorityChange::Granted(identity),
            None => AuthorityChange::Revoked,
        }
    }

    /// Watch write permission.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.can_write.subscribe()
    }
}

impl Default for AuthorityGate {
    fn default() -> Self {
        Self::new()
    }
}
