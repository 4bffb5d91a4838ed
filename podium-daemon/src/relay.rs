//! The shared record, owned by the relay.
//!
//! Patches are applied one at a time under the record lock and persisted to
//! `state.json` before subscribers see them. Presenter logins are checked
//! against `config.yaml` and tracked as bearer tokens with a fixed lifetime.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

use podium_core::{config, Identity, SharedPresentationState, StatePatch};

use crate::error::{io_err, DaemonError};
use crate::paths::{podium_root, state_path};

const SNAPSHOT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct PresenterSession {
    identity: Identity,
    expires_at: Instant,
}

pub struct Relay {
    home: PathBuf,
    state: Mutex<SharedPresentationState>,
    sessions: StdMutex<HashMap<String, PresenterSession>>,
    snapshots: broadcast::Sender<SharedPresentationState>,
}

impl Relay {
    /// Open the relay for `home`, restoring the last persisted record.
    pub fn open(home: &Path) -> Result<Self, DaemonError> {
        let state = load_state_at(home)?;
        let (snapshots, _) = broadcast::channel(SNAPSHOT_BUFFER);
        Ok(Self {
            home: home.to_path_buf(),
            state: Mutex::new(state),
            sessions: StdMutex::new(HashMap::new()),
            snapshots,
        })
    }

    pub async fn snapshot(&self) -> SharedPresentationState {
        self.state.lock().await.clone()
    }

    /// The current record plus a receiver for every later one. Nothing
    /// published between the two can be missed.
    pub async fn subscribe(
        &self,
    ) -> (SharedPresentationState, broadcast::Receiver<SharedPresentationState>) {
        let state = self.state.lock().await;
        (state.clone(), self.snapshots.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshots.receiver_count()
    }

    /// Merge `patch` into the record on behalf of the holder of `token`.
    pub async fn publish(
        &self,
        token: Option<&str>,
        patch: &StatePatch,
    ) -> Result<SharedPresentationState, DaemonError> {
        let identity = self.authorize(token)?;
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.apply(patch);
        if next == *state {
            tracing::debug!(user = %identity, "patch left the record unchanged");
            return Ok(next);
        }

        let home = self.home.clone();
        let to_save = next.clone();
        tokio::task::spawn_blocking(move || save_state_at(&home, &to_save))
            .await
            .map_err(|err| DaemonError::Protocol(format!("state save join error: {err}")))??;

        *state = next.clone();
        let _ = self.snapshots.send(next.clone());
        tracing::info!(
            user = %identity,
            deck = ?next.current_deck.as_ref().map(|d| d.as_str()),
            page = ?next.active_page().map(|p| p.get()),
            "applied patch",
        );
        Ok(next)
    }

    /// Check a presenter's password and issue a token for it.
    pub async fn login(&self, user: &str, password: &str) -> Result<(String, Identity), DaemonError> {
        let home = self.home.clone();
        let config = tokio::task::spawn_blocking(move || config::load_at(&home))
            .await
            .map_err(|err| DaemonError::Protocol(format!("config load join error: {err}")))??;
        if !config.authenticate(user, password) {
            tracing::warn!(user, "rejected presenter login");
            return Err(DaemonError::Unauthorized);
        }

        let identity = Identity {
            user: user.to_string(),
        };
        let token = uuid::Uuid::new_v4().to_string();
        let ttl = Duration::from_secs(config.relay.session_ttl_secs);
        self.sessions().insert(
            token.clone(),
            PresenterSession {
                identity: identity.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        tracing::info!(user, ttl_secs = ttl.as_secs(), "presenter logged in");
        Ok((token, identity))
    }

    /// Forget `token`. Returns whether it was known.
    pub fn logout(&self, token: &str) -> bool {
        let removed = self.sessions().remove(token);
        if let Some(session) = &removed {
            tracing::info!(user = %session.identity, "presenter logged out");
        }
        removed.is_some()
    }

    /// Presenters holding unexpired tokens.
    pub fn presenters(&self) -> Vec<Identity> {
        let now = Instant::now();
        let mut sessions = self.sessions();
        sessions.retain(|_, session| session.expires_at > now);
        let mut presenters: Vec<_> = sessions.values().map(|s| s.identity.clone()).collect();
        presenters.sort_by(|a, b| a.user.cmp(&b.user));
        presenters.dedup();
        presenters
    }

    fn authorize(&self, token: Option<&str>) -> Result<Identity, DaemonError> {
        let token = token.ok_or(DaemonError::Unauthorized)?;
        let mut sessions = self.sessions();
        match sessions.get(token) {
            Some(session) if session.expires_at > Instant::now() => Ok(session.identity.clone()),
            Some(_) => {
                if let Some(expired) = sessions.remove(token) {
                    tracing::info!(user = %expired.identity, "presenter session expired");
                }
                Err(DaemonError::Unauthorized)
            }
            None => Err(DaemonError::Unauthorized),
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, PresenterSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// state.json
// ---------------------------------------------------------------------------

/// Read the persisted record; an absent file is an empty record.
pub fn load_state_at(home: &Path) -> Result<SharedPresentationState, DaemonError> {
    let path = state_path(home);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SharedPresentationState::default());
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| DaemonError::CorruptState { path, source })
}

/// Atomically write the record (`state.json.tmp` + rename, mode 0600).
pub fn save_state_at(home: &Path, state: &SharedPresentationState) -> Result<(), DaemonError> {
    let root = podium_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    let path = state_path(home);
    let tmp = path.with_file_name("state.json.tmp");
    let json = serde_json::to_string_pretty(state)?;
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
