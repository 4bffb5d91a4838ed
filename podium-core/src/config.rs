//! `~/.podium/config.yaml`: presenter accounts and viewer settings.
//!
//! ```yaml
//! version: 1
//! presenters:
//!   - user: alice
//!     password_sha256: 5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8
//! viewer:
//!   fit_to_frame: true
//! relay:
//!   session_ttl_secs: 43200
//! ```
//!
//! A missing file loads as [`PodiumConfig::default`]. Saves are atomic
//! (`.yaml.tmp` + rename) and the file is kept at mode `0600`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{config_io_err, ConfigError};

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 12 * 60 * 60;

/// `<home>/.podium/`
pub fn podium_root(home: &Path) -> PathBuf {
    home.join(".podium")
}

/// `<home>/.podium/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    podium_root(home).join("config.yaml")
}

/// A presenter allowed to write the shared record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenterAccount {
    pub user: String,
    pub password_sha256: String,
}

impl PresenterAccount {
    pub fn new(user: impl Into<String>, password: &str) -> Self {
        Self {
            user: user.into(),
            password_sha256: digest_password(password),
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        self.password_sha256.eq_ignore_ascii_case(&digest_password(password))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerSettings {
    /// Re-fit the page into the frame on ready and on every resize.
    #[serde(default = "default_true")]
    pub fit_to_frame: bool,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self { fit_to_frame: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Presenter login tokens stop authorizing writes after this long.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodiumConfig {
    pub version: u32,
    #[serde(default)]
    pub presenters: Vec<PresenterAccount>,
    #[serde(default)]
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub relay: RelaySettings,
}

impl Default for PodiumConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            presenters: vec![],
            viewer: ViewerSettings::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl PodiumConfig {
    /// Look up `user` and check `password` against its stored digest.
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        self.presenters
            .iter()
            .any(|account| account.user == user && account.verify(password))
    }

    /// Add or replace the account for `account.user`.
    pub fn upsert_presenter(&mut self, account: PresenterAccount) {
        match self.presenters.iter_mut().find(|a| a.user == account.user) {
            Some(existing) => *existing = account,
            None => self.presenters.push(account),
        }
    }
}

/// Load `config.yaml`, falling back to defaults when it does not exist.
pub fn load_at(home: &Path) -> Result<PodiumConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(PodiumConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| config_io_err(&path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<PodiumConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save `config.yaml`.
pub fn save_at(home: &Path, config: &PodiumConfig) -> Result<(), ConfigError> {
    let root = podium_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root).map_err(|e| config_io_err(&root, e))?;
        set_permissions(&root, 0o700)?;
    }
    let path = config_path_at(home);
    let tmp = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| config_io_err(&tmp, e))?;
    set_permissions(&tmp, 0o600)?;
    std::fs::rename(&tmp, &path).map_err(|e| config_io_err(&path, e))?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &PodiumConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

fn digest_password(password: &str) -> String {
    let mut h = Sha256::new();
    h.update(password.as_bytes());
    hex::encode(h.finalize())
}

fn default_true() -> bool {
    true
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| config_io_err(path, e))
}
#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), ConfigError> {
    Ok(())
}
