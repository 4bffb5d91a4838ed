use std::path::{Path, PathBuf};
use std::time::Duration;

pub use podium_core::config::podium_root;

pub const DAEMON_SOCKET: &str = "podium.sock";
pub const DAEMON_PID_FILE: &str = "podium.pid";
pub const STATE_FILE: &str = "state.json";

/// How long blocking clients wait for a relay that is still binding its socket.
pub const CONNECT_RETRY: Duration = Duration::from_millis(100);
pub const CONNECT_ATTEMPTS: usize = 5;

pub fn run_dir(home: &Path) -> PathBuf {
    podium_root(home).join("run")
}

pub fn pid_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_PID_FILE)
}

pub fn socket_path(home: &Path) -> PathBuf {
    podium_root(home).join(DAEMON_SOCKET)
}

pub fn state_path(home: &Path) -> PathBuf {
    podium_root(home).join(STATE_FILE)
}
