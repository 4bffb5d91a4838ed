//! [`RemoteStateChannel`] over the relay socket.
//!
//! `subscribe` holds one connection open for the snapshot stream. Every other
//! call opens a short-lived connection for a single request/response pair.
//! A successful [`SocketChannel::login`] stores the relay's token; publishes
//! carry it, and an `unauthorized` answer drops it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use podium_core::{DeckName, Identity, SharedPresentationState, StatePatch};
use podium_sync::{ChannelError, RemoteStateChannel, SnapshotReceiver};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{is_not_running, DaemonRequest, DaemonResponse};

#[derive(Debug, Clone)]
pub struct SocketChannel {
    socket: PathBuf,
    token: Arc<Mutex<Option<String>>>,
}

impl SocketChannel {
    pub fn at(home: &Path) -> Self {
        Self {
            socket: socket_path(home),
            token: Arc::default(),
        }
    }

    /// Whether a login token is currently held.
    pub fn is_logged_in(&self) -> bool {
        self.token().is_some()
    }

    /// Log in as a presenter. The returned identity is what the session's
    /// authority gate should be told about.
    pub async fn login(&self, user: &str, password: &str) -> Result<Identity, DaemonError> {
        let data = exchange(&self.socket, &DaemonRequest::login(user, password))
            .await?
            .into_data()?;
        let token = data
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| DaemonError::Protocol("login response without token".to_string()))?;
        *self.lock_token() = Some(token.to_string());
        tracing::info!(user, "logged in");
        Ok(Identity {
            user: user.to_string(),
        })
    }

    /// Give the token back to the relay. The local token is dropped even if
    /// the relay cannot be reached.
    pub async fn logout(&self) -> Result<(), DaemonError> {
        let Some(token) = self.lock_token().take() else {
            return Ok(());
        };
        exchange(&self.socket, &DaemonRequest::logout(token))
            .await?
            .into_data()
            .map(|_| ())
    }

    /// Deck names the relay's store currently holds.
    pub async fn decks(&self) -> Result<Vec<DeckName>, DaemonError> {
        let data = exchange(&self.socket, &DaemonRequest::new("decks"))
            .await?
            .into_data()?;
        Ok(serde_json::from_value(data)?)
    }

    fn token(&self) -> Option<String> {
        self.lock_token().clone()
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RemoteStateChannel for SocketChannel {
    fn subscribe(&self) -> impl Future<Output = Result<SnapshotReceiver, ChannelError>> + Send {
        let socket = self.socket.clone();
        async move {
            let stream = connect(&socket).await.map_err(channel_error)?;
            let (reader, mut writer) = stream.into_split();
            write_request(&mut writer, &socket, &DaemonRequest::new("subscribe"))
                .await
                .map_err(channel_error)?;

            let mut lines = BufReader::new(reader).lines();
            let first = lines
                .next_line()
                .await
                .map_err(|e| channel_error(io_err(&socket, e)))?
                .ok_or(ChannelError::Closed)?;
            let initial = decode_snapshot(&first).map_err(channel_error)?;

            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(initial);
            tokio::spawn(async move {
                // Dropping the write half would end the subscription.
                let _writer = writer;
                loop {
                    let line = match lines.next_line().await {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "snapshot stream read failed");
                            break;
                        }
                    };
                    match decode_snapshot(&line) {
                        Ok(state) => {
                            if tx.send(state).is_err() {
                                break;
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "ignoring malformed snapshot"),
                    }
                }
                tracing::debug!("snapshot stream closed");
            });
            Ok(rx)
        }
    }

    fn publish(&self, patch: StatePatch) -> impl Future<Output = Result<(), ChannelError>> + Send {
        let socket = self.socket.clone();
        let token = self.token();
        let held = Arc::clone(&self.token);
        async move {
            let Some(token) = token else {
                return Err(ChannelError::Unauthorized);
            };
            let response = exchange(&socket, &DaemonRequest::publish(token.clone(), patch))
                .await
                .map_err(channel_error)?;
            if response.is_unauthorized() {
                let mut held = held.lock().unwrap_or_else(|e| e.into_inner());
                if held.as_deref() == Some(token.as_str()) {
                    *held = None;
                }
                return Err(ChannelError::Unauthorized);
            }
            response.into_data().map(|_| ()).map_err(channel_error)
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

async fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    UnixStream::connect(socket).await.map_err(|err| {
        if is_not_running(&err) {
            DaemonError::DaemonNotRunning {
                socket: socket.to_path_buf(),
            }
        } else {
            io_err(socket, err)
        }
    })
}

async fn write_request(
    writer: &mut OwnedWriteHalf,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err(socket, e))?;
    writer.flush().await.map_err(|e| io_err(socket, e))
}

/// One request, one response, on a fresh connection.
async fn exchange(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let stream = connect(socket).await?;
    let (reader, mut writer) = stream.into_split();
    write_request(&mut writer, socket, request).await?;
    let line = BufReader::new(reader)
        .lines()
        .next_line()
        .await
        .map_err(|e| io_err(socket, e))?
        .ok_or_else(|| {
            DaemonError::Protocol("relay closed connection before responding".to_string())
        })?;
    Ok(serde_json::from_str(&line)?)
}

fn decode_snapshot(line: &str) -> Result<SharedPresentationState, DaemonError> {
    let response: DaemonResponse = serde_json::from_str(line)?;
    Ok(serde_json::from_value(response.into_data()?)?)
}

fn channel_error(err: DaemonError) -> ChannelError {
    match err {
        DaemonError::Unauthorized => ChannelError::Unauthorized,
        DaemonError::DaemonNotRunning { .. } | DaemonError::Io { .. } => {
            ChannelError::Transport(err.to_string())
        }
        DaemonError::ChannelClosed(_) => ChannelError::Closed,
        other => ChannelError::Rejected(other.to_string()),
    }
}
