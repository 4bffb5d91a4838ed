use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use podium_core::decks::list_names_at;
use podium_core::SharedPresentationState;

use crate::error::{io_err, DaemonError};
use crate::paths::{pid_path, podium_root, run_dir, socket_path, state_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::relay::Relay;

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub running: bool,
    pub pid: u32,
    pub started_at_unix: u64,
    pub subscribers: usize,
    pub presenters: Vec<String>,
    pub state: SharedPresentationState,
    pub socket: String,
    pub state_file: String,
}

/// Start the relay runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the relay until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let relay = Arc::new(Relay::open(&home)?);
    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    write_pid_file(&home)?;
    tracing::info!(home = %home.display(), "relay starting");

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let relay = relay.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                relay,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down relay");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    remove_pid_file(&home);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("relay stopped");
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    relay: Arc<Relay>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let relay = relay.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        relay,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    relay: Arc<Relay>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("relay socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<DaemonRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let status = build_status(&home, &relay, started_at_unix).await;
                DaemonResponse::ok(json!(status))
            }
            "get" => DaemonResponse::ok(json!(relay.snapshot().await)),
            "subscribe" => {
                // The connection now belongs to the subscription.
                return stream_snapshots(relay, lines, writer, shutdown_tx.subscribe()).await;
            }
            "publish" => match request.patch {
                Some(patch) => match relay.publish(request.token.as_deref(), &patch).await {
                    Ok(state) => DaemonResponse::ok(json!(state)),
                    Err(DaemonError::Unauthorized) => DaemonResponse::unauthorized(),
                    Err(err) => {
                        tracing::error!(error = %err, "publish failed");
                        DaemonResponse::error(err.to_string())
                    }
                },
                None => DaemonResponse::error("publish requires a patch"),
            },
            "login" => match (request.user.as_deref(), request.password.as_deref()) {
                (Some(user), Some(password)) => match relay.login(user, password).await {
                    Ok((token, identity)) => {
                        DaemonResponse::ok(json!({ "token": token, "user": identity.user }))
                    }
                    Err(DaemonError::Unauthorized) => DaemonResponse::unauthorized(),
                    Err(err) => DaemonResponse::error(err.to_string()),
                },
                _ => DaemonResponse::error("login requires user and password"),
            },
            "logout" => match request.token.as_deref() {
                Some(token) => DaemonResponse::ok(json!({ "revoked": relay.logout(token) })),
                None => DaemonResponse::error("logout requires a token"),
            },
            "decks" => {
                let home = home.clone();
                match tokio::task::spawn_blocking(move || list_names_at(&home)).await {
                    Ok(Ok(names)) => DaemonResponse::ok(json!(names)),
                    Ok(Err(err)) => DaemonResponse::error(err.to_string()),
                    Err(err) => DaemonResponse::error(format!("deck listing join error: {err}")),
                }
            }
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Write the current record, then every later one, until the client hangs
/// up or the relay stops.
async fn stream_snapshots(
    relay: Arc<Relay>,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (initial, mut snapshots) = relay.subscribe().await;
    write_response(&mut writer, &DaemonResponse::ok(json!(initial))).await?;
    tracing::debug!(subscribers = relay.subscriber_count(), "subscriber attached");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => {
                // Subscribers send nothing; EOF or an error means they left.
                match line {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
            snapshot = snapshots.recv() => {
                let state = match snapshot {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, sending latest record");
                        relay.snapshot().await
                    }
                    Err(RecvError::Closed) => break,
                };
                if write_response(&mut writer, &DaemonResponse::ok(json!(state))).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("subscriber detached");
    Ok(())
}

async fn build_status(home: &Path, relay: &Relay, started_at_unix: u64) -> RelayStatus {
    RelayStatus {
        running: true,
        pid: std::process::id(),
        started_at_unix,
        subscribers: relay.subscriber_count(),
        presenters: relay.presenters().into_iter().map(|p| p.user).collect(),
        state: relay.snapshot().await,
        socket: socket_path(home).display().to_string(),
        state_file: state_path(home).display().to_string(),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "relay socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale relay socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [podium_root(home), run_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn write_pid_file(home: &Path) -> Result<(), DaemonError> {
    let path = pid_path(home);
    fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| io_err(&path, e))
}

fn remove_pid_file(home: &Path) {
    let path = pid_path(home);
    if let Err(err) = fs::remove_file(&path) {
        if err.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "could not remove pid file");
        }
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("relay socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("relay socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("relay socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the fmt subscriber (`RUST_LOG`, default `info`). Records from
/// crates logging through `log` are forwarded.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// As [`init_tracing`], with `default_level` when `RUST_LOG` is unset.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
