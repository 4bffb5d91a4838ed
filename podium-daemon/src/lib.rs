//! State relay: owns the shared presentation record and serves it over a
//! Unix socket (newline-delimited JSON), plus the client side of that socket.

pub mod client;
mod error;
pub mod paths;
pub mod protocol;
pub mod relay;
mod runtime;

pub use client::SocketChannel;
pub use error::DaemonError;
pub use protocol::{
    request_state, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use relay::Relay;
pub use runtime::{init_tracing, init_tracing_with_default, run, start_blocking, RelayStatus};
