//! `podium serve | stop | status`: relay lifecycle.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use podium_core::SharedPresentationState;
use podium_daemon::paths::socket_path;
use podium_daemon::{request_status, request_stop, start_blocking, DaemonError};

pub fn serve() -> Result<()> {
    let home = super::home()?;
    start_blocking(&home).context("relay exited with error")
}

pub fn stop() -> Result<()> {
    let home = super::home()?;
    match request_stop(&home) {
        Ok(()) => println!("relay stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("relay is not running"),
        Err(err) => return Err(err).context("failed to stop relay"),
    }
    Ok(())
}

/// Arguments for `podium status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                "running": false,
                "socket": socket_path(&home).display().to_string(),
            }),
            Err(err) => return Err(err).context("failed to query relay status"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("failed to render relay status JSON")?
            );
            return Ok(());
        }

        print_summary(&status);
        Ok(())
    }
}

fn print_summary(status: &Value) {
    if status["running"] != Value::Bool(true) {
        println!("{} relay is not running", "■".bright_black().bold());
        return;
    }

    println!(
        "{} relay running (pid {})",
        "■".green().bold(),
        status["pid"]
    );
    println!("  socket:      {}", status["socket"].as_str().unwrap_or("-"));
    println!("  subscribers: {}", status["subscribers"]);

    let presenters: Vec<&str> = status["presenters"]
        .as_array()
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if presenters.is_empty() {
        println!("  presenters:  none");
    } else {
        println!("  presenters:  {}", presenters.join(", "));
    }

    println!("  {}", current_position(&status["state"]));
}

/// One-line rendering of the shared record.
fn current_position(state: &Value) -> String {
    let state: SharedPresentationState =
        serde_json::from_value(state.clone()).unwrap_or_default();
    match (&state.current_deck, state.active_page()) {
        (Some(deck), Some(page)) => format!("showing {} page {page}", deck.as_str().bold()),
        _ => "no deck selected".to_string(),
    }
}
