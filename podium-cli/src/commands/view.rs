//! `podium view`: follow the presenter in a headless viewer.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinError;

use podium_core::{config, FsDeckStore, StatePatch};
use podium_daemon::{init_tracing_with_default, SocketChannel};
use podium_sync::{
    viewer_events, HeadlessViewer, PdfLoader, ReconciliationEngine, Session, SessionEvent,
    SyncError,
};

#[derive(Args, Debug)]
pub struct ViewArgs {
    /// Keep the page at its natural size instead of fitting it to the frame.
    #[arg(long)]
    pub no_fit: bool,
}

impl ViewArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let settings = config::load_at(&home).context("failed to load config")?;
        let fit_to_frame = settings.viewer.fit_to_frame && !self.no_fit;
        init_tracing_with_default("warn");

        super::runtime()?.block_on(async move {
            let (tx, rx) = viewer_events();
            let engine =
                ReconciliationEngine::viewer(HeadlessViewer::new(tx)).with_fit_to_frame(fit_to_frame);
            let (session, handle) = Session::new(
                engine,
                rx,
                Arc::new(SocketChannel::at(&home)),
                Arc::new(FsDeckStore::at(&home)),
                Arc::new(PdfLoader),
            );
            let printer = tokio::spawn(print_events(handle.subscribe()));
            let mut session_task = tokio::spawn(session.run());
            println!("Following the presenter. Press ctrl-c to stop.");

            let result = tokio::select! {
                joined = &mut session_task => finish_session(joined),
                _ = tokio::signal::ctrl_c() => {
                    handle.shutdown().await.ok();
                    finish_session(session_task.await)
                }
            };
            printer.abort();
            result
        })
    }
}

/// Flatten a finished session task into one error chain.
pub(crate) fn finish_session(
    joined: Result<Result<(), SyncError>, JoinError>,
) -> Result<()> {
    match joined.context("session task failed")? {
        Ok(()) => Ok(()),
        Err(err @ SyncError::Subscribe(_)) => {
            Err(err).context("could not reach the relay; start it with 'podium serve'")
        }
        Err(err) => Err(err).context("session ended"),
    }
}

/// Print events until the session drops its sender.
pub(crate) async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe(&event)),
            Err(RecvError::Lagged(skipped)) => {
                println!("{}", format!("({skipped} events skipped)").dimmed());
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Human-readable line for a session event.
pub(crate) fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::DeckLoaded { deck, pages_count } => {
            format!("loaded {} ({pages_count} pages)", deck.as_str().bold())
        }
        SessionEvent::PageShown { deck, page } => {
            format!("{} {} page {page}", "▶".green(), deck.as_str().bold())
        }
        SessionEvent::DeckClosed => "no deck selected".to_string(),
        SessionEvent::LoadFailed { deck, error } => {
            format!("{} failed to load {deck}: {error}", "✗".red())
        }
        SessionEvent::Published(patch) => {
            format!("published {}", describe_patch(patch)).dimmed().to_string()
        }
        SessionEvent::PublishFailed { error } => {
            format!("{} write not saved: {error}", "✗".red())
        }
        SessionEvent::AuthorityChanged { can_write: true } => {
            format!("{} presenter controls enabled", "✓".green())
        }
        SessionEvent::AuthorityChanged { can_write: false } => format!(
            "{} read-only: your session ended, type 'login' to sign in again",
            "!".yellow().bold()
        ),
    }
}

fn describe_patch(patch: &StatePatch) -> String {
    let mut parts = Vec::new();
    if let Some(deck) = &patch.current_deck {
        parts.push(format!("deck={deck}"));
    }
    for (deck, page) in &patch.current_page_number {
        parts.push(format!("{deck}:{page}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use podium_core::{DeckName, PageNumber};

    #[test]
    fn events_render_as_plain_lines() {
        colored::control::set_override(false);
        let intro = DeckName::from("intro");
        let page = PageNumber::new(3).expect("page");

        assert_eq!(
            describe(&SessionEvent::PageShown {
                deck: intro.clone(),
                page
            }),
            "▶ intro page 3"
        );
        assert_eq!(
            describe(&SessionEvent::Published(
                StatePatch::default()
                    .with_deck(intro.clone())
                    .with_page(intro, page)
            )),
            "published deck=intro intro:3"
        );
    }
}
