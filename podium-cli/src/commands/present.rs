//! `podium present`: drive the shared presentation from stdin.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use podium_core::{config, FsDeckStore, Identity};
use podium_daemon::{init_tracing_with_default, DaemonError, SocketChannel};
use podium_sync::{
    viewer_events, AuthorityGate, HeadlessViewer, PdfLoader, Proposal, ReconciliationEngine,
    Session, SessionHandle, SessionStatus, SyncError,
};

use super::init::resolve_password;
use super::view::{finish_session, print_events};

const HELP: &str = "\
commands:
  next | n | >      next page
  prev | p | <      previous page
  goto <page>       jump to a page
  deck <name>       switch deck
  decks             list decks known to the relay
  state             show local and shared state
  login | logout    sign in again or drop write access
  help              this text
  quit | q          leave";

#[derive(Args, Debug)]
pub struct PresentArgs {
    /// Presenter name configured with `podium init`.
    #[arg(long, short = 'u')]
    pub user: String,

    /// Password. Read from $PODIUM_PASSWORD or stdin when omitted.
    #[arg(long)]
    pub password: Option<String>,

    /// Keep the page at its natural size instead of fitting it to the frame.
    #[arg(long)]
    pub no_fit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Next,
    Previous,
    Goto(i64),
    Deck(String),
    Decks,
    State,
    Login,
    Logout,
    Help,
    Quit,
}

impl PresentArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let settings = config::load_at(&home).context("failed to load config")?;
        let fit_to_frame = settings.viewer.fit_to_frame && !self.no_fit;
        init_tracing_with_default("warn");
        let user = self.user;
        let password = resolve_password(self.password, &user)?;

        super::runtime()?.block_on(async move {
            let channel = Arc::new(SocketChannel::at(&home));
            let identity = login(&channel, &user, &password).await?;

            let (tx, rx) = viewer_events();
            let engine = ReconciliationEngine::presenter(HeadlessViewer::new(tx), AuthorityGate::new())
                .with_fit_to_frame(fit_to_frame);
            let (session, handle) = Session::new(
                engine,
                rx,
                Arc::clone(&channel),
                Arc::new(FsDeckStore::at(&home)),
                Arc::new(PdfLoader),
            );
            let printer = tokio::spawn(print_events(handle.subscribe()));
            let mut session_task = tokio::spawn(session.run());

            handle
                .set_identity(Some(identity))
                .await
                .context("failed to enable presenter controls")?;
            println!("Presenting as {}. Type 'help' for commands.", user.bold());

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut finished = None;
            loop {
                tokio::select! {
                    joined = &mut session_task => {
                        finished = Some(finish_session(joined));
                        break;
                    }
                    _ = tokio::signal::ctrl_c() => break,
                    line = lines.next_line() => {
                        let Some(line) = line.context("failed to read stdin")? else { break };
                        let input = match parse(&line) {
                            Ok(Some(input)) => input,
                            Ok(None) => continue,
                            Err(message) => {
                                println!("{} {message}", "?".yellow().bold());
                                continue;
                            }
                        };
                        if input == Input::Quit {
                            break;
                        }
                        execute(input, &handle, &channel, &user, &password).await;
                    }
                }
            }

            let result = match finished {
                Some(result) => result,
                None => {
                    handle.shutdown().await.ok();
                    finish_session(session_task.await)
                }
            };
            if channel.is_logged_in() {
                if let Err(err) = channel.logout().await {
                    eprintln!("warning: logout failed: {err}");
                }
            }
            printer.abort();
            result
        })
    }
}

async fn login(channel: &SocketChannel, user: &str, password: &str) -> Result<Identity> {
    match channel.login(user, password).await {
        Ok(identity) => Ok(identity),
        Err(DaemonError::Unauthorized) => anyhow::bail!("invalid user or password for '{user}'"),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            anyhow::bail!("relay is not running; start it with 'podium serve'")
        }
        Err(err) => Err(err).context("login failed"),
    }
}

async fn execute(
    input: Input,
    handle: &SessionHandle,
    channel: &SocketChannel,
    user: &str,
    password: &str,
) {
    let outcome = match input {
        Input::Next => handle.next_page().await,
        Input::Previous => handle.previous_page().await,
        Input::Goto(page) => handle.goto(page).await,
        Input::Deck(name) => handle.switch_deck(name).await,
        Input::Decks => {
            match channel.decks().await {
                Ok(decks) if decks.is_empty() => println!("no decks stored"),
                Ok(decks) => {
                    for deck in decks {
                        println!("  {deck}");
                    }
                }
                Err(err) => println!("{} {err}", "✗".red()),
            }
            return;
        }
        Input::State => {
            match handle.status().await {
                Ok(status) => print_status(&status),
                Err(err) => println!("{} {err}", "✗".red()),
            }
            return;
        }
        Input::Login => {
            match login(channel, user, password).await {
                Ok(identity) => {
                    if let Err(err) = handle.set_identity(Some(identity)).await {
                        println!("{} {err}", "✗".red());
                    }
                }
                Err(err) => println!("{} {err:#}", "✗".red()),
            }
            return;
        }
        Input::Logout => {
            if let Err(err) = channel.logout().await {
                println!("{} {err}", "✗".red());
            }
            if let Err(err) = handle.set_identity(None).await {
                println!("{} {err}", "✗".red());
            }
            return;
        }
        Input::Help => {
            println!("{HELP}");
            return;
        }
        Input::Quit => return,
    };
    report(outcome);
}

fn report(outcome: Result<Proposal, SyncError>) {
    match outcome {
        Ok(proposal) if proposal.publish.is_none() && proposal.page_applied.is_none() => {
            if proposal.load.is_none() {
                println!("{}", "nothing to change".dimmed());
            }
        }
        Ok(_) => {}
        Err(err) => println!("{} {err}", "✗".red()),
    }
}

fn print_status(status: &SessionStatus) {
    let local = &status.local;
    match (&local.loaded_deck, local.displayed_page_number) {
        (Some(deck), Some(page)) => println!(
            "  local:  {deck} page {page} of {}",
            local.loaded_page_count.unwrap_or(0)
        ),
        (Some(deck), None) => println!("  local:  {deck} (loading)"),
        _ => println!("  local:  nothing loaded"),
    }
    match (&status.shared.current_deck, status.shared.active_page()) {
        (Some(deck), Some(page)) => println!("  shared: {deck} page {page}"),
        _ => println!("  shared: no deck selected"),
    }
    let access = if status.can_write { "write" } else { "read-only" };
    println!("  access: {access}");
}

/// One stdin line. `Ok(None)` for blank input.
fn parse(line: &str) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let argument = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for '{command}'"));
    }

    let input = match (command.to_ascii_lowercase().as_str(), argument) {
        ("next" | "n" | ">", None) => Input::Next,
        ("prev" | "previous" | "p" | "<", None) => Input::Previous,
        ("goto" | "g", Some(page)) => Input::Goto(
            page.parse()
                .map_err(|_| format!("'{page}' is not a page number"))?,
        ),
        ("goto" | "g", None) => return Err("usage: goto <page>".to_string()),
        ("deck" | "d", Some(name)) => Input::Deck(name.to_string()),
        ("deck" | "d", None) => return Err("usage: deck <name>".to_string()),
        ("decks", None) => Input::Decks,
        ("state" | "s", None) => Input::State,
        ("login", None) => Input::Login,
        ("logout", None) => Input::Logout,
        ("help" | "h" | "?", None) => Input::Help,
        ("quit" | "q" | "exit", None) => Input::Quit,
        (_, Some(_)) => return Err(format!("'{command}' takes no argument")),
        _ => return Err(format!("unknown command '{command}'; try 'help'")),
    };
    Ok(Some(input))
}
