//! Podium: keep every screen on the presenter's slide.
//!
//! # Usage
//!
//! ```text
//! podium init --user <name> [--password <pw>]
//! podium deck list [--json]
//! podium deck add <name> <file.pdf>
//! podium deck remove <name>
//! podium serve
//! podium stop
//! podium status [--json]
//! podium view
//! podium present --user <name> [--password <pw>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    deck::DeckCommand, init::InitArgs, present::PresentArgs, relay::StatusArgs, view::ViewArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "podium",
    version,
    about = "Synchronized slide decks: one presenter, many viewers",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update a presenter account.
    Init(InitArgs),

    /// Manage the decks available to sessions.
    Deck {
        #[command(subcommand)]
        command: DeckCommand,
    },

    /// Run the state relay in the foreground.
    Serve,

    /// Ask a running relay to shut down.
    Stop,

    /// Show relay status and the shared record.
    Status(StatusArgs),

    /// Follow the presenter in this terminal.
    View(ViewArgs),

    /// Drive the presentation from this terminal.
    Present(PresentArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Deck { command } => commands::deck::run(command),
        Commands::Serve => commands::relay::serve(),
        Commands::Stop => commands::relay::stop(),
        Commands::Status(args) => args.run(),
        Commands::View(args) => args.run(),
        Commands::Present(args) => args.run(),
    }
}
