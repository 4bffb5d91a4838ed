//! `podium init --user <name> [--password <pw>]`

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::Args;

use podium_core::{config, PresenterAccount};

/// Create or update a presenter account in `~/.podium/config.yaml`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Presenter name used to log in.
    #[arg(long, short = 'u')]
    pub user: String,

    /// Password. Read from $PODIUM_PASSWORD or stdin when omitted.
    #[arg(long)]
    pub password: Option<String>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let password = resolve_password(self.password, &self.user)?;
        if password.is_empty() {
            bail!("password must not be empty");
        }

        let mut config = config::load_at(&home).context("failed to load config")?;
        let replaced = config.presenters.iter().any(|a| a.user == self.user);
        config.upsert_presenter(PresenterAccount::new(self.user.clone(), &password));
        config::save_at(&home, &config).context("failed to save config")?;

        let verb = if replaced { "Updated" } else { "Added" };
        println!("✓ {verb} presenter '{}'", self.user);
        println!(
            "  Saved to: {}",
            config::config_path_at(&home).display()
        );
        Ok(())
    }
}

/// `--password`, then `$PODIUM_PASSWORD`, then one line from stdin.
pub(crate) fn resolve_password(flag: Option<String>, user: &str) -> Result<String> {
    if let Some(password) = flag {
        return Ok(password);
    }
    if let Ok(password) = std::env::var("PODIUM_PASSWORD") {
        return Ok(password);
    }
    eprint!("password for {user}: ");
    io::stderr().flush().context("failed to flush prompt")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
