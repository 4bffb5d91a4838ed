//! `podium deck`: list, add and remove stored decks.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use podium_core::{DeckLocator, DeckName, DeckRecord, FsDeckStore};
use podium_sync::loader::count_pages;

#[derive(Subcommand, Debug)]
pub enum DeckCommand {
    /// Show stored decks.
    List(DeckListArgs),
    /// Store a PDF under a deck name, replacing any previous upload.
    Add {
        name: String,
        file: PathBuf,
    },
    /// Delete a stored deck.
    Remove { name: String },
}

#[derive(Args, Debug)]
pub struct DeckListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: DeckCommand) -> Result<()> {
    let home = super::home()?;
    let store = FsDeckStore::at(&home);

    match command {
        DeckCommand::List(args) => list(&store, args.json)?,
        DeckCommand::Add { name, file } => {
            let bytes =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let pages = count_pages(&bytes);
            if !bytes.starts_with(b"%PDF-") || pages == 0 {
                bail!("{} is not a PDF document", file.display());
            }
            let record = store
                .upload_bytes(&DeckName::from(name.as_str()), &bytes)
                .with_context(|| format!("failed to store deck '{name}'"))?;
            println!(
                "✓ Stored deck '{}' ({} pages, {})",
                record.name,
                pages,
                human_size(record.size_bytes)
            );
        }
        DeckCommand::Remove { name } => {
            store
                .remove(&DeckName::from(name.as_str()))
                .with_context(|| format!("failed to remove deck '{name}'"))?;
            println!("✓ Removed deck '{name}'");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DeckJson {
    name: String,
    pages: u32,
    size_bytes: u64,
    sha256: Option<String>,
    stored_at: String,
    path: String,
}

#[derive(Tabled)]
struct DeckTableRow {
    #[tabled(rename = "deck")]
    name: String,
    #[tabled(rename = "pages")]
    pages: u32,
    #[tabled(rename = "size")]
    size: String,
    #[tabled(rename = "sha256")]
    sha: String,
    #[tabled(rename = "stored")]
    stored_at: String,
}

fn list(store: &FsDeckStore, json: bool) -> Result<()> {
    let mut names: Vec<DeckName> = store.list().context("failed to list decks")?.collect();
    names.sort();

    let mut decks = Vec::with_capacity(names.len());
    for name in names {
        let record = store
            .inspect(&name)
            .with_context(|| format!("failed to read deck '{name}'"))?;
        let pages = page_count(&record);
        decks.push((record, pages));
    }

    if json {
        let payload: Vec<DeckJson> = decks
            .into_iter()
            .map(|(record, pages)| DeckJson {
                name: record.name.0,
                pages,
                size_bytes: record.size_bytes,
                sha256: record.sha256,
                stored_at: record.stored_at.to_rfc3339(),
                path: record.address.0,
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render deck JSON")?
        );
        return Ok(());
    }

    if decks.is_empty() {
        println!("No decks stored. Add one with 'podium deck add <name> <file.pdf>'.");
        return Ok(());
    }

    println!("{}", "DECKS".bold());
    let rows: Vec<DeckTableRow> = decks
        .into_iter()
        .map(|(record, pages)| DeckTableRow {
            name: record.name.0,
            pages,
            size: human_size(record.size_bytes),
            sha: record
                .sha256
                .map(|sha| sha.chars().take(12).collect())
                .unwrap_or_default(),
            stored_at: record.stored_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn page_count(record: &DeckRecord) -> u32 {
    fs::read(record.address.as_path())
        .map(|bytes| count_pages(&bytes))
        .unwrap_or(0)
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    match bytes {
        b if b >= MIB => format!("{:.1} MiB", b as f64 / MIB as f64),
        b if b >= KIB => format!("{:.1} KiB", b as f64 / KIB as f64),
        b => format!("{b} B"),
    }
}
