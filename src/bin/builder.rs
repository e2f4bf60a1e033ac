//! Snapshot Builder Binary
//!
//! Reads finished player-match rows (JSONL), tokenizes them into the bitmap
//! index, optionally applies display-name catalogs, precomputes the AIPW
//! necessity cache, and writes the versioned binary snapshot.

use anyhow::Context;
use clap::Parser;
use smeecher::engine::Builder;
use smeecher::engine::row::PlayerMatchRow;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "build the smeecher engine snapshot from ingested rows")]
struct Args {
    /// player-match rows, one JSON object per line
    #[arg(long, default_value = "data/matches.jsonl")]
    rows: PathBuf,
    /// output snapshot path
    #[arg(long, default_value = "data/engine.bin")]
    out: PathBuf,
    /// JSON catalog: item id -> display name
    #[arg(long)]
    item_names: Option<PathBuf>,
    /// JSON catalog: trait id -> display name
    #[arg(long)]
    trait_names: Option<PathBuf>,
    /// JSON catalog: trait id -> ordered min-unit breakpoints
    #[arg(long)]
    trait_breakpoints: Option<PathBuf>,
    /// skip the (slow) necessity precompute
    #[arg(long)]
    skip_necessity: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    smeecher::init();
    let args = Args::parse();

    log::info!("{:<32}{}", "reading rows", args.rows.display());
    let file = std::fs::File::open(&args.rows)
        .with_context(|| format!("open rows file {}", args.rows.display()))?;
    let mut builder = Builder::new();
    let mut n_rows = 0usize;
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row: PlayerMatchRow =
            serde_json::from_str(&line).with_context(|| format!("parse row {}", n_rows + 1))?;
        builder.witness(&row);
        n_rows += 1;
    }
    log::info!("{:<32}{}", "rows ingested", n_rows);
    let mut engine = builder.seal();

    if let Some(path) = &args.item_names {
        let names = load_catalog(path)?;
        let updated = engine.vocab_mut().apply_item_names(&names);
        log::info!("{:<32}{} item/equipped tokens", "applied display names", updated);
    }
    if let Some(path) = &args.trait_breakpoints {
        let breakpoints: HashMap<String, Vec<u32>> = lowercase_keys(
            serde_json::from_reader(std::fs::File::open(path)?)
                .with_context(|| format!("parse breakpoints catalog {}", path.display()))?,
        );
        let updated = engine.vocab_mut().apply_trait_breakpoints(&breakpoints);
        log::info!("{:<32}{} trait tokens", "applied breakpoints", updated);
    }
    if let Some(path) = &args.trait_names {
        let names = load_catalog(path)?;
        let updated = engine.vocab_mut().apply_trait_names(&names);
        log::info!("{:<32}{} trait tokens", "applied display names", updated);
    }

    let stats = engine.stats();
    log::info!("{:<32}{}", "total matches", stats.total_matches);
    log::info!("{:<32}{}", "total tokens", stats.total_tokens);
    log::info!("{:<32}{}", "unit tokens", stats.unit_tokens);
    log::info!("{:<32}{}", "item tokens", stats.item_tokens);
    log::info!("{:<32}{}", "equipped tokens", stats.equipped_tokens);
    log::info!("{:<32}{}", "trait tokens", stats.trait_tokens);

    if !args.skip_necessity {
        smeecher::causal::necessity::precompute(&mut engine);
    }

    engine.save(&args.out)?;
    Ok(())
}

fn load_catalog(path: &PathBuf) -> anyhow::Result<HashMap<String, String>> {
    let map: HashMap<String, String> = serde_json::from_reader(std::fs::File::open(path)?)
        .with_context(|| format!("parse catalog {}", path.display()))?;
    Ok(lowercase_keys(map))
}

fn lowercase_keys<V>(map: HashMap<String, V>) -> HashMap<String, V> {
    map.into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect()
}
