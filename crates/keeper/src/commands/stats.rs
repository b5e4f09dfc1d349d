//! Stats command - summarizes the session directory.

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use keeper_session::{is_valid_id, preview_expired, store};
use serde::Serialize;

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Decode every file and count the corrupt ones
    #[arg(long)]
    pub verify: bool,
}

/// Directory summary for JSON output.
#[derive(Debug, Serialize)]
struct StatsOutput {
    path: String,
    files: usize,
    bytes: u64,
    expired: usize,
    corrupt: Option<usize>,
    cache_limit: usize,
    timeout: u64,
    lifetime: u64,
}

/// Run the stats command.
pub fn run(args: StatsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;
    let dir = engine.store().dir();

    let mut files = 0;
    let mut bytes = 0;
    let mut corrupt = 0;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list '{}'", dir.display()))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_valid_id) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        files += 1;
        bytes += meta.len();

        if args.verify {
            let valid = std::fs::read(entry.path())
                .ok()
                .is_some_and(|buf| store::decode_file(&buf).is_ok());
            if !valid {
                corrupt += 1;
            }
        }
    }

    let options = engine.options();
    let output = StatsOutput {
        path: dir.display().to_string(),
        files,
        bytes,
        expired: preview_expired(engine.store()).deleted,
        corrupt: args.verify.then_some(corrupt),
        cache_limit: options.cache_limit,
        timeout: options.timeout,
        lifetime: options.lifetime,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Keeper Session Store").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Directory:"), output.path);
    println!("  {} {}", dim.apply_to("Sessions: "), output.files);
    println!("  {} {}", dim.apply_to("Bytes:    "), output.bytes);
    println!("  {} {}", dim.apply_to("Expired:  "), output.expired);
    if let Some(corrupt) = output.corrupt {
        let count = if corrupt > 0 {
            Style::new().red().apply_to(corrupt.to_string())
        } else {
            Style::new().green().apply_to(corrupt.to_string())
        };
        println!("  {} {}", dim.apply_to("Corrupt:  "), count);
    }
    println!(
        "  {} limit {}, timeout {}s, lifetime {}s",
        dim.apply_to("Cache:    "),
        output.cache_limit,
        output.timeout,
        output.lifetime
    );
    println!();
    Ok(())
}
