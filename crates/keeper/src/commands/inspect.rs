//! Inspect command - prints a session file's record and value tree.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use console::{Style, style};
use keeper_session::store;
use serde_json::json;

use super::{Context, format_ts};

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session file to read
    pub file: PathBuf,
}

/// Run the inspect command.
pub fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let buf = std::fs::read(&args.file)
        .with_context(|| format!("failed to read '{}'", args.file.display()))?;
    let record = store::decode_file(&buf)
        .with_context(|| format!("'{}' is not a valid session file", args.file.display()))?;

    let client = record.client.map(|c| c.to_string());
    let data = record.tree.to_json();

    if ctx.json_output {
        let output = json!({
            "id": record.id.to_string(),
            "client": client,
            "user_agent": record.user_agent,
            "user_id": record.user_id,
            "created_at": format_ts(record.created_at),
            "opened_at": format_ts(record.opened_at),
            "timeout": record.timeout,
            "lifetime": record.lifetime,
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style(format!("Session {}", record.id)).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!(
        "  {} {}",
        dim.apply_to("Client:    "),
        client.as_deref().unwrap_or("unbound")
    );
    println!("  {} {:#010x}", dim.apply_to("User agent:"), record.user_agent);
    println!("  {} {}", dim.apply_to("User id:   "), record.user_id);
    println!("  {} {}", dim.apply_to("Created:   "), format_ts(record.created_at));
    println!("  {} {}", dim.apply_to("Opened:    "), format_ts(record.opened_at));
    println!(
        "  {} {}s / {}s",
        dim.apply_to("Timeout/lifetime:"),
        record.timeout,
        record.lifetime
    );
    if ctx.verbose {
        println!("  {} {}", dim.apply_to("File size: "), buf.len());
    }
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("{}", serde_json::to_string_pretty(&data)?);
    println!();
    Ok(())
}
