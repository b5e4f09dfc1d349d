//! Sweep command - deletes expired session files once.

use anyhow::Result;
use clap::Args;
use console::Style;
use keeper_session::preview_expired;

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Report what would be deleted without deleting it
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the sweep command.
pub fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.engine()?;
    let report = if args.dry_run {
        preview_expired(engine.store())
    } else {
        engine.delete_expired()
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    println!(
        "{verb} {} of {} session files {}",
        report.deleted,
        report.scanned,
        dim.apply_to(format!("in {}", engine.store().dir().display()))
    );
    if report.failed > 0 {
        println!("{}", Style::new().red().apply_to(format!("{} files could not be removed", report.failed)));
    }
    Ok(())
}
