//! Run command - hosts the engine and its job thread until told to stop.
//!
//! Reads simple commands from stdin, one per line: `sweep`, `save`, `stats`
//! and `quit`. End of input also stops the engine.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use keeper_session::{DEFAULT_SHUTDOWN_TIMEOUT, Job, JobWorker, SessionEngine, ShutdownOutcome};
use serde_json::json;
use tracing::{info, warn};

use super::Context;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the sweep interval in seconds (0 disables)
    #[arg(long)]
    pub sweep_interval: Option<u64>,
}

/// Run the run command.
pub fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let mut options = ctx.session_options()?;
    if let Some(secs) = args.sweep_interval {
        options = match secs {
            0 => options.without_sweep(),
            secs => options.with_sweep_interval(Duration::from_secs(secs)),
        };
    }
    let sweep_interval = options.sweep_interval;

    let engine = Arc::new(SessionEngine::new(options)?);
    let mut worker = JobWorker::spawn(engine.clone(), sweep_interval)?;

    if !ctx.json_output {
        println!(
            "Keeper running on {} (commands: sweep, save, stats, quit)",
            engine.store().dir().display()
        );
    }

    for line in std::io::stdin().lock().lines() {
        let job = match line?.trim() {
            "" => continue,
            "quit" | "exit" => break,
            "sweep" => Job::DeleteExpired,
            "save" => Job::CacheSaveAll,
            "stats" => {
                println!("{}", serde_json::to_string(&engine.stats())?);
                continue;
            }
            other => {
                warn!(command = other, "Unknown command");
                continue;
            }
        };
        if !worker.submit(job) {
            warn!(?job, "Job thread is not accepting work");
        }
    }

    let outcome = worker.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
    let flushed = engine.shutdown();
    info!(?outcome, "Keeper stopped");

    if ctx.json_output {
        let output = json!({
            "drained": outcome == ShutdownOutcome::Drained,
            "saved": flushed.saved,
            "failed": flushed.failed,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Keeper stopped, {} sessions saved", flushed.saved);
    }
    Ok(())
}
