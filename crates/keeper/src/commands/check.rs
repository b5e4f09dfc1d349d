//! Check command - validates session files without loading them.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use keeper_session::store;
use serde::Serialize;

use super::Context;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Session files to validate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Per-file result for JSON output.
#[derive(Debug, Serialize)]
struct CheckOutput {
    path: String,
    ok: bool,
    id: Option<String>,
    bytes: usize,
    error: Option<String>,
}

fn check_file(path: &Path) -> CheckOutput {
    let mut out = CheckOutput {
        path: path.display().to_string(),
        ok: false,
        id: None,
        bytes: 0,
        error: None,
    };
    let buf = match std::fs::read(path) {
        Ok(buf) => buf,
        Err(e) => {
            out.error = Some(e.to_string());
            return out;
        }
    };
    out.bytes = buf.len();
    match store::decode_file(&buf) {
        Ok(record) => {
            out.ok = true;
            out.id = Some(record.id.to_string());
        }
        Err(e) => out.error = Some(e.to_string()),
    }
    out
}

/// Run the check command.
pub fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    let results: Vec<CheckOutput> = args.files.iter().map(|p| check_file(p)).collect();
    let failed = results.iter().filter(|r| !r.ok).count();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        let green = Style::new().green();
        let red = Style::new().red();
        let dim = Style::new().dim();
        for r in &results {
            if r.ok {
                println!(
                    "  {} {} {}",
                    green.apply_to("ok"),
                    r.path,
                    dim.apply_to(format!(
                        "({}, {} bytes)",
                        r.id.as_deref().unwrap_or_default(),
                        r.bytes
                    ))
                );
            } else {
                println!(
                    "  {} {}: {}",
                    red.apply_to("corrupt"),
                    r.path,
                    r.error.as_deref().unwrap_or_default()
                );
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} files failed validation", results.len());
    }
    Ok(())
}
