use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use aero_gpu::AeroGpuConfig;
use aero_gpu_cmd_dump::{list_cmd_stream, render_listing, render_replay, replay_cmd_stream};
use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Decode or replay a raw AeroGPU command stream.
#[derive(Debug, Parser)]
#[command(name = "aero-gpu-cmd-dump", version)]
struct Args {
    /// Command stream file, starting with the stream header.
    file: PathBuf,

    /// Print the report as pretty JSON.
    #[arg(long)]
    json: bool,

    /// Run the stream through a device with the null backend.
    #[arg(long)]
    replay: bool,

    /// Fence signaled by the replayed submission.
    #[arg(long, default_value_t = 1)]
    fence: u64,

    /// JSON device configuration. Defaults to the `AEROGPU_*` environment.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop at the first packet that does not decode.
    #[arg(long)]
    strict: bool,
}

fn load_config(path: Option<&Path>) -> Result<AeroGpuConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("invalid device config {}", path.display()))
        }
        None => AeroGpuConfig::from_env().context("invalid AEROGPU_* environment"),
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let bytes = fs::read(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;

    if args.replay {
        let config = load_config(args.config.as_deref())?;
        let report = replay_cmd_stream(&bytes, config, args.fence);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print!("{}", render_replay(&report));
        }
        let failed = !matches!(report.outcome, aero_gpu::SubmissionOutcome::Completed { .. });
        return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }

    let listing = list_cmd_stream(&bytes, args.strict)
        .with_context(|| format!("failed to decode {}", args.file.display()))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print!("{}", render_listing(&listing));
    }
    Ok(if listing.error.is_some() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
