//! # seqchan inspect
//!
//! Prints channel segment headers as JSON: one segment when `--name` is
//! given, otherwise every channel segment found in `/dev/shm`.

use clap::Parser;
use seqchan::{SegmentInfo, inspect, list_segments};
use seqchan_tools::setup_tracing;
use seqchan_common::config::LogLevel;
use std::process;
use tracing::{debug, error};

/// seqchan inspect: dump channel segment metadata
#[derive(Parser, Debug)]
#[command(name = "seqchan_inspect")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Print seqlock channel segment headers as JSON")]
struct Args {
    /// Segment to inspect, e.g. /sharedmem. Lists all channels when omitted.
    #[arg(short, long)]
    name: Option<String>,

    /// Pretty-print the JSON.
    #[arg(short, long)]
    pretty: bool,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    setup_tracing(level, false);

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let segments: Vec<SegmentInfo> = match &args.name {
        Some(name) => vec![inspect(name)?],
        None => list_segments()?,
    };
    debug!("Found {} channel segment(s)", segments.len());

    let output = match (&args.name, args.pretty) {
        (Some(_), true) => serde_json::to_string_pretty(&segments[0])?,
        (Some(_), false) => serde_json::to_string(&segments[0])?,
        (None, true) => serde_json::to_string_pretty(&segments)?,
        (None, false) => serde_json::to_string(&segments)?,
    };
    println!("{output}");

    Ok(())
}
