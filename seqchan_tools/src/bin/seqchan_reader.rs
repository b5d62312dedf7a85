//! # seqchan reader
//!
//! Demo consumer: waits for the writer to create the channel, then prints
//! each newly published value until Ctrl-C.

use clap::Parser;
use seqchan::{CancelToken, Reader, ShmError};
use seqchan_common::channel::ChannelConfig;
use seqchan_tools::{CommonArgs, install_shutdown_handler, load_config, reader_options, setup_tracing};
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};

/// seqchan reader: print values observed on a shared memory channel
#[derive(Parser, Debug)]
#[command(name = "seqchan_reader")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Observe values published on a seqlock shared memory channel")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Milliseconds between polls (overrides the config file).
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,
}

fn main() {
    let args = Args::parse();

    let mut config = match load_config(&args.common, "seqchan-reader") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            process::exit(1);
        }
    };
    if let Some(poll) = args.poll_interval_ms {
        config.reader.poll_interval_ms = poll;
    }

    setup_tracing(config.shared.log_level, args.common.json);
    info!("seqchan reader v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("seqchan reader shutdown complete");
}

fn run(config: &ChannelConfig) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = install_shutdown_handler()?;
    let poll = config.reader.poll_interval();

    let Some(mut reader) = wait_for_channel(config, poll, &cancel)? else {
        return Ok(());
    };
    info!("Observing {} every {:?}", reader.name(), poll);

    loop {
        match reader.observe_next_blocking(poll, &cancel) {
            Ok(Some(value)) => println!("[reader pid {}] read {value}", process::id()),
            Ok(None) => break,
            Err(e) if e.is_stale() => warn!("Writer appears stuck: {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    reader.close();
    Ok(())
}

/// Retry opening until the writer has created and initialized the segment.
fn wait_for_channel(
    config: &ChannelConfig,
    poll: Duration,
    cancel: &CancelToken,
) -> Result<Option<Reader<i32>>, ShmError> {
    let mut announced = false;
    loop {
        match Reader::<i32>::open(&config.segment.name, reader_options(&config.reader)) {
            Ok(reader) => return Ok(Some(reader)),
            Err(e) if e.is_not_found() || matches!(e, ShmError::Uninitialized { .. }) => {
                if !announced {
                    info!("Waiting for writer to create {}", config.segment.name);
                    announced = true;
                }
            }
            Err(e) => return Err(e),
        }
        if cancel.sleep(poll) {
            return Ok(None);
        }
    }
}
