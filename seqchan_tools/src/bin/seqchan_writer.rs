//! # seqchan writer
//!
//! Demo producer: publishes a pseudo-random `i32` to the channel at a fixed
//! interval until Ctrl-C. When configured as owner it unlinks the segment
//! on the way out; otherwise the segment is left for other processes.

use clap::Parser;
use rand::Rng;
use seqchan::{Role, Writer, shutdown_owned};
use seqchan_common::channel::ChannelConfig;
use seqchan_common::config::Validate;
use seqchan_tools::{CommonArgs, install_shutdown_handler, load_config, setup_tracing, writer_options};
use std::process;
use tracing::{debug, error, info};

/// seqchan writer: publish random values to a shared memory channel
#[derive(Parser, Debug)]
#[command(name = "seqchan_writer")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Publish pseudo-random values to a seqlock shared memory channel")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Milliseconds between publishes (overrides the config file).
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Publish values in 0..RANGE (overrides the config file).
    #[arg(long, value_name = "RANGE")]
    value_range: Option<i32>,

    /// Unlink the segment on shutdown.
    #[arg(long)]
    owner: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match load_config(&args.common, "seqchan-writer") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            process::exit(1);
        }
    };
    if let Some(interval) = args.interval_ms {
        config.writer.publish_interval_ms = interval;
    }
    if let Some(range) = args.value_range {
        config.writer.value_range = range;
    }
    if args.owner {
        config.segment.role = Role::Owner;
    }

    setup_tracing(config.shared.log_level, args.common.json);
    info!("seqchan writer v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("seqchan writer shutdown complete");
}

fn run(config: &ChannelConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Overrides are applied after load_config validated the file.
    config.validate()?;

    let cancel = install_shutdown_handler()?;
    let interval = config.writer.publish_interval();
    let range = config.writer.value_range;

    let mut writer = Writer::<i32>::create(&config.segment.name, writer_options(&config.segment))?;
    info!(
        "Publishing to {} every {:?} (role {:?}, created: {})",
        writer.name(),
        interval,
        writer.role(),
        writer.created_segment()
    );

    let mut rng = rand::thread_rng();
    while !cancel.is_cancelled() {
        let value = rng.gen_range(0..range);
        let sequence = writer.publish(value)?;
        println!("[writer pid {}] wrote {value}", writer.writer_pid());
        debug!("Published {} at sequence {}", value, sequence);

        if cancel.sleep(interval) {
            break;
        }
    }

    writer.close();

    if config.segment.role == Role::Owner {
        let removed = shutdown_owned()?;
        info!("Removed {} owned segment(s)", removed);
    }

    Ok(())
}
