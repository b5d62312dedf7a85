//! # seqchan tools
//!
//! Shared command-line plumbing for the `seqchan_writer`, `seqchan_reader`
//! and `seqchan_inspect` binaries: common flags, config loading with
//! command-line overrides, tracing setup and Ctrl-C handling.

use clap::Args;
use seqchan::{CancelToken, Permissions, ReaderOptions, WriterOptions};
use seqchan_common::prelude::*;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

/// Flags shared by every seqchan binary.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Path to a channel configuration TOML.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Segment name (overrides the config file), e.g. /sharedmem.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    pub verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    pub json: bool,
}

/// Load the config file (or defaults) and apply command-line overrides.
///
/// The merged result is validated before it is returned.
pub fn load_config(args: &CommonArgs, service_name: &str) -> Result<ChannelConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ChannelConfig::load(path)?,
        None => ChannelConfig::new(service_name),
    };

    if let Some(name) = &args.name {
        config.segment.name = name.clone();
    }
    if args.verbose {
        config.shared.log_level = LogLevel::Debug;
    }

    config.validate()?;
    Ok(config)
}

/// Install the global tracing subscriber.
pub fn setup_tracing(level: LogLevel, json: bool) {
    let level: Level = level.into();
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

/// Route Ctrl-C / SIGTERM to a cancel token.
pub fn install_shutdown_handler() -> Result<CancelToken, ctrlc::Error> {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handle.cancel();
    })?;
    Ok(cancel)
}

/// Writer options derived from the `[segment]` section.
pub fn writer_options(segment: &SegmentConfig) -> WriterOptions {
    WriterOptions {
        permissions: Permissions::from_mode(segment.permissions),
        role: segment.role,
        ..WriterOptions::default()
    }
}

/// Reader options derived from the `[reader]` section.
pub fn reader_options(reader: &ReaderConfig) -> ReaderOptions {
    ReaderOptions {
        retry_ceiling: reader.retry_ceiling,
    }
}
