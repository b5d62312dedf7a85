//! seqchan Common Library
//!
//! Shared constants and configuration loading for all seqchan workspace
//! crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Limits, layout parameters and defaults
//! - [`config`] - Configuration loading traits and types
//! - [`channel`] - Channel configuration file and segment name rules
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use seqchan_common::consts::*;
//! use seqchan_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod channel;
pub mod config;
pub mod consts;
pub mod prelude;
