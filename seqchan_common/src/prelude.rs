//! Prelude module for common re-exports.
//!
//! ```rust
//! use seqchan_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::channel::{ChannelConfig, ReaderConfig, Role, SegmentConfig, WriterConfig};
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, Validate};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_RETRY_CEILING, DEFAULT_SEGMENT_NAME};
