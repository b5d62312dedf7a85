//! Channel configuration shared by the seqchan binaries.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "seqchan-writer"
//! log_level = "info"
//!
//! [segment]
//! name = "/sharedmem"
//! permissions = 0o600
//! role = "owner"
//!
//! [reader]
//! poll_interval_ms = 1000
//! retry_ceiling = 1000
//!
//! [writer]
//! publish_interval_ms = 2000
//! value_range = 1000
//! ```

use crate::config::{ConfigError, SharedConfig, Validate};
use crate::consts::{
    DEFAULT_PERMISSIONS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PUBLISH_INTERVAL_MS,
    DEFAULT_RETRY_CEILING, DEFAULT_SEGMENT_NAME, DEFAULT_VALUE_RANGE, SHM_NAME_MAX,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which process tears the segment down.
///
/// Only an `Owner` unlinks the name, and only when asked to. Nothing is
/// removed implicitly on exit because other processes may still be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Responsible for unlinking the segment on normal shutdown.
    Owner,
    /// Attaches and detaches, never unlinks.
    #[default]
    Participant,
}

/// `[segment]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SegmentConfig {
    /// POSIX shared-memory name, e.g. `/sharedmem`.
    #[serde(default = "default_segment_name")]
    pub name: String,
    /// Permission bits applied when the segment is created.
    #[serde(default = "default_permissions")]
    pub permissions: u32,
    /// Teardown responsibility.
    #[serde(default)]
    pub role: Role,
}

/// `[reader]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Sleep between polls in `observe_blocking`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Attempts before a read is reported stale.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
}

/// `[writer]` section (demo writer only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Sleep between publishes.
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    /// Published values are drawn from `0..value_range`.
    #[serde(default = "default_value_range")]
    pub value_range: i32,
}

/// Complete configuration file for a seqchan binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Common logging and identity settings.
    pub shared: SharedConfig,
    /// Segment naming, permissions and role.
    #[serde(default)]
    pub segment: SegmentConfig,
    /// Reader tuning.
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Demo writer tuning.
    #[serde(default)]
    pub writer: WriterConfig,
}

fn default_segment_name() -> String {
    DEFAULT_SEGMENT_NAME.to_string()
}

fn default_permissions() -> u32 {
    DEFAULT_PERMISSIONS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_retry_ceiling() -> u32 {
    DEFAULT_RETRY_CEILING
}

fn default_publish_interval_ms() -> u64 {
    DEFAULT_PUBLISH_INTERVAL_MS
}

fn default_value_range() -> i32 {
    DEFAULT_VALUE_RANGE
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            name: default_segment_name(),
            permissions: DEFAULT_PERMISSIONS,
            role: Role::default(),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry_ceiling: DEFAULT_RETRY_CEILING,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: DEFAULT_PUBLISH_INTERVAL_MS,
            value_range: DEFAULT_VALUE_RANGE,
        }
    }
}

impl ChannelConfig {
    /// Default configuration for the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            shared: SharedConfig::named(service_name),
            segment: SegmentConfig::default(),
            reader: ReaderConfig::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WriterConfig {
    /// Publish interval as a `Duration`.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Check a name against the POSIX `shm_open` portability rules.
///
/// Returns the reason when the name is rejected.
pub fn check_segment_name(name: &str) -> Result<(), &'static str> {
    if !name.starts_with('/') {
        return Err("name must start with '/'");
    }
    if name.len() == 1 {
        return Err("name must have at least one character after '/'");
    }
    if name[1..].contains('/') {
        return Err("name must not contain '/' after the first character");
    }
    if name.len() > SHM_NAME_MAX {
        return Err("name must be at most 255 bytes");
    }
    if name.contains('\0') {
        return Err("name must not contain NUL bytes");
    }
    Ok(())
}

impl Validate for SegmentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_segment_name(&self.name)
            .map_err(|reason| ConfigError::ValidationError(format!("segment.name: {reason}")))?;
        if self.permissions & !0o777 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "segment.permissions: {:#o} has bits outside 0o777",
                self.permissions
            )));
        }
        if self.permissions & 0o600 != 0o600 {
            return Err(ConfigError::ValidationError(
                "segment.permissions: owner must be able to read and write".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for ReaderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_ceiling == 0 {
            return Err(ConfigError::ValidationError(
                "reader.retry_ceiling must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for WriterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.value_range <= 0 {
            return Err(ConfigError::ValidationError(
                "writer.value_range must be positive".to_string(),
            ));
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "writer.publish_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for ChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.segment.validate()?;
        self.reader.validate()?;
        self.writer.validate()
    }
}
