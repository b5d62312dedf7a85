//! Channel constants.
//!
//! Single source of truth for limits, layout parameters and defaults used by
//! the library and the binaries.

/// Default segment name, shared by the demo writer and reader.
pub const DEFAULT_SEGMENT_NAME: &str = "/sharedmem";

/// Maximum length of a POSIX shared-memory name in bytes (`NAME_MAX`).
pub const SHM_NAME_MAX: usize = 255;

/// Default permission bits for created segments (owner read/write).
pub const DEFAULT_PERMISSIONS: u32 = 0o600;

/// CPU cache line size in bytes. The slot header occupies exactly one line.
pub const CACHE_LINE_SIZE: usize = 64;

/// Magic value stored in every initialized slot header: `"SEQCHAN\0"`.
pub const SLOT_MAGIC: u64 = u64::from_le_bytes(*b"SEQCHAN\0");

/// Default number of attempts before a read is reported stale.
pub const DEFAULT_RETRY_CEILING: u32 = 1000;

/// Default reader poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default demo writer publish interval in milliseconds.
pub const DEFAULT_PUBLISH_INTERVAL_MS: u64 = 2000;

/// Demo writer publishes values in `0..DEFAULT_VALUE_RANGE`.
pub const DEFAULT_VALUE_RANGE: i32 = 1000;

/// Directory where Linux exposes POSIX shared-memory objects.
pub const SHM_DIR: &str = "/dev/shm";
