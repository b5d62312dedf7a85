//! Error types for channel operations

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur during shared memory channel operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// No segment with this name exists
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Segment already exists (exclusive create)
    #[error("Segment already exists: {name}")]
    AlreadyExists {
        /// Segment name
        name: String,
    },

    /// Permission denied
    #[error("Permission denied accessing segment: {name}")]
    PermissionDenied {
        /// Segment name
        name: String,
    },

    /// Name does not follow the POSIX shared-memory naming rules
    #[error("Invalid segment name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Rule that was violated
        reason: &'static str,
    },

    /// Invalid requested size
    #[error("Invalid segment size: {size} bytes")]
    InvalidSize {
        /// Requested size in bytes
        size: usize,
    },

    /// Existing segment has a different size than requested
    #[error("Segment {name} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Segment name
        name: String,
        /// Size the caller needs
        expected: usize,
        /// Size of the existing object
        actual: u64,
    },

    /// Slot header describes a different payload type
    #[error(
        "Segment {name} carries a {found_size}-byte payload (hash {found_hash:#010x}), \
         expected {expected_size} bytes (hash {expected_hash:#010x})"
    )]
    LayoutMismatch {
        /// Segment name
        name: String,
        /// Payload size the caller expects
        expected_size: u32,
        /// Layout hash the caller expects
        expected_hash: u32,
        /// Payload size recorded in the segment
        found_size: u32,
        /// Layout hash recorded in the segment
        found_hash: u32,
    },

    /// Segment exists but no writer has initialized the slot header yet
    #[error("Segment {name} has not been initialized by a writer")]
    Uninitialized {
        /// Segment name
        name: String,
    },

    /// Memory alignment error
    #[error("Memory alignment error: address {address:#x} not aligned to {alignment}")]
    AlignmentError {
        /// Memory address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// OS-level create/open/size/map failure
    #[error("{operation} failed for segment {name}: {source}")]
    Resource {
        /// Failing operation (`shm_open`, `mmap`, ...)
        operation: &'static str,
        /// Segment name
        name: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Retry ceiling exceeded while observing (writer stalled or dead)
    #[error("Stale read after {attempts} attempts - writer stalled or dead")]
    StaleRead {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Writer used before `attach`
    #[error("Writer for segment {name} is not attached")]
    NotAttached {
        /// Segment name
        name: String,
    },

    /// Write access requested on a read-only mapping
    #[error("Segment {name} is mapped read-only")]
    ReadOnly {
        /// Segment name
        name: String,
    },

    /// Handle, writer or reader was closed
    #[error("Segment {name} is closed")]
    Closed {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl ShmError {
    /// Map an errno from a segment syscall to the matching variant.
    pub fn from_errno(operation: &'static str, name: &str, errno: Errno) -> Self {
        let name = name.to_string();
        match errno {
            Errno::ENOENT => Self::NotFound { name },
            Errno::EEXIST => Self::AlreadyExists { name },
            Errno::EACCES | Errno::EPERM => Self::PermissionDenied { name },
            Errno::EINVAL | Errno::ENAMETOOLONG => Self::InvalidName {
                name,
                reason: "rejected by the operating system",
            },
            other => Self::Resource {
                operation,
                name,
                source: other.into(),
            },
        }
    }

    /// Wrap an IO error from a segment operation.
    pub fn resource(operation: &'static str, name: &str, source: std::io::Error) -> Self {
        Self::Resource {
            operation,
            name: name.to_string(),
            source,
        }
    }

    /// True for the "segment absent" class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for OS-level create/map failures and permission or layout mismatches.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. }
                | Self::PermissionDenied { .. }
                | Self::InvalidName { .. }
                | Self::InvalidSize { .. }
                | Self::SizeMismatch { .. }
                | Self::LayoutMismatch { .. }
                | Self::Uninitialized { .. }
                | Self::AlignmentError { .. }
                | Self::Resource { .. }
                | Self::Io { .. }
        )
    }

    /// True when the caller may simply retry the observation later.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleRead { .. })
    }
}

/// Result type for channel operations
pub type ShmResult<T> = Result<T, ShmError>;
