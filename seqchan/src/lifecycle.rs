//! Segment teardown and owner bookkeeping
//!
//! Unlinking is always explicit. A process configured as [`Role::Owner`]
//! records the segments it is responsible for in [`OwnedSegments`] and calls
//! [`shutdown_owned`] on normal shutdown; nothing is removed on drop or exit.

use crate::error::{ShmError, ShmResult};
use crate::platform;
use crate::segment::{Permissions, validate_segment_name};
use nix::fcntl::OFlag;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub use seqchan_common::channel::Role;

/// Remove a named segment from the OS namespace.
///
/// Processes that already mapped it keep a valid mapping until they unmap.
/// Fails with `NotFound` if the name does not exist.
pub fn unlink(name: &str) -> ShmResult<()> {
    validate_segment_name(name)?;
    platform::shm_remove(name).map_err(|errno| ShmError::from_errno("shm_unlink", name, errno))?;
    info!("Unlinked segment {}", name);
    Ok(())
}

/// Whether a segment with this name currently exists.
pub fn exists(name: &str) -> ShmResult<bool> {
    validate_segment_name(name)?;
    match platform::shm_open_file(name, OFlag::O_RDONLY, Permissions::empty()) {
        Ok(_) => Ok(true),
        Err(nix::Error::ENOENT) => Ok(false),
        // Present, just not ours to open.
        Err(nix::Error::EACCES) => Ok(true),
        Err(errno) => Err(ShmError::from_errno("shm_open", name, errno)),
    }
}

/// Set of segment names this process must unlink on shutdown
#[derive(Debug, Default)]
pub struct OwnedSegments {
    names: Mutex<BTreeSet<String>>,
}

impl OwnedSegments {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record ownership of a segment
    pub fn register(&self, name: &str) {
        if self.names.lock().insert(name.to_string()) {
            debug!("Registered {} as owned", name);
        }
    }

    /// Give up ownership without unlinking
    pub fn release(&self, name: &str) -> bool {
        self.names.lock().remove(name)
    }

    /// Whether the segment is registered
    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }

    /// Unlink every registered segment and clear the registry.
    ///
    /// Names that are already gone are skipped. Returns how many segments
    /// were unlinked, or the first failure after attempting all of them.
    pub fn shutdown(&self) -> ShmResult<usize> {
        let names = std::mem::take(&mut *self.names.lock());
        let mut removed = 0;
        let mut first_error = None;

        for name in names {
            match unlink(&name) {
                Ok(()) => removed += 1,
                Err(e) if e.is_not_found() => {
                    debug!("Owned segment {} already removed", name);
                }
                Err(e) => {
                    warn!("Failed to unlink owned segment {}: {}", name, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

static GLOBAL_OWNED: LazyLock<OwnedSegments> = LazyLock::new(OwnedSegments::new);

/// Process-wide owner registry
pub fn owned_segments() -> &'static OwnedSegments {
    &GLOBAL_OWNED
}

/// Unlink every segment registered in the process-wide registry.
pub fn shutdown_owned() -> ShmResult<usize> {
    let removed = GLOBAL_OWNED.shutdown()?;
    info!("Owner shutdown removed {} segment(s)", removed);
    Ok(removed)
}
