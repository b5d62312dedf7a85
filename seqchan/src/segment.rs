//! Named shared memory segments and their process-local mappings

use crate::error::{ShmError, ShmResult};
use crate::platform;
use bitflags::bitflags;
use memmap2::{Mmap, MmapMut};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use seqchan_common::channel::check_segment_name;
use seqchan_common::consts::{CACHE_LINE_SIZE, DEFAULT_PERMISSIONS};
use std::fs::File;
use std::ptr::NonNull;
use tracing::{debug, info};

bitflags! {
    /// POSIX permission bits applied to a created segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        /// Owner may read
        const OWNER_READ = 0o400;
        /// Owner may write
        const OWNER_WRITE = 0o200;
        /// Group may read
        const GROUP_READ = 0o040;
        /// Group may write
        const GROUP_WRITE = 0o020;
        /// Others may read
        const OTHER_READ = 0o004;
        /// Others may write
        const OTHER_WRITE = 0o002;
        /// Owner read/write only
        const OWNER_RW = Self::OWNER_READ.bits() | Self::OWNER_WRITE.bits();
    }
}

impl Permissions {
    /// Build from raw mode bits, dropping anything that is not a rw bit.
    pub fn from_mode(mode: u32) -> Self {
        Self::from_bits_truncate(mode)
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::from_mode(DEFAULT_PERMISSIONS)
    }
}

/// How `SegmentHandle::open_with` treats an existing or missing name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Create the segment if absent, otherwise open it
    #[default]
    CreateOrOpen,
    /// Create the segment; fail if the name is taken
    CreateExclusive,
    /// Open only; fail with `NotFound` if absent
    OpenExisting,
    /// Open only, for reading; needs read permission alone
    OpenReadOnly,
}

impl OpenMode {
    fn opens_only(self) -> bool {
        matches!(self, Self::OpenExisting | Self::OpenReadOnly)
    }
}

/// Validate a segment name before any syscall sees it
pub fn validate_segment_name(name: &str) -> ShmResult<()> {
    check_segment_name(name).map_err(|reason| ShmError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Validate a requested segment size
pub fn validate_segment_size(size: usize) -> ShmResult<()> {
    if size == 0 || size > isize::MAX as usize {
        return Err(ShmError::InvalidSize { size });
    }
    Ok(())
}

/// Validate memory alignment
pub fn validate_memory_alignment(address: usize) -> ShmResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(ShmError::AlignmentError {
            address,
            alignment: CACHE_LINE_SIZE,
        });
    }
    Ok(())
}

/// Open handle on a named shared-memory object.
///
/// The handle owns the file descriptor only. Mapping produces an independent
/// [`MappedRegion`] that stays valid after the handle is closed.
#[derive(Debug)]
pub struct SegmentHandle {
    name: String,
    size: usize,
    created: bool,
    writable: bool,
    file: Option<File>,
}

impl SegmentHandle {
    /// Create the named segment if absent, otherwise open it.
    ///
    /// A freshly created object is sized to `size`. An existing object must
    /// already be exactly `size` bytes (or still unsized); anything else is a
    /// `SizeMismatch`.
    pub fn create_or_open(name: &str, size: usize, permissions: Permissions) -> ShmResult<Self> {
        Self::open_with(name, OpenMode::CreateOrOpen, size, permissions)
    }

    /// Create the named segment, failing with `AlreadyExists` if it is taken.
    pub fn create_exclusive(name: &str, size: usize, permissions: Permissions) -> ShmResult<Self> {
        Self::open_with(name, OpenMode::CreateExclusive, size, permissions)
    }

    /// Open an existing segment; its size is read from the object.
    pub fn open_existing(name: &str) -> ShmResult<Self> {
        Self::open_with(name, OpenMode::OpenExisting, 0, Permissions::empty())
    }

    /// Open an existing segment read-only. Its mappings cannot be written.
    pub fn open_read_only(name: &str) -> ShmResult<Self> {
        Self::open_with(name, OpenMode::OpenReadOnly, 0, Permissions::empty())
    }

    /// Open according to `mode`. `size` and `permissions` are ignored for
    /// the open-only modes.
    ///
    /// If sizing an object this call created fails, the name is removed again.
    pub fn open_with(
        name: &str,
        mode: OpenMode,
        size: usize,
        permissions: Permissions,
    ) -> ShmResult<Self> {
        validate_segment_name(name)?;
        if !mode.opens_only() {
            validate_segment_size(size)?;
        }

        let (file, newly_created) = Self::open_file(name, mode, permissions)?;

        let actual = file
            .metadata()
            .map_err(|e| ShmError::resource("fstat", name, e))?
            .len();

        let (size, created) = match mode {
            OpenMode::OpenExisting | OpenMode::OpenReadOnly => (actual as usize, false),
            _ if actual == 0 => {
                if let Err(e) = Self::size_new_object(&file, size, permissions, newly_created) {
                    if newly_created {
                        let _ = platform::shm_remove(name);
                    }
                    return Err(ShmError::resource("ftruncate", name, e));
                }
                info!("Created segment {} ({} bytes)", name, size);
                (size, true)
            }
            _ if actual == size as u64 => (size, false),
            _ => {
                return Err(ShmError::SizeMismatch {
                    name: name.to_string(),
                    expected: size,
                    actual,
                });
            }
        };

        debug!("Opened segment {} ({} bytes, mode {:?})", name, size, mode);

        Ok(Self {
            name: name.to_string(),
            size,
            created,
            writable: mode != OpenMode::OpenReadOnly,
            file: Some(file),
        })
    }

    /// `shm_open` per `mode`; also reports whether this call created the name.
    fn open_file(name: &str, mode: OpenMode, permissions: Permissions) -> ShmResult<(File, bool)> {
        let open = |flags: OFlag| platform::shm_open_file(name, flags, permissions);
        let fail = |errno: Errno| ShmError::from_errno("shm_open", name, errno);
        let exclusive = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR;

        match mode {
            OpenMode::CreateExclusive => open(exclusive).map(|file| (file, true)).map_err(fail),
            OpenMode::OpenExisting => open(OFlag::O_RDWR).map(|file| (file, false)).map_err(fail),
            OpenMode::OpenReadOnly => open(OFlag::O_RDONLY).map(|file| (file, false)).map_err(fail),
            OpenMode::CreateOrOpen => loop {
                match open(exclusive) {
                    Ok(file) => return Ok((file, true)),
                    Err(Errno::EEXIST) => {}
                    Err(errno) => return Err(fail(errno)),
                }
                match open(OFlag::O_RDWR) {
                    Ok(file) => return Ok((file, false)),
                    // Unlinked between the two opens; try creating again.
                    Err(Errno::ENOENT) => continue,
                    Err(errno) => return Err(fail(errno)),
                }
            },
        }
    }

    fn size_new_object(
        file: &File,
        size: usize,
        permissions: Permissions,
        newly_created: bool,
    ) -> std::io::Result<()> {
        if newly_created {
            platform::apply_permissions(file, permissions)?;
        }
        file.set_len(size as u64)
    }

    /// Map the whole segment into this process.
    ///
    /// Handles opened with `OpenReadOnly` produce a read-only mapping.
    pub fn map(&self) -> ShmResult<MappedRegion> {
        let file = self.file.as_ref().ok_or_else(|| ShmError::Closed {
            name: self.name.clone(),
        })?;

        if self.size == 0 {
            return Err(ShmError::Uninitialized {
                name: self.name.clone(),
            });
        }

        let mapping = if self.writable {
            platform::map_shared(file, self.size).map(Mapping::ReadWrite)
        } else {
            platform::map_shared_read_only(file, self.size).map(Mapping::ReadOnly)
        }
        .map_err(|e| ShmError::resource("mmap", &self.name, e))?;

        MappedRegion::new(self.name.clone(), mapping)
    }

    /// Release the descriptor. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed handle for segment {}", self.name);
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segment size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this handle created (and sized) the object
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Whether mappings from this handle are writable
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn len(&self) -> usize {
        match self {
            Self::ReadWrite(mmap) => mmap.len(),
            Self::ReadOnly(mmap) => mmap.len(),
        }
    }

    fn base(&mut self) -> *mut u8 {
        match self {
            Self::ReadWrite(mmap) => mmap.as_mut_ptr(),
            Self::ReadOnly(mmap) => mmap.as_ptr() as *mut u8,
        }
    }
}

/// Process-local mapping of a segment.
///
/// Unmapped on [`MappedRegion::unmap`] or drop. Mappings in other processes
/// are unaffected.
pub struct MappedRegion {
    name: String,
    base: NonNull<u8>,
    mapping: Mapping,
}

// SAFETY: `base` points into `mapping`, which is owned by the region. All
// shared access to the bytes goes through atomics or the seqlock protocol.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    fn new(name: String, mut mapping: Mapping) -> ShmResult<Self> {
        let base = NonNull::new(mapping.base()).ok_or_else(|| ShmError::Uninitialized {
            name: name.clone(),
        })?;
        validate_memory_alignment(base.as_ptr() as usize)?;

        Ok(Self {
            name,
            base,
            mapping,
        })
    }

    /// Segment name this region maps
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// True for a zero-length mapping
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pages may be written through this mapping
    pub fn is_writable(&self) -> bool {
        matches!(self.mapping, Mapping::ReadWrite(_))
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    /// Writable base address; fails with `ReadOnly` on a read-only mapping.
    pub fn as_mut_ptr(&self) -> ShmResult<*mut u8> {
        if !self.is_writable() {
            return Err(ShmError::ReadOnly {
                name: self.name.clone(),
            });
        }
        Ok(self.base.as_ptr())
    }

    /// Explicitly unmap.
    pub fn unmap(self) {
        debug!("Unmapped segment {} ({} bytes)", self.name, self.len());
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("len", &self.len())
            .field("writable", &self.is_writable())
            .finish()
    }
}
