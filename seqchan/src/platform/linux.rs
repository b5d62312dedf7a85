//! Linux-specific shared memory operations

use crate::segment::Permissions;
use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::getpid;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::time::{SystemTime, UNIX_EPOCH};

/// `shm_open` the named object and hand it back as a `File`.
pub fn shm_open_file(name: &str, flags: OFlag, permissions: Permissions) -> nix::Result<File> {
    let mode = Mode::from_bits_truncate(permissions.bits() as _);
    let fd = shm_open(name, flags, mode)?;
    Ok(File::from(fd))
}

/// Re-apply permission bits, since `shm_open` masks them with the umask.
pub fn apply_permissions(file: &File, permissions: Permissions) -> std::io::Result<()> {
    file.set_permissions(std::fs::Permissions::from_mode(permissions.bits()))
}

/// Remove the name from the shared-memory namespace.
pub fn shm_remove(name: &str) -> nix::Result<()> {
    shm_unlink(name)
}

/// Map `len` bytes of the object read-write and shared, pre-faulting the pages.
pub fn map_shared(file: &File, len: usize) -> std::io::Result<MmapMut> {
    // SAFETY: the mapping is shared with other processes; every
    // access to it goes through atomics or the seqlock protocol in `slot`.
    unsafe { MmapOptions::new().len(len).populate().map_mut(file) }
}

/// Map `len` bytes of an `O_RDONLY` object, shared and read-only.
pub fn map_shared_read_only(file: &File, len: usize) -> std::io::Result<Mmap> {
    // SAFETY: as for `map_shared`; the pages are never written through
    // this mapping.
    unsafe { MmapOptions::new().len(len).populate().map(file) }
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 {
        return false;
    }

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::ESRCH) => false,
        // Exists, but owned by someone else.
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}

/// Wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
