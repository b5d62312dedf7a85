//! Platform layer: POSIX shared-memory syscalls and mapping.

mod linux;

pub use linux::*;
