//! Slot layout placed at the start of every channel segment
//!
//! ```text
//! offset  0  sequence         u64  (odd = write in progress)
//! offset  8  magic            u64  ("SEQCHAN\0" once initialized)
//! offset 16  layout_hash      u32
//! offset 20  payload_size     u32
//! offset 24  writer_pid       u32
//! offset 28  reserved         u32
//! offset 32  created_ns       u64
//! offset 40  last_publish_ns  u64
//! offset 48  padding          [u8; 16]
//! offset 64  payload          T
//! ```

use crate::error::{ShmError, ShmResult};
use crate::platform::{get_current_pid, now_ns};
use crate::segment::MappedRegion;
use crate::sequence::SequenceCounter;
use seqchan_common::consts::{CACHE_LINE_SIZE, SLOT_MAGIC};
use static_assertions::const_assert_eq;
use std::marker::PhantomData;
use std::mem::{align_of, offset_of, size_of};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Fixed-width value that can travel through a slot.
///
/// # Safety
///
/// Every bit pattern of `size_of::<Self>()` bytes must be a valid `Self`, and
/// the type must not contain pointers. A reader may copy a half-written value
/// before the sequence check discards it.
pub unsafe trait SlotPayload: Copy + Send + Sync + 'static {}

macro_rules! impl_slot_payload {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: plain integer/float, all bit patterns valid.
            unsafe impl SlotPayload for $ty {}
        )*
    };
}

impl_slot_payload!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
);

// SAFETY: arrays of valid payloads are valid payloads.
unsafe impl<T: SlotPayload, const N: usize> SlotPayload for [T; N] {}

/// Slot header - 64 bytes, cache-line aligned.
#[repr(C, align(64))]
pub struct SlotHeader {
    /// Seqlock sequence, odd while a publish is in progress
    pub sequence: AtomicU64,
    /// `SLOT_MAGIC` once a writer has initialized the header
    pub magic: AtomicU64,
    /// Hash of the payload type's size and alignment
    pub layout_hash: AtomicU32,
    /// Payload size in bytes
    pub payload_size: AtomicU32,
    /// PID of the last writer to attach
    pub writer_pid: AtomicU32,
    _reserved: AtomicU32,
    /// Initialization time, ns since the Unix epoch
    pub created_ns: AtomicU64,
    /// Time of the last completed publish, ns since the Unix epoch
    pub last_publish_ns: AtomicU64,
    _padding: [u8; 16],
}

const_assert_eq!(size_of::<SlotHeader>(), CACHE_LINE_SIZE);
const_assert_eq!(align_of::<SlotHeader>(), CACHE_LINE_SIZE);
const_assert_eq!(offset_of!(SlotHeader, sequence), 0);
const_assert_eq!(offset_of!(SlotHeader, created_ns), 32);

impl SlotHeader {
    /// Borrow the header at the start of a mapped region.
    pub fn from_region(region: &MappedRegion) -> ShmResult<&SlotHeader> {
        if region.len() < size_of::<SlotHeader>() {
            return Err(ShmError::SizeMismatch {
                name: region.name().to_string(),
                expected: size_of::<SlotHeader>(),
                actual: region.len() as u64,
            });
        }
        // SAFETY: the region is at least one header long and cache-line
        // aligned (checked when mapped); all fields are atomics or inert
        // padding, so a shared reference is sound even while other
        // processes update them.
        Ok(unsafe { &*(region.as_ptr() as *const SlotHeader) })
    }

    /// Whether a writer has finished initializing the header
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == SLOT_MAGIC
    }

    /// Sequence counter view
    pub fn sequence_counter(&self) -> SequenceCounter<'_> {
        SequenceCounter::new(&self.sequence)
    }
}

/// Compile-time layout hash for payload compatibility detection.
///
/// Derived from `size_of::<T>()` and `align_of::<T>()`; two payload types
/// with the same size and alignment (e.g. `i32` and `u32`) share a hash.
pub const fn layout_hash<T>() -> u32 {
    let size = size_of::<T>() as u32;
    let align = align_of::<T>() as u32;
    size.wrapping_mul(0x9E3779B9) ^ align.wrapping_mul(0x517CC1B7)
}

/// Calculate cache line aligned size
pub const fn cache_aligned_size(size: usize) -> usize {
    (size + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
}

/// Layout of a slot carrying a `T`.
pub struct SlotLayout<T>(PhantomData<T>);

impl<T: SlotPayload> SlotLayout<T> {
    const ALIGN_OK: () = assert!(
        align_of::<T>() <= CACHE_LINE_SIZE,
        "slot payload alignment must not exceed the cache line"
    );

    /// Header size in bytes
    pub const HEADER_SIZE: usize = size_of::<SlotHeader>();
    /// Payload offset from the start of the segment
    pub const PAYLOAD_OFFSET: usize = Self::HEADER_SIZE;
    /// Payload size in bytes
    pub const PAYLOAD_SIZE: usize = size_of::<T>();
    /// Segment size needed for this slot
    pub const SEGMENT_SIZE: usize = cache_aligned_size(Self::PAYLOAD_OFFSET + Self::PAYLOAD_SIZE);

    /// Layout hash recorded in the header
    pub const fn layout_hash() -> u32 {
        layout_hash::<T>()
    }

    /// Overlay a read-only view of the slot on a mapped region.
    pub fn view(region: &MappedRegion) -> ShmResult<SlotView<'_, T>> {
        #[allow(clippy::let_unit_value)]
        let () = Self::ALIGN_OK;

        if region.len() < Self::SEGMENT_SIZE {
            return Err(ShmError::SizeMismatch {
                name: region.name().to_string(),
                expected: Self::SEGMENT_SIZE,
                actual: region.len() as u64,
            });
        }

        let header = SlotHeader::from_region(region)?;
        // SAFETY: in bounds (checked above) and aligned: the region is
        // cache-line aligned and T's alignment divides the offset.
        let payload = unsafe { region.as_ptr().add(Self::PAYLOAD_OFFSET) as *const T };

        Ok(SlotView {
            header,
            payload,
            _marker: PhantomData,
        })
    }

    /// Overlay a writable view of the slot. Fails with `ReadOnly` unless the
    /// region was mapped read-write.
    pub fn view_mut(region: &MappedRegion) -> ShmResult<SlotViewMut<'_, T>> {
        let base = region.as_mut_ptr()?;
        let view = Self::view(region)?;
        // SAFETY: same bounds and alignment as `view`, on a writable mapping.
        let payload = unsafe { base.add(Self::PAYLOAD_OFFSET) as *mut T };

        Ok(SlotViewMut { view, payload })
    }
}

/// Read-side view over the slot of a mapped region.
pub struct SlotView<'a, T> {
    header: &'a SlotHeader,
    payload: *const T,
    _marker: PhantomData<&'a T>,
}

impl<'a, T: SlotPayload> SlotView<'a, T> {
    /// Header of the slot
    pub fn header(&self) -> &'a SlotHeader {
        self.header
    }

    /// Current sequence
    pub fn sequence(&self) -> u64 {
        self.header.sequence_counter().load()
    }

    /// Whether a writer has initialized the header
    pub fn is_initialized(&self) -> bool {
        self.header.is_initialized()
    }

    /// Check that the header was initialized for this payload type.
    pub fn validate(&self, name: &str) -> ShmResult<()> {
        if !self.is_initialized() {
            return Err(ShmError::Uninitialized {
                name: name.to_string(),
            });
        }

        let found_size = self.header.payload_size.load(Ordering::Acquire);
        let found_hash = self.header.layout_hash.load(Ordering::Acquire);
        let expected_size = SlotLayout::<T>::PAYLOAD_SIZE as u32;
        let expected_hash = SlotLayout::<T>::layout_hash();

        if found_size != expected_size || found_hash != expected_hash {
            return Err(ShmError::LayoutMismatch {
                name: name.to_string(),
                expected_size,
                expected_hash,
                found_size,
                found_hash,
            });
        }
        Ok(())
    }

    /// Copy the payload out. The copy may be torn; callers must validate it
    /// against the sequence.
    pub fn read_payload(&self) -> T {
        // SAFETY: in bounds and aligned; every bit pattern is a valid T
        // (`SlotPayload` contract), so a torn copy is still a value.
        unsafe { std::ptr::read_volatile(self.payload) }
    }

    /// Sequence load that follows a payload copy
    pub fn sequence_after_read(&self) -> u64 {
        self.header.sequence_counter().load_after_read()
    }
}

/// Writer-side view: the read view plus the publish primitives.
pub struct SlotViewMut<'a, T> {
    view: SlotView<'a, T>,
    payload: *mut T,
}

impl<'a, T> Deref for SlotViewMut<'a, T> {
    type Target = SlotView<'a, T>;

    fn deref(&self) -> &Self::Target {
        &self.view
    }
}

impl<T: SlotPayload> SlotViewMut<'_, T> {
    /// Initialize a fresh header. Magic is stored last, with release ordering,
    /// so readers never see a half-initialized header as valid.
    pub fn initialize(&self) {
        let header = self.view.header;
        let now = now_ns();
        header.sequence_counter().reset(0);
        header
            .layout_hash
            .store(SlotLayout::<T>::layout_hash(), Ordering::Relaxed);
        header
            .payload_size
            .store(SlotLayout::<T>::PAYLOAD_SIZE as u32, Ordering::Relaxed);
        header.writer_pid.store(get_current_pid(), Ordering::Relaxed);
        header.created_ns.store(now, Ordering::Relaxed);
        header.last_publish_ns.store(0, Ordering::Relaxed);
        header.magic.store(SLOT_MAGIC, Ordering::Release);
    }

    /// Mark a write in progress; returns the odd sequence.
    pub fn begin_write(&self) -> u64 {
        self.view.header.sequence_counter().begin_write()
    }

    /// Store the payload. Only valid between `begin_write` and `end_write`.
    pub fn write_payload(&self, value: &T) {
        // SAFETY: `payload` is in bounds and aligned (see `SlotLayout::view`)
        // on a writable mapping. Concurrent readers detect overlap through
        // the sequence.
        unsafe { std::ptr::write_volatile(self.payload, *value) }
    }

    /// Mark the write complete; returns the even sequence.
    pub fn end_write(&self, odd: u64) -> u64 {
        let header = self.view.header;
        let even = header.sequence_counter().end_write(odd);
        header.last_publish_ns.store(now_ns(), Ordering::Relaxed);
        even
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::unlink;
    use crate::segment::{Permissions, SegmentHandle};

    #[test]
    fn test_layout_sizes() {
        assert_eq!(SlotLayout::<i32>::PAYLOAD_OFFSET, 64);
        assert_eq!(SlotLayout::<i32>::SEGMENT_SIZE, 128);
        assert_eq!(SlotLayout::<[u8; 64]>::SEGMENT_SIZE, 128);
        assert_eq!(SlotLayout::<[u8; 65]>::SEGMENT_SIZE, 192);
    }

    #[test]
    fn test_layout_hash() {
        assert_eq!(layout_hash::<i32>(), layout_hash::<u32>());
        assert_ne!(layout_hash::<i32>(), layout_hash::<i64>());
        assert_ne!(layout_hash::<[u8; 8]>(), layout_hash::<u64>());
    }

    #[test]
    fn test_initialize_and_publish_cycle() {
        let name = format!("/seqchan_slot_cycle_{}", std::process::id());
        let handle =
            SegmentHandle::create_or_open(&name, SlotLayout::<i32>::SEGMENT_SIZE, Permissions::default())
                .unwrap();
        let region = handle.map().unwrap();
        let slot = SlotLayout::<i32>::view_mut(&region).unwrap();

        assert!(matches!(
            slot.validate(&name),
            Err(ShmError::Uninitialized { .. })
        ));

        slot.initialize();
        slot.validate(&name).unwrap();
        assert_eq!(slot.sequence(), 0);
        assert_eq!(slot.header().writer_pid.load(Ordering::Relaxed), get_current_pid());

        let odd = slot.begin_write();
        assert_eq!(odd, 1);
        slot.write_payload(&-7);
        assert_eq!(slot.end_write(odd), 2);
        assert_eq!(slot.read_payload(), -7);
        assert_eq!(slot.sequence_after_read(), 2);
        assert!(slot.header().last_publish_ns.load(Ordering::Relaxed) > 0);

        let wrong = SlotLayout::<u64>::view(&region).unwrap();
        assert!(matches!(
            wrong.validate(&name),
            Err(ShmError::LayoutMismatch {
                expected_size: 8,
                found_size: 4,
                ..
            })
        ));

        unlink(&name).unwrap();
    }

    #[test]
    fn test_view_rejects_short_region() {
        let name = format!("/seqchan_slot_short_{}", std::process::id());
        let handle = SegmentHandle::create_or_open(&name, 64, Permissions::default()).unwrap();
        let region = handle.map().unwrap();

        assert!(matches!(
            SlotLayout::<i32>::view(&region),
            Err(ShmError::SizeMismatch { expected: 128, .. })
        ));
        assert!(SlotHeader::from_region(&region).is_ok());

        unlink(&name).unwrap();
    }

    #[test]
    fn test_read_only_region_has_no_writable_view() {
        let name = format!("/seqchan_slot_readonly_{}", std::process::id());
        let handle =
            SegmentHandle::create_or_open(&name, SlotLayout::<i32>::SEGMENT_SIZE, Permissions::default())
                .unwrap();
        let writable = handle.map().unwrap();
        let writer = SlotLayout::<i32>::view_mut(&writable).unwrap();
        writer.initialize();
        let odd = writer.begin_write();
        writer.write_payload(&42);
        writer.end_write(odd);

        let reader_handle = SegmentHandle::open_read_only(&name).unwrap();
        let region = reader_handle.map().unwrap();
        assert!(matches!(
            SlotLayout::<i32>::view_mut(&region),
            Err(ShmError::ReadOnly { .. })
        ));

        let slot = SlotLayout::<i32>::view(&region).unwrap();
        slot.validate(&name).unwrap();
        assert_eq!(slot.sequence(), 2);
        assert_eq!(slot.read_payload(), 42);

        unlink(&name).unwrap();
    }
}
