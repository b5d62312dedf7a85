//! Segment discovery and metadata inspection

use crate::error::{ShmError, ShmResult};
use crate::platform::is_process_alive;
use crate::segment::SegmentHandle;
use crate::sequence::is_writing;
use crate::slot::SlotHeader;
use seqchan_common::consts::{SHM_DIR, SLOT_MAGIC};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

/// Snapshot of a channel segment's header
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment name, with leading '/'
    pub name: String,
    /// Total mapped size in bytes
    pub total_size: usize,
    /// Payload size recorded by the writer
    pub payload_size: u32,
    /// Payload layout hash recorded by the writer
    pub layout_hash: u32,
    /// Sequence at the time of inspection
    pub sequence: u64,
    /// Whether a publish was in progress
    pub write_in_progress: bool,
    /// PID of the last writer to attach
    pub writer_pid: u32,
    /// Whether that writer process is still running
    pub writer_alive: bool,
    /// Initialization time, ns since the Unix epoch
    pub created_ns: u64,
    /// Last completed publish, ns since the Unix epoch (0 if never)
    pub last_publish_ns: u64,
}

impl SegmentInfo {
    /// Number of completed publishes implied by the sequence
    pub fn publish_count(&self) -> u64 {
        self.sequence / 2
    }
}

/// Read the header of a named channel segment without attaching a reader.
///
/// Works for any payload type. Fails with `Uninitialized` if the segment
/// does not carry an initialized slot header. Only read permission on the
/// segment is needed.
pub fn inspect(name: &str) -> ShmResult<SegmentInfo> {
    let handle = SegmentHandle::open_read_only(name)?;
    let region = handle.map()?;
    let header = SlotHeader::from_region(&region)?;

    if !header.is_initialized() {
        return Err(ShmError::Uninitialized {
            name: name.to_string(),
        });
    }

    let sequence = header.sequence_counter().load();
    let writer_pid = header.writer_pid.load(Ordering::Acquire);

    Ok(SegmentInfo {
        name: name.to_string(),
        total_size: region.len(),
        payload_size: header.payload_size.load(Ordering::Acquire),
        layout_hash: header.layout_hash.load(Ordering::Acquire),
        sequence,
        write_in_progress: is_writing(sequence),
        writer_pid,
        writer_alive: is_process_alive(writer_pid),
        created_ns: header.created_ns.load(Ordering::Acquire),
        last_publish_ns: header.last_publish_ns.load(Ordering::Acquire),
    })
}

/// List channel segments by scanning the shared memory directory.
///
/// Objects that are too small, not readable, or not initialized channel
/// slots are skipped. Results are sorted by name.
pub fn list_segments() -> ShmResult<Vec<SegmentInfo>> {
    list_segments_in(Path::new(SHM_DIR))
}

fn list_segments_in(dir: &Path) -> ShmResult<Vec<SegmentInfo>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        debug!("{} does not exist; no segments to list", dir.display());
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)?.flatten() {
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if !looks_like_channel(&entry.path()) {
            continue;
        }

        let name = format!("/{}", file_name);
        match inspect(&name) {
            Ok(info) => segments.push(info),
            Err(e) => trace!("Skipping {}: {}", name, e),
        }
    }

    segments.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(segments)
}

/// Cheap pre-check on the raw file before mapping it.
fn looks_like_channel(path: &Path) -> bool {
    use std::io::Read;

    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let Ok(metadata) = file.metadata() else {
        return false;
    };
    if !metadata.is_file() || metadata.len() < size_of::<SlotHeader>() as u64 {
        return false;
    }

    let mut prefix = [0u8; 16];
    if file.read_exact(&mut prefix).is_err() {
        return false;
    }
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&prefix[8..16]);
    u64::from_ne_bytes(magic) == SLOT_MAGIC
}
