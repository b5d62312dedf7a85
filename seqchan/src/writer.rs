//! Single writer implementation with exclusive publish rights

use crate::error::{ShmError, ShmResult};
use crate::lifecycle::{Role, owned_segments};
use crate::platform::get_current_pid;
use crate::segment::{MappedRegion, OpenMode, Permissions, SegmentHandle, validate_segment_name};
use crate::sequence::is_writing;
use crate::slot::{SlotLayout, SlotPayload, SlotViewMut};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Writer options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterOptions {
    /// How the segment is opened on attach
    pub mode: OpenMode,
    /// Permission bits used if the segment is created
    pub permissions: Permissions,
    /// Owners register the segment for `shutdown_owned`
    pub role: Role,
}

/// Writer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Constructed, nothing mapped yet
    Unattached,
    /// Segment mapped; `publish` allowed
    Attached,
    /// Terminal
    Closed,
}

enum Attachment {
    Unattached,
    Attached {
        handle: SegmentHandle,
        region: MappedRegion,
    },
    Closed,
}

/// Producer side of a channel.
///
/// At most one writer may publish to a segment at a time. Concurrent writers
/// are not detected.
pub struct Writer<T: SlotPayload = i32> {
    name: String,
    options: WriterOptions,
    attachment: Attachment,
    last_sequence: u64,
    writer_pid: u32,
    _marker: PhantomData<T>,
}

impl<T: SlotPayload> Writer<T> {
    /// Create an unattached writer for `name`.
    pub fn new(name: &str, options: WriterOptions) -> ShmResult<Self> {
        validate_segment_name(name)?;

        Ok(Self {
            name: name.to_string(),
            options,
            attachment: Attachment::Unattached,
            last_sequence: 0,
            writer_pid: get_current_pid(),
            _marker: PhantomData,
        })
    }

    /// Create and attach in one step.
    pub fn create(name: &str, options: WriterOptions) -> ShmResult<Self> {
        let mut writer = Self::new(name, options)?;
        writer.attach()?;
        Ok(writer)
    }

    /// Open (or create) and map the segment, then initialize or adopt its slot.
    ///
    /// No-op when already attached; fails once closed.
    pub fn attach(&mut self) -> ShmResult<()> {
        match self.attachment {
            Attachment::Attached { .. } => return Ok(()),
            Attachment::Closed => {
                return Err(ShmError::Closed {
                    name: self.name.clone(),
                });
            }
            Attachment::Unattached => {}
        }

        let handle = SegmentHandle::open_with(
            &self.name,
            self.options.mode,
            SlotLayout::<T>::SEGMENT_SIZE,
            self.options.permissions,
        )?;
        let region = handle.map()?;

        {
            let slot = SlotLayout::<T>::view_mut(&region)?;
            if slot.is_initialized() {
                slot.validate(&self.name)?;
                let sequence = slot.sequence();
                if is_writing(sequence) {
                    warn!(
                        "Segment {} left mid-publish at sequence {}; next publish skips ahead",
                        self.name, sequence
                    );
                }
                debug!("Adopted segment {} at sequence {}", self.name, sequence);
            } else {
                slot.initialize();
                debug!("Initialized slot in segment {}", self.name);
            }

            slot.header()
                .writer_pid
                .store(self.writer_pid, Ordering::Release);
            self.last_sequence = slot.sequence();
        }

        if self.options.role == Role::Owner {
            owned_segments().register(&self.name);
        }

        info!(
            "Writer attached to {} (pid {}, {} byte payload)",
            self.name,
            self.writer_pid,
            SlotLayout::<T>::PAYLOAD_SIZE
        );

        self.attachment = Attachment::Attached { handle, region };
        Ok(())
    }

    /// Publish a value, replacing the previous one.
    ///
    /// Moves the sequence to the next odd value, stores the payload, then
    /// moves it to the following even value. Returns that even sequence.
    pub fn publish(&mut self, value: T) -> ShmResult<u64> {
        let slot = self.slot()?;

        let odd = slot.begin_write();
        slot.write_payload(&value);
        let even = slot.end_write(odd);

        self.last_sequence = even;
        Ok(even)
    }

    /// Unmap and release the handle. Idempotent; never unlinks.
    pub fn close(&mut self) {
        if let Attachment::Attached { mut handle, region } =
            std::mem::replace(&mut self.attachment, Attachment::Closed)
        {
            region.unmap();
            handle.close();
            info!("Writer closed {}", self.name);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WriterState {
        match self.attachment {
            Attachment::Unattached => WriterState::Unattached,
            Attachment::Attached { .. } => WriterState::Attached,
            Attachment::Closed => WriterState::Closed,
        }
    }

    /// Sequence after the last publish (or at attach)
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Get writer process ID
    pub fn writer_pid(&self) -> u32 {
        self.writer_pid
    }

    /// Get segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Teardown role
    pub fn role(&self) -> Role {
        self.options.role
    }

    /// Whether attaching created the segment
    pub fn created_segment(&self) -> bool {
        match &self.attachment {
            Attachment::Attached { handle, .. } => handle.was_created(),
            _ => false,
        }
    }

    fn slot(&self) -> ShmResult<SlotViewMut<'_, T>> {
        match &self.attachment {
            Attachment::Attached { region, .. } => SlotLayout::<T>::view_mut(region),
            Attachment::Unattached => Err(ShmError::NotAttached {
                name: self.name.clone(),
            }),
            Attachment::Closed => Err(ShmError::Closed {
                name: self.name.clone(),
            }),
        }
    }
}
