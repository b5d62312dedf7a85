//! Lock-free reader implementation

use crate::cancel::CancelToken;
use crate::error::{ShmError, ShmResult};
use crate::segment::{MappedRegion, SegmentHandle};
use crate::sequence::{is_stable, is_writing};
use crate::slot::{SlotLayout, SlotPayload, SlotView};
use seqchan_common::consts::DEFAULT_RETRY_CEILING;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Attempts before an observation fails with `StaleRead`
    pub retry_ceiling: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            retry_ceiling: DEFAULT_RETRY_CEILING,
        }
    }
}

/// Outcome of a single non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation<T> {
    /// A consistent value and the sequence it was published at
    Value {
        /// Published value
        value: T,
        /// Even sequence of the publish
        sequence: u64,
    },
    /// A publish is in progress
    Pending,
    /// Nothing has been published yet
    Unpublished,
}

impl<T> Observation<T> {
    /// The value, if one was observed
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value { value, .. } => Some(value),
            Self::Pending | Self::Unpublished => None,
        }
    }
}

/// Consumer side of a channel.
///
/// Readers never write to the slot. Each thread or process that wants to
/// observe opens its own reader.
pub struct Reader<T: SlotPayload = i32> {
    name: String,
    handle: SegmentHandle,
    region: MappedRegion,
    options: ReaderOptions,
    last_sequence: u64,
    stalled_sequence: Option<u64>,
    stalled_polls: u32,
    #[cfg(test)]
    copy_hook: Option<Box<dyn FnMut() + Send>>,
    _marker: PhantomData<T>,
}

impl<T: SlotPayload> Reader<T> {
    /// Attach to an existing, writer-initialized segment.
    ///
    /// The segment is opened and mapped read-only, so read permission on the
    /// object is enough.
    ///
    /// Fails with `NotFound` if the name does not exist, `Uninitialized` if no
    /// writer has set up the slot yet, and `LayoutMismatch` if the segment
    /// carries a different payload type.
    pub fn open(name: &str, options: ReaderOptions) -> ShmResult<Self> {
        let handle = SegmentHandle::open_read_only(name)?;
        let region = handle.map()?;
        SlotLayout::<T>::view(&region)?.validate(name)?;

        debug!("Reader attached to {} ({} bytes)", name, region.len());

        Ok(Self {
            name: name.to_string(),
            handle,
            region,
            options,
            last_sequence: 0,
            stalled_sequence: None,
            stalled_polls: 0,
            #[cfg(test)]
            copy_hook: None,
            _marker: PhantomData,
        })
    }

    /// Non-blocking read with a detailed outcome.
    ///
    /// A sequence that changes during the copy restarts the read, at most
    /// `retry_ceiling` times. The same odd sequence seen on more than
    /// `retry_ceiling` consecutive calls is reported as `StaleRead`.
    pub fn try_read(&mut self) -> ShmResult<Observation<T>> {
        let ceiling = self.options.retry_ceiling.max(1);

        for attempt in 1..=ceiling {
            let (before, value, after) = {
                let slot = SlotLayout::<T>::view(&self.region)?;
                let before = slot.sequence();
                if is_writing(before) {
                    return self.note_pending(before);
                }
                if before == 0 {
                    self.clear_stall();
                    return Ok(Observation::Unpublished);
                }
                let value = slot.read_payload();
                #[cfg(test)]
                if let Some(hook) = self.copy_hook.as_mut() {
                    hook();
                }
                (before, value, slot.sequence_after_read())
            };

            if before == after {
                self.clear_stall();
                self.last_sequence = after;
                return Ok(Observation::Value {
                    value,
                    sequence: after,
                });
            }

            trace!(
                "Sequence moved {} -> {} during read of {} (attempt {})",
                before, after, self.name, attempt
            );
            std::hint::spin_loop();
        }

        warn!(
            "Read of {} kept racing the writer for {} attempts",
            self.name, ceiling
        );
        Err(ShmError::StaleRead { attempts: ceiling })
    }

    /// Non-blocking read: `Some(value)` or `None` while pending/unpublished.
    pub fn try_observe(&mut self) -> ShmResult<Option<T>> {
        self.try_read().map(Observation::value)
    }

    /// Poll until a value is available or `cancel` fires.
    ///
    /// Returns `Ok(None)` on cancellation. Errors from `try_observe`,
    /// including `StaleRead`, are returned as-is.
    pub fn observe_blocking(
        &mut self,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> ShmResult<Option<T>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(value) = self.try_observe()? {
                return Ok(Some(value));
            }
            if cancel.sleep(poll_interval) {
                return Ok(None);
            }
        }
    }

    /// Poll until a value newer than the last one returned is available.
    pub fn observe_next_blocking(
        &mut self,
        poll_interval: Duration,
        cancel: &CancelToken,
    ) -> ShmResult<Option<T>> {
        let seen = self.last_sequence;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Observation::Value { value, sequence } = self.try_read()? {
                if sequence != seen {
                    return Ok(Some(value));
                }
            }
            if cancel.sleep(poll_interval) {
                return Ok(None);
            }
        }
    }

    /// Check if a newer publish completed since the last successful read
    pub fn has_changed(&self) -> bool {
        match self.slot() {
            Ok(slot) => {
                let current = slot.sequence();
                current != 0 && is_stable(current) && current != self.last_sequence
            }
            Err(_) => false,
        }
    }

    /// Sequence of the last value returned
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Get segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped segment size
    pub fn segment_size(&self) -> usize {
        self.handle.size()
    }

    /// Unmap and release the handle. Never unlinks.
    pub fn close(self) {
        let Self {
            name,
            mut handle,
            region,
            ..
        } = self;
        region.unmap();
        handle.close();
        debug!("Reader closed {}", name);
    }

    fn slot(&self) -> ShmResult<SlotView<'_, T>> {
        SlotLayout::<T>::view(&self.region)
    }

    fn note_pending(&mut self, sequence: u64) -> ShmResult<Observation<T>> {
        if self.stalled_sequence == Some(sequence) {
            self.stalled_polls = self.stalled_polls.saturating_add(1);
        } else {
            self.stalled_sequence = Some(sequence);
            self.stalled_polls = 1;
        }

        let ceiling = self.options.retry_ceiling.max(1);
        if self.stalled_polls > ceiling {
            let attempts = self.stalled_polls;
            self.clear_stall();
            warn!(
                "Writer of {} stuck mid-publish at sequence {} for {} polls",
                self.name, sequence, attempts
            );
            return Err(ShmError::StaleRead { attempts });
        }

        Ok(Observation::Pending)
    }

    fn clear_stall(&mut self) {
        self.stalled_sequence = None;
        self.stalled_polls = 0;
    }

    /// Run `hook` between the payload copy and the sequence re-check.
    #[cfg(test)]
    fn set_copy_hook(&mut self, hook: impl FnMut() + Send + 'static) {
        self.copy_hook = Some(Box::new(hook));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::unlink;
    use crate::writer::{Writer, WriterOptions};

    fn test_name(tag: &str) -> String {
        format!("/seqchan_reader_{}_{}", tag, std::process::id())
    }

    #[test]
    fn test_unpublished_then_value() {
        let name = test_name("unpublished");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        let mut reader = Reader::<i32>::open(&name, ReaderOptions::default()).unwrap();

        assert_eq!(reader.try_read().unwrap(), Observation::Unpublished);
        assert!(!reader.has_changed());

        writer.publish(5).unwrap();
        assert!(reader.has_changed());
        assert_eq!(
            reader.try_read().unwrap(),
            Observation::Value {
                value: 5,
                sequence: 2
            }
        );
        assert!(!reader.has_changed());
        assert_eq!(reader.last_sequence(), 2);

        unlink(&name).unwrap();
    }

    #[test]
    fn test_nonexistent_segment() {
        let reader = Reader::<i32>::open(&test_name("nonexistent"), ReaderOptions::default());
        assert!(matches!(reader, Err(ShmError::NotFound { .. })));
    }

    #[test]
    fn test_uninitialized_segment() {
        let name = test_name("uninit");
        let _handle = SegmentHandle::create_or_open(
            &name,
            SlotLayout::<i32>::SEGMENT_SIZE,
            Default::default(),
        )
        .unwrap();

        assert!(matches!(
            Reader::<i32>::open(&name, ReaderOptions::default()),
            Err(ShmError::Uninitialized { .. })
        ));

        unlink(&name).unwrap();
    }

    #[test]
    fn test_pending_until_ceiling() {
        let name = test_name("stalled");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        writer.publish(1).unwrap();

        // Simulate a writer paused mid-publish.
        let handle = SegmentHandle::open_existing(&name).unwrap();
        let region = handle.map().unwrap();
        let slot = SlotLayout::<i32>::view_mut(&region).unwrap();
        let odd = slot.begin_write();

        let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 3 }).unwrap();
        for _ in 0..3 {
            assert_eq!(reader.try_read().unwrap(), Observation::Pending);
        }
        assert!(matches!(
            reader.try_observe(),
            Err(ShmError::StaleRead { attempts: 4 })
        ));

        // Counter resets; the writer finishing clears the stall.
        assert_eq!(reader.try_observe().unwrap(), None);
        slot.write_payload(&2);
        slot.end_write(odd);
        assert_eq!(reader.try_observe().unwrap(), Some(2));

        unlink(&name).unwrap();
    }

    #[test]
    fn test_observe_blocking_cancelled() {
        let name = test_name("cancelled");
        let _writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        let mut reader = Reader::<i32>::open(&name, ReaderOptions::default()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            reader
                .observe_blocking(Duration::from_millis(1), &cancel)
                .unwrap(),
            None
        );

        unlink(&name).unwrap();
    }

    #[test]
    fn test_observe_next_waits_for_new_publish() {
        let name = test_name("next");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        let mut reader = Reader::<i32>::open(&name, ReaderOptions::default()).unwrap();
        writer.publish(1).unwrap();
        assert_eq!(reader.try_observe().unwrap(), Some(1));

        let publisher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.publish(2).unwrap();
            writer
        });

        let cancel = CancelToken::new();
        let next = reader
            .observe_next_blocking(Duration::from_millis(1), &cancel)
            .unwrap();
        assert_eq!(next, Some(2));

        drop(publisher.join().unwrap());
        unlink(&name).unwrap();
    }

    /// Writable mapping of `name` that completes one publish per call.
    fn racing_publisher(name: &str) -> impl FnMut(i32) + Send + 'static {
        let region = SegmentHandle::open_existing(name).unwrap().map().unwrap();
        move |value| {
            let slot = SlotLayout::<i32>::view_mut(&region).unwrap();
            let odd = slot.begin_write();
            slot.write_payload(&value);
            slot.end_write(odd);
        }
    }

    #[test]
    fn test_sequence_change_during_copy_exhausts_ceiling() {
        let name = test_name("racing");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        writer.publish(1).unwrap();

        let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 3 }).unwrap();
        let mut publish = racing_publisher(&name);
        let mut next = 100;
        reader.set_copy_hook(move || {
            publish(next);
            next += 1;
        });

        assert!(matches!(
            reader.try_read(),
            Err(ShmError::StaleRead { attempts: 3 })
        ));
        assert_eq!(reader.last_sequence(), 0);

        // Ceiling of one: a single racing publish is enough.
        let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 1 }).unwrap();
        let mut publish = racing_publisher(&name);
        reader.set_copy_hook(move || publish(7));
        assert!(matches!(
            reader.try_read(),
            Err(ShmError::StaleRead { attempts: 1 })
        ));

        unlink(&name).unwrap();
    }

    #[test]
    fn test_sequence_change_during_copy_retries_within_call() {
        let name = test_name("retry");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        writer.publish(1).unwrap();

        let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 3 }).unwrap();
        let mut publish = racing_publisher(&name);
        let mut raced = false;
        reader.set_copy_hook(move || {
            if !raced {
                publish(2);
                raced = true;
            }
        });

        // First copy sees 1 and is discarded; the retry returns the new value.
        assert_eq!(
            reader.try_read().unwrap(),
            Observation::Value {
                value: 2,
                sequence: 4
            }
        );
        assert_eq!(reader.last_sequence(), 4);

        unlink(&name).unwrap();
    }

    #[test]
    fn test_stall_counter_saturates() {
        let name = test_name("saturate");
        let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
        writer.publish(1).unwrap();

        let region = SegmentHandle::open_existing(&name).unwrap().map().unwrap();
        let slot = SlotLayout::<i32>::view_mut(&region).unwrap();
        let odd = slot.begin_write();

        let mut reader = Reader::<i32>::open(
            &name,
            ReaderOptions {
                retry_ceiling: u32::MAX,
            },
        )
        .unwrap();
        assert_eq!(reader.try_read().unwrap(), Observation::Pending);
        reader.stalled_polls = u32::MAX;
        assert_eq!(reader.try_read().unwrap(), Observation::Pending);
        assert_eq!(reader.stalled_polls, u32::MAX);

        slot.end_write(odd);
        assert_eq!(reader.try_observe().unwrap(), Some(1));

        unlink(&name).unwrap();
    }
}
