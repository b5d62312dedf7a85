//! Channel behaviour tests within one process.
//!
//! Covers round trip, latest-value semantics, missing segments, the stale-read
//! bound against a stuck writer, and torn-read detection between threads.

use proptest::prelude::*;
use seqchan::slot::SlotLayout;
use seqchan::{
    CancelToken, Observation, Reader, ReaderOptions, SegmentHandle, ShmError, Writer,
    WriterOptions, unlink,
};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_name(tag: &str) -> String {
    format!(
        "/seqchan_it_{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Writer plus one reader on a fresh segment.
fn channel<T: seqchan::SlotPayload>(tag: &str) -> (String, Writer<T>, Reader<T>) {
    let name = unique_name(tag);
    let writer = Writer::<T>::create(&name, WriterOptions::default()).expect("create writer");
    let reader = Reader::<T>::open(&name, ReaderOptions::default()).expect("open reader");
    (name, writer, reader)
}

#[test]
fn chan1_scenario() {
    let name = "/chan1";
    let _ = unlink(name);

    let mut writer = Writer::<i32>::create(name, WriterOptions::default()).unwrap();
    let mut reader = Reader::<i32>::open(name, ReaderOptions::default()).unwrap();
    assert_eq!(reader.segment_size(), 128);

    writer.publish(42).unwrap();
    assert_eq!(reader.try_observe().unwrap(), Some(42));

    writer.publish(-7).unwrap();
    assert_eq!(reader.try_observe().unwrap(), Some(-7));

    unlink(name).unwrap();
    assert!(matches!(
        SegmentHandle::open_existing(name),
        Err(ShmError::NotFound { .. })
    ));

    // Existing mappings keep working after unlink.
    writer.publish(1).unwrap();
    assert_eq!(reader.try_observe().unwrap(), Some(1));
}

#[test]
fn round_trip() {
    let (name, mut writer, mut reader) = channel::<u64>("round_trip");

    for value in [0, 1, u64::MAX, 0xDEAD_BEEF] {
        writer.publish(value).unwrap();
        assert_eq!(reader.try_observe().unwrap(), Some(value));
    }

    unlink(&name).unwrap();
}

#[test]
fn missing_segment_is_not_found() {
    let name = unique_name("absent");
    assert!(matches!(
        SegmentHandle::open_existing(&name),
        Err(ShmError::NotFound { .. })
    ));
    assert!(matches!(
        Reader::<i32>::open(&name, ReaderOptions::default()),
        Err(ShmError::NotFound { .. })
    ));
}

#[test]
fn stuck_writer_yields_stale_read() {
    let (name, mut writer, _) = channel::<i32>("stuck");
    writer.publish(3).unwrap();

    // Writer paused between the odd store and the even store.
    let handle = SegmentHandle::open_existing(&name).unwrap();
    let region = handle.map().unwrap();
    let slot = SlotLayout::<i32>::view_mut(&region).unwrap();
    let odd = slot.begin_write();

    let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 5 }).unwrap();
    let cancel = CancelToken::new();
    let result = reader.observe_blocking(Duration::from_micros(100), &cancel);
    match result {
        Err(ShmError::StaleRead { attempts }) => assert_eq!(attempts, 6),
        other => panic!("expected StaleRead, got {:?}", other),
    }

    slot.write_payload(&4);
    slot.end_write(odd);
    assert_eq!(reader.try_observe().unwrap(), Some(4));

    unlink(&name).unwrap();
}

#[test]
fn interrupted_publish_is_skipped_by_next_writer() {
    let name = unique_name("interrupted");
    let mut first = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
    first.publish(10).unwrap();

    // Leave the sequence odd, as a writer killed mid-publish would.
    let handle = SegmentHandle::open_existing(&name).unwrap();
    let region = handle.map().unwrap();
    let odd = SlotLayout::<i32>::view_mut(&region).unwrap().begin_write();
    assert_eq!(odd, 3);
    first.close();

    let mut reader = Reader::<i32>::open(&name, ReaderOptions::default()).unwrap();
    assert_eq!(reader.try_read().unwrap(), Observation::Pending);

    let mut second = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
    assert_eq!(second.last_sequence(), 3);
    assert_eq!(second.publish(11).unwrap(), 6);
    assert_eq!(reader.try_observe().unwrap(), Some(11));

    unlink(&name).unwrap();
}

#[test]
fn blocking_observe_returns_on_cancel() {
    let (name, _writer, mut reader) = channel::<i32>("cancel");
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel.cancel();
        })
    };

    // Nothing is ever published, so only cancellation ends the wait.
    let observed = reader
        .observe_blocking(Duration::from_secs(10), &cancel)
        .unwrap();
    assert_eq!(observed, None);
    canceller.join().unwrap();

    unlink(&name).unwrap();
}

#[test]
fn readers_never_see_torn_values_across_threads() {
    const READERS: usize = 2;
    const TARGET: u64 = 500;

    let (name, mut writer, _) = channel::<[u8; 64]>("torn_threads");
    writer.publish([0; 64]).unwrap();

    let ready = Arc::new(Barrier::new(READERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let observed: Arc<Vec<AtomicU64>> = Arc::new((0..READERS).map(|_| AtomicU64::new(0)).collect());

    let readers: Vec<_> = (0..READERS)
        .map(|id| {
            let name = name.clone();
            let ready = Arc::clone(&ready);
            let done = Arc::clone(&done);
            let observed = Arc::clone(&observed);
            std::thread::spawn(move || {
                let mut reader =
                    Reader::<[u8; 64]>::open(&name, ReaderOptions::default()).unwrap();
                ready.wait();

                let mut last = 0;
                while !done.load(Ordering::Acquire) {
                    match reader.try_read() {
                        Ok(Observation::Value { value, sequence }) => {
                            assert!(
                                value.iter().all(|b| *b == value[0]),
                                "torn read: {:?}",
                                value
                            );
                            // Publish i (after the initial zero) lands at sequence 2 * (i + 2).
                            if sequence > 2 {
                                assert_eq!(value[0], ((sequence / 2 - 2) % 251) as u8);
                            }
                            if sequence != last {
                                last = sequence;
                                observed[id].fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(_) | Err(ShmError::StaleRead { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                    std::thread::yield_now();
                }
            })
        })
        .collect();

    ready.wait();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut i = 0u64;
    while Instant::now() < deadline
        && observed.iter().any(|count| count.load(Ordering::Relaxed) < TARGET)
    {
        writer.publish([(i % 251) as u8; 64]).unwrap();
        i += 1;
        std::thread::yield_now();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().unwrap();
    }
    for count in observed.iter() {
        assert!(count.load(Ordering::Relaxed) > 0, "reader saw no publishes");
    }
    unlink(&name).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reader_sees_only_the_latest_value(values in prop::collection::vec(any::<i64>(), 1..16)) {
        let (name, mut writer, mut reader) = channel::<i64>("latest");

        let mut last_sequence = 0;
        for value in &values {
            let sequence = writer.publish(*value).unwrap();
            prop_assert_eq!(sequence, last_sequence + 2);
            last_sequence = sequence;
        }

        let observed = reader.try_read().unwrap();
        unlink(&name).unwrap();

        prop_assert_eq!(
            observed,
            Observation::Value { value: *values.last().unwrap(), sequence: last_sequence }
        );
    }
}
