//! Multi-process channel tests.
//!
//! Uses `fork()` to exercise the channel across a real process boundary:
//! - Writer publishes uniform byte patterns in a child process
//! - Reader in the parent verifies that no copy is ever torn
//! - A writer that dies mid-publish leaves readers pending until a new writer recovers

use seqchan::slot::SlotLayout;
use seqchan::{
    CancelToken, Observation, Reader, ReaderOptions, SegmentHandle, ShmError, Writer,
    WriterOptions, inspect, unlink,
};
use std::time::{Duration, Instant};

type Pattern = [u64; 16];

/// Retry `Reader::open` until the child has created and initialized the slot.
fn wait_for_reader<T: seqchan::SlotPayload>(name: &str, timeout: Duration) -> Option<Reader<T>> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        match Reader::<T>::open(name, ReaderOptions::default()) {
            Ok(reader) => return Some(reader),
            Err(ShmError::NotFound { .. }) | Err(ShmError::Uninitialized { .. }) => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("unexpected open error: {}", e),
        }
    }
    None
}

fn wait_child(pid: libc::pid_t) -> bool {
    let mut status: libc::c_int = 0;
    unsafe {
        libc::waitpid(pid, &mut status, 0);
    }
    libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
}

/// Test: writer in child process, reader in parent, no torn reads.
///
/// 1. Fork a child that publishes 200k uniform patterns as fast as it can.
/// 2. Parent observes concurrently and checks every copy is uniform.
/// 3. Parent sees the final value once the child exits.
#[test]
fn cross_process_no_torn_reads() {
    let name = format!("/seqchan_xp_torn_{}", std::process::id());
    const PUBLISHES: u64 = 200_000;

    // Safety: fork() is unsafe but this is a controlled test environment.
    let pid = unsafe { libc::fork() };

    if pid == 0 {
        // ── CHILD PROCESS (writer) ──
        let mut writer =
            Writer::<Pattern>::create(&name, WriterOptions::default()).expect("child: create");
        // Give the parent time to attach before the burst.
        std::thread::sleep(Duration::from_millis(20));
        for i in 1..=PUBLISHES {
            writer.publish([i; 16]).expect("child: publish");
        }
        writer.close();
        std::process::exit(0);
    }

    // ── PARENT PROCESS (reader) ──
    assert!(pid > 0, "fork failed");

    let mut reader = wait_for_reader::<Pattern>(&name, Duration::from_secs(5))
        .expect("timeout waiting for child to create segment");

    let mut observed = 0u64;
    let mut last = 0u64;
    let deadline = Instant::now() + Duration::from_secs(30);
    while last < PUBLISHES && Instant::now() < deadline {
        match reader.try_observe() {
            Ok(Some(value)) => {
                assert!(
                    value.iter().all(|w| *w == value[0]),
                    "torn read across processes: {:?}",
                    value
                );
                assert!(value[0] >= last, "values went backwards");
                last = value[0];
                observed += 1;
            }
            Ok(None) | Err(ShmError::StaleRead { .. }) => {}
            Err(e) => panic!("parent: read failed: {}", e),
        }
    }

    assert!(wait_child(pid), "writer child failed");
    assert!(observed > 0, "parent never observed a value");
    assert_eq!(last, PUBLISHES, "final value not observed");

    let info = inspect(&name).expect("inspect");
    assert_eq!(info.sequence, PUBLISHES * 2);
    assert!(!info.writer_alive, "writer should have exited");

    unlink(&name).unwrap();
}

/// Test: writer killed mid-publish, recovered by a new writer.
///
/// 1. Child publishes once, then starts a second publish and exits.
/// 2. Parent reader reports pending, then StaleRead once the ceiling passes.
/// 3. A new writer in the parent adopts the segment and publishing resumes.
#[test]
fn cross_process_writer_dies_mid_publish() {
    let name = format!("/seqchan_xp_dead_{}", std::process::id());

    let pid = unsafe { libc::fork() };

    if pid == 0 {
        // ── CHILD PROCESS (writer) ──
        let mut writer =
            Writer::<i32>::create(&name, WriterOptions::default()).expect("child: create");
        writer.publish(7).expect("child: publish");

        let handle = SegmentHandle::open_existing(&name).expect("child: open");
        let region = handle.map().expect("child: map");
        let slot = SlotLayout::<i32>::view_mut(&region).expect("child: view");
        slot.begin_write();
        slot.write_payload(&-1);
        std::process::exit(0);
    }

    assert!(pid > 0, "fork failed");
    assert!(wait_child(pid), "writer child failed");

    let mut reader = Reader::<i32>::open(&name, ReaderOptions { retry_ceiling: 3 })
        .expect("parent: open");
    assert_eq!(reader.try_read().unwrap(), Observation::Pending);

    let cancel = CancelToken::new();
    assert!(matches!(
        reader.observe_blocking(Duration::from_millis(1), &cancel),
        Err(ShmError::StaleRead { .. })
    ));

    let info = inspect(&name).unwrap();
    assert!(info.write_in_progress);
    assert!(!info.writer_alive);

    let mut writer = Writer::<i32>::create(&name, WriterOptions::default()).unwrap();
    assert_eq!(writer.publish(8).unwrap(), 6);
    assert_eq!(reader.try_observe().unwrap(), Some(8));

    unlink(&name).unwrap();
}
