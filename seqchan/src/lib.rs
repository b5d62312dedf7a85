//! # Seqlock Shared Memory Channel
//!
//! A single-value channel between one writer and any number of readers,
//! living in a named POSIX shared memory segment. The writer publishes a
//! fixed-size value; readers observe the most recent value without ever
//! seeing a half-written one. Neither side blocks the other.
//!
//! ## Features
//!
//! - **Lock-Free Reads**: readers never take a lock and never write to the slot
//! - **Torn-Read Detection**: a sequence counter brackets every publish
//! - **Typed Payloads**: any `Copy` type implementing [`SlotPayload`]
//! - **Layout Checks**: readers reject segments written with a different payload layout
//! - **Explicit Lifecycle**: segments are removed only by an owner, never on drop
//!
//! ## Segment Layout
//!
//! ```text
//! offset  0 ┌──────────────────────────────┐
//!           │ sequence        (u64, atomic)│
//!           │ magic           (u64)        │
//!           │ layout_hash     (u32)        │
//!           │ payload_size    (u32)        │
//!           │ writer_pid      (u32)        │
//!           │ reserved        (u32)        │
//!           │ created_ns      (u64)        │
//!           │ last_publish_ns (u64)        │
//!           │ padding                      │
//! offset 64 ├──────────────────────────────┤
//!           │ payload         (T)          │
//!           └──────────────────────────────┘  rounded up to 64 bytes
//! ```
//!
//! ## Protocol
//!
//! An even sequence means the payload is stable; an odd one means a publish
//! is in progress. The writer moves the sequence to the next odd value,
//! stores the payload and moves it to the following even value. A reader
//! copies the payload between two sequence loads and accepts the copy only
//! if both loads agree and are even.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use seqchan::{CancelToken, Reader, ReaderOptions, Writer, WriterOptions};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Producer
//! let mut writer = Writer::<i32>::create("/sensor", WriterOptions::default())?;
//! writer.publish(42)?;
//!
//! // Consumer
//! let mut reader = Reader::<i32>::open("/sensor", ReaderOptions::default())?;
//! let cancel = CancelToken::new();
//! if let Some(value) = reader.observe_blocking(Duration::from_millis(10), &cancel)? {
//!     println!("observed {value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`ShmResult`]:
//!
//! ```rust,no_run
//! use seqchan::{Reader, ReaderOptions, ShmError};
//!
//! match Reader::<i32>::open("/missing", ReaderOptions::default()) {
//!     Ok(_reader) => { /* use reader */ }
//!     Err(ShmError::NotFound { name }) => {
//!         eprintln!("Segment '{}' not found - check the writer is running", name);
//!     }
//!     Err(e) => eprintln!("Unexpected error: {}", e),
//! }
//! ```
//!
//! ## Thread Safety
//!
//! - **Writer**: one per segment; concurrent writers are not detected
//! - **Reader**: one per thread; each keeps its own retry state
//! - **OwnedSegments**: thread-safe with internal synchronization

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod platform;
pub mod reader;
pub mod segment;
pub mod sequence;
pub mod slot;
pub mod writer;

pub use cancel::CancelToken;
pub use discovery::{SegmentInfo, inspect, list_segments};
pub use error::{ShmError, ShmResult};
pub use lifecycle::{OwnedSegments, Role, exists, owned_segments, shutdown_owned, unlink};
pub use reader::{Observation, Reader, ReaderOptions};
pub use segment::{MappedRegion, OpenMode, Permissions, SegmentHandle};
pub use slot::{SlotLayout, SlotPayload};
pub use writer::{Writer, WriterOptions, WriterState};
