//! shmlog - lock-free logging through a shared-memory ring buffer
//!
//! # Overview
//!
//! shmlog moves log records from any number of producer threads (or
//! processes mapping the same segment) to a single consumer without locks
//! on the emission path:
//!
//! 1. A level-gated front end ([`Logger`] and the logging macros) that costs
//!    a couple of relaxed atomic loads when a level is disabled
//! 2. A lock-free, fixed-capacity MPSC ring buffer laid out in shared memory
//! 3. A consumer [`Handler`] that filters, renders and dispatches records to sinks
//!
//! # Key Features
//!
//! - Compare-and-swap slot claims with a global order across producers
//! - Drop-on-full backpressure with a shared drop counter and callback
//! - Deferred records whose message is rendered on the consumer thread
//! - Threaded records stamped with the emitting thread
//! - A shared per-component, tag and file level table that keyed
//!   [`LevelFilter`]s fill, so one component can log more verbosely
//! - Records longer than one slot carried whole in a linked run of slots
//! - A segmented [`StringBuilder`] with copy, adopt and reference disciplines
//! - CRC32 checksums on every slot
//!
//! # Usage
//!
//! ```no_run
//! use shmlog::{Config, InitOutcome, Level, WriterSink};
//!
//! let outcome = shmlog::init(Config::default().capacity(1024)).unwrap();
//! assert_eq!(outcome, InitOutcome::Success);
//!
//! let manager = shmlog::LifecycleManager::global();
//! let mut handler = manager.handler().unwrap();
//! handler.add_sink(WriterSink::stderr());
//! manager.start(handler).unwrap();
//!
//! let logger = shmlog::logger();
//! shmlog::info!(logger, "listening on port {}", 8080);
//! shmlog::log_deferred!(logger, Level::Debug, "cache holds {} entries", 42);
//!
//! shmlog::deinit();
//! ```

#![deny(missing_docs)]

mod builder;
mod config;
mod error;
mod filter;
mod handler;
mod level;
mod lifecycle;
mod logger;
mod macros;
mod memory;
mod record;
mod sink;

pub use builder::{Position, StringBuilder, TimeInput};
pub use config::Config;
pub use error::{LogError, LogResult, PushError, SegmentError, SinkError};
pub use filter::{Filter, FilterChain, LevelFilter};
pub use handler::{Handler, HandlerStats, SinkErrorCallback};
pub use level::{Level, ParseLevelError};
pub use lifecycle::{InitOutcome, LifecycleManager};
pub use logger::{DropCallback, DropEvent, Logger};
pub use memory::levels::{LevelKey, LevelTable};
pub use memory::ring::{
    Consumer, RawRecord, Reservation, RingBuffer, RingStats, MAX_LINKED_SLOTS,
};
pub use memory::segment::Segment;
pub use record::codec::{decode, encode};
pub use record::{Arg, CallSite, LogRecord, Payload, ProducerId, RecordFlags, ThreadTag, Timestamp};
pub use sink::{MemorySink, RenderedRecord, Sink, WriterSink};

/// Initialize the process-wide pipeline
///
/// # Panics
///
/// Panics if it is already initialized.
pub fn init(config: Config) -> LogResult<InitOutcome> {
    LifecycleManager::global().init(config)
}

/// Tear down the process-wide pipeline
///
/// # Panics
///
/// Panics if it was not initialized or was already torn down.
pub fn deinit() {
    LifecycleManager::global().deinit()
}

/// Logger for the process-wide pipeline; detached while it is not running
pub fn logger() -> Logger {
    LifecycleManager::global().logger()
}
