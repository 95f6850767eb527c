//! Integration tests for the full logging pipeline

use parking_lot::Mutex;
use shmlog::{
    Config, InitOutcome, Level, LevelFilter, LifecycleManager, LogRecord, MemorySink, PushError,
    RenderedRecord, SinkError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{tempdir, TempDir};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: tempdir().unwrap(),
        }
    }

    fn config(&self, name: &str) -> Config {
        Config::default()
            .shm_dir(self.temp_dir.path())
            .shm_name(name)
    }

    fn segment_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(format!("shmlog_{name}"))
    }
}

/// Five concurrent pushes into four slots: four accepted in claim order, one drop
#[test]
fn test_end_to_end_capacity_four() {
    let context = TestContext::new();
    let drops = Arc::new(AtomicU64::new(0));
    let seen = drops.clone();
    let config = context
        .config("e2e")
        .capacity(4)
        .threshold(Level::Info)
        .on_drop(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

    let manager = LifecycleManager::new();
    assert_eq!(manager.init(config).unwrap(), InitOutcome::Success);

    let pushes_per_thread = [2, 2, 1];
    let barrier = Arc::new(Barrier::new(pushes_per_thread.len()));
    let handles: Vec<_> = pushes_per_thread
        .iter()
        .enumerate()
        .map(|(t, &count)| {
            let logger = manager.logger();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..count {
                    shmlog::info!(logger, "thread {} record {}", t, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.logger().dropped(), 1, "Exactly one push should be dropped");
    assert_eq!(drops.load(Ordering::SeqCst), 1, "Drop callback should fire once");
    assert_eq!(manager.ring().unwrap().stats().claimed, 4);

    let sinks: Vec<MemorySink> = (0..4).map(|_| MemorySink::new()).collect();
    let mut handler = manager.handler().unwrap();
    for sink in &sinks {
        handler.add_sink(sink.clone());
    }
    manager.start(handler).unwrap();
    manager.deinit();

    let reference: Vec<u64> = sinks[0].records().iter().map(|r| r.sequence).collect();
    assert_eq!(reference, vec![0, 1, 2, 3], "Records should arrive in claim order");
    for sink in &sinks[1..] {
        assert_eq!(sink.records(), sinks[0].records(), "Every sink should see the same stream");
    }
    assert!(!context.segment_path("e2e").exists());
}

/// A full ring counts each failed push once and leaves queued records intact
#[test]
fn test_full_ring_preserves_records() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(4)).unwrap();
    let logger = manager.logger();

    for i in 0..4 {
        shmlog::warning!(logger, "kept {}", i);
    }
    for i in 0..3 {
        assert_eq!(logger.log(Level::Warning, &format!("lost {i}")), Err(PushError::Full));
    }
    assert_eq!(logger.dropped(), 3);

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());
    assert_eq!(handler.drain(), 4);

    assert_eq!(sink.messages(), vec!["kept 0", "kept 1", "kept 2", "kept 3"]);
    assert!(sink.records().iter().all(|r| !r.flags.follows_drop));

    shmlog::warning!(logger, "after the flood");
    handler.drain();
    let last = sink.records().pop().unwrap();
    assert!(last.flags.follows_drop, "First record after drops should be flagged");
    drop(handler);
    manager.deinit();
}

mod chatty {
    pub fn emit(logger: &shmlog::Logger) {
        shmlog::trace!(logger, "chatty trace");
        shmlog::debug!(logger, "chatty debug");
    }
}

mod quiet {
    pub fn emit(logger: &shmlog::Logger, evaluated: &std::cell::Cell<bool>) {
        shmlog::debug!(logger, "quiet debug {}", {
            evaluated.set(true);
            1
        });
        shmlog::warning!(logger, "quiet warning");
    }
}

/// A keyed filter makes one component verbose under a stricter global threshold
#[test]
fn test_component_level_override() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(8).threshold(Level::Warning)).unwrap();
    let logger = manager.logger();

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler
        .add_filter(LevelFilter::new(Level::Debug).component("integration_tests::chatty"))
        .add_sink(sink.clone());

    let evaluated = std::cell::Cell::new(false);
    chatty::emit(&logger);
    quiet::emit(&logger, &evaluated);

    assert!(!evaluated.get(), "Other components stay gated at the call site");
    assert_eq!(manager.ring().unwrap().stats().claimed, 2);
    handler.drain();
    assert_eq!(sink.messages(), vec!["chatty debug", "quiet warning"]);
    assert_eq!(logger.threshold(), Some(Level::Warning));

    drop(handler);
    manager.deinit();
}

/// Messages longer than a slot reach the sinks whole
#[test]
fn test_long_message_arrives_whole() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(16)).unwrap();
    let logger = manager.logger();
    let body = "abcdefghij".repeat(200);

    shmlog::info!(logger, "short");
    shmlog::info!(logger, "{}", body);
    shmlog::log_deferred!(logger, Level::Info, "deferred {}", body.clone());

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());
    handler.drain();

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].message, body);
    assert_eq!(records[2].message, format!("deferred {body}"));
    assert!(records.iter().all(|r| !r.flags.truncated));
    assert!(records[2].sequence > records[1].sequence + 1, "Long records span slots");

    drop(handler);
    manager.deinit();
}

/// Filters reject records before any sink sees them
#[test]
fn test_filter_rejects_below_warning() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(8).threshold(Level::Trace)).unwrap();
    let logger = manager.logger();

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler
        .add_filter(LevelFilter::new(Level::Warning))
        .add_sink(sink.clone());
    manager.start(handler).unwrap();

    shmlog::debug!(logger, "debug");
    shmlog::info!(logger, "info");
    shmlog::error!(logger, "only this one");
    manager.deinit();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].level, Level::Error);
    assert_eq!(records[0].message, "only this one");
}

/// A failing sink is reported and does not stop later sinks
#[test]
fn test_sink_error_isolation() {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let log = failures.clone();
    let manager = LifecycleManager::new();
    manager
        .init(
            Config::default()
                .capacity(8)
                .on_sink_error(move |name, err| log.lock().push(format!("{name}: {err}"))),
        )
        .unwrap();

    struct Broken;
    impl shmlog::Sink for Broken {
        fn write(&mut self, _: &RenderedRecord) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".into()))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    let first = MemorySink::new();
    let last = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler
        .add_sink(first.clone())
        .add_sink(Broken)
        .add_sink(last.clone());
    manager.start(handler).unwrap();

    let logger = manager.logger();
    shmlog::notice!(logger, "one");
    shmlog::notice!(logger, "two");
    manager.deinit();

    assert_eq!(first.messages(), vec!["one", "two"]);
    assert_eq!(last.messages(), vec!["one", "two"]);
    assert_eq!(
        *failures.lock(),
        vec!["broken: record rejected: disk full", "broken: record rejected: disk full"]
    );
}

/// Deferred payloads are rendered by the consumer; threaded records carry the thread
#[test]
fn test_deferred_and_threaded_records() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(8).threshold(Level::Debug)).unwrap();
    let logger = manager.logger();

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());
    let deferred_seen = Arc::new(AtomicU64::new(0));
    let counter = deferred_seen.clone();
    handler.add_filter(move |record: &LogRecord| {
        if record.payload().is_deferred() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        true
    });

    let worker_logger = logger.clone();
    thread::Builder::new()
        .name("worker-1".into())
        .spawn(move || {
            shmlog::log_threaded!(worker_logger, Level::Info, "eager {}", 1);
            shmlog::log_deferred_threaded!(worker_logger, Level::Info, "lazy {} {}", 2, "b");
        })
        .unwrap()
        .join()
        .unwrap();
    shmlog::log_deferred!(logger, Level::Debug, "plain {{}} {}", 3.5);

    handler.drain();
    let records = sink.records();
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].message, "eager 1");
    let thread = records[0].producer.thread.as_ref().unwrap();
    assert_eq!(thread.name.as_deref(), Some("worker-1"));

    assert_eq!(records[1].message, "lazy 2 b");
    assert_eq!(records[1].producer.thread, records[0].producer.thread);

    assert_eq!(records[2].message, "plain {} 3.5");
    assert!(records[2].producer.thread.is_none());
    assert_eq!(deferred_seen.load(Ordering::SeqCst), 2);

    drop(handler);
    manager.deinit();
}

/// Tagged loggers and the shared threshold
#[test]
fn test_tagged_logger_and_threshold() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(8)).unwrap();
    let audit = manager.logger().tagged("audit");

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());

    shmlog::detail!(audit, "hidden");
    audit.set_threshold(Level::Detail);
    shmlog::detail!(audit, "visible");
    handler.drain();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tag.as_deref(), Some("audit"));
    assert!(records[0].to_string().contains("/audit integration_tests.rs:"));

    drop(handler);
    manager.deinit();
}

/// A named segment is created on init and removed on deinit
#[test]
fn test_named_segment_is_unlinked() {
    let context = TestContext::new();
    let manager = LifecycleManager::new();
    manager.init(context.config("cleanup").capacity(16)).unwrap();
    assert!(context.segment_path("cleanup").exists());

    manager.deinit();
    assert!(!context.segment_path("cleanup").exists(), "Deinit should unlink the segment");
}

/// Layouts that cannot be mapped report ShmTooSmall and leave nothing behind
#[test]
fn test_too_small_outcomes() {
    let context = TestContext::new();
    let manager = LifecycleManager::new();

    let capped = context.config("capped").capacity(1024).max_segment_bytes(64 * 1024);
    assert_eq!(manager.init(capped).unwrap(), InitOutcome::ShmTooSmall);
    assert!(!context.segment_path("capped").exists());

    let huge = context.config("huge").capacity(u64::MAX / 1024);
    assert_eq!(manager.init(huge).unwrap(), InitOutcome::ShmTooSmall);
    assert!(!context.segment_path("huge").exists());

    let logger = manager.logger();
    assert!(!logger.enabled(Level::Critical));
    shmlog::critical!(logger, "nowhere to go");
    assert_eq!(logger.log(Level::Critical, "x"), Err(PushError::Unavailable));
}

/// Raw passthrough sets no ring up
#[test]
fn test_raw_config_is_unformatted() {
    let manager = LifecycleManager::new();
    assert_eq!(manager.init(Config::default().raw(true)).unwrap(), InitOutcome::Unformatted);
    assert!(manager.ring().is_none());
    manager.deinit();
}

/// Attaching to a file that is not a ring reports Unformatted
#[test]
fn test_attach_unformatted_segment() {
    let context = TestContext::new();
    std::fs::write(context.segment_path("junk"), vec![0xA5u8; 4096]).unwrap();

    let manager = LifecycleManager::new();
    let outcome = manager.init(context.config("junk").attach(true)).unwrap();
    assert_eq!(outcome, InitOutcome::Unformatted);
    manager.deinit();
    assert!(context.segment_path("junk").exists(), "Foreign files are never removed");
}

/// Configuration can be loaded from a TOML file
#[test]
fn test_config_from_file() {
    let context = TestContext::new();
    let path = context.temp_dir.path().join("shmlog.toml");
    std::fs::write(
        &path,
        format!(
            "capacity = 32\nthreshold_level = \"notice\"\nshm_name = \"from-file\"\nshm_dir = \"{}\"\ndrain_on_shutdown = false\n",
            context.temp_dir.path().display()
        ),
    )
    .unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.capacity, 32);
    assert!(!config.drain_on_shutdown);

    let manager = LifecycleManager::new();
    assert_eq!(manager.init(config).unwrap(), InitOutcome::Success);
    let logger = manager.logger();
    assert!(!logger.enabled(Level::Info));
    assert!(logger.enabled(Level::Notice));
    assert!(context.segment_path("from-file").exists());
    manager.deinit();
}

/// Records queued at shutdown are discarded when draining is off
#[test]
fn test_discard_on_shutdown() {
    let manager = LifecycleManager::new();
    manager
        .init(Config::default().capacity(8).drain_on_shutdown(false))
        .unwrap();
    let ring = manager.ring().unwrap();
    let logger = manager.logger();

    let sink = MemorySink::new();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());

    for i in 0..5 {
        shmlog::info!(logger, "queued {}", i);
    }
    ring.close();
    handler.run();

    assert!(sink.is_empty());
    assert_eq!(ring.stats().in_flight(), 0);
    drop(handler);
    manager.deinit();
    assert_eq!(logger.log(Level::Info, "late"), Err(PushError::Closed));
}

/// The process-wide helpers drive the global manager
#[test]
fn test_global_helpers() {
    assert!(!shmlog::logger().is_attached());
    assert_eq!(shmlog::init(Config::default().capacity(8)).unwrap(), InitOutcome::Success);

    let sink = MemorySink::new();
    let manager = LifecycleManager::global();
    let mut handler = manager.handler().unwrap();
    handler.add_sink(sink.clone());
    manager.start(handler).unwrap();

    shmlog::info!(shmlog::logger(), "through the global pipeline");
    shmlog::deinit();

    assert_eq!(sink.messages(), vec!["through the global pipeline"]);
    assert!(!shmlog::logger().is_attached());
}

/// Tearing down twice is a programming error
#[test]
#[should_panic(expected = "deinit called twice")]
fn test_double_deinit_panics() {
    let manager = LifecycleManager::new();
    manager.init(Config::default().capacity(4)).unwrap();
    manager.deinit();
    manager.deinit();
}
