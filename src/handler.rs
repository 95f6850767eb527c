//! Consumer loop: decode, filter, render, deliver
//!
//! The handler owns the ring's unique [`Consumer`]. Each record taken from
//! the ring is decoded, run through the [`FilterChain`], rendered and handed
//! to every registered [`Sink`] in order. A sink that fails is reported
//! through the sink-error callback and never prevents delivery to the sinks
//! after it.
//!
//! Keyed [`LevelFilter`](crate::LevelFilter)s added to a handler are also
//! published to the ring's shared level table, so producers build records
//! at the more verbose levels those filters ask for.

use crate::error::SinkError;
use crate::filter::{Filter, FilterChain};
use crate::memory::ring::{Consumer, RingBuffer};
use crate::record::codec;
use crate::sink::{RenderedRecord, Sink};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Callback invoked with the sink name and error when a delivery fails
pub type SinkErrorCallback = Arc<dyn Fn(&str, &SinkError) + Send + Sync>;

/// Default idle sleep between polls of an empty ring
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Name of the consumer thread
pub const CONSUMER_THREAD_NAME: &str = "shmlog-consumer";

/// Counters kept by a handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Records taken from the ring and decoded
    pub received: u64,
    /// Records rejected by the filter chain
    pub rejected: u64,
    /// Records that reached the sinks
    pub delivered: u64,
    /// Individual sink deliveries that failed
    pub sink_failures: u64,
    /// Slots skipped for a bad checksum or undecodable payload
    pub corrupt: u64,
}

/// Drains a ring buffer into sinks
pub struct Handler {
    consumer: Consumer,
    filters: FilterChain,
    sinks: Vec<Box<dyn Sink>>,
    on_sink_error: Option<SinkErrorCallback>,
    poll_interval: Duration,
    drain_on_shutdown: bool,
    stats: HandlerStats,
    undecodable: u64,
    unflushed: bool,
}

impl Handler {
    /// Handler with no filters and no sinks
    pub fn new(consumer: Consumer) -> Self {
        Self {
            consumer,
            filters: FilterChain::new(),
            sinks: Vec::new(),
            on_sink_error: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_on_shutdown: true,
            stats: HandlerStats::default(),
            undecodable: 0,
            unflushed: false,
        }
    }

    /// Idle sleep used by [`Handler::run`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Deliver (`true`) or discard (`false`) records still queued at shutdown
    pub fn with_drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Append a filter to the chain
    pub fn add_filter(&mut self, filter: impl Filter + 'static) -> &mut Self {
        if let Some(rule) = filter.level_rule() {
            rule.publish(&self.consumer.ring().level_table());
        }
        self.filters.add(filter);
        self
    }

    /// Append a sink; sinks receive records in registration order
    pub fn add_sink(&mut self, sink: impl Sink + 'static) -> &mut Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Report sink failures to `callback`
    pub fn on_sink_error(
        &mut self,
        callback: impl Fn(&str, &SinkError) + Send + Sync + 'static,
    ) -> &mut Self {
        self.on_sink_error = Some(Arc::new(callback));
        self
    }

    pub(crate) fn set_sink_error_callback(&mut self, callback: Option<SinkErrorCallback>) {
        self.on_sink_error = callback;
    }

    /// Ring being drained
    pub fn ring(&self) -> &Arc<RingBuffer> {
        self.consumer.ring()
    }

    /// Counters so far
    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            corrupt: self.consumer.corrupt() + self.undecodable,
            ..self.stats
        }
    }

    /// Take and dispatch one record; `false` when nothing was ready
    pub fn process_one(&mut self) -> bool {
        let Some(raw) = self.consumer.pop() else {
            return false;
        };

        let record = match codec::decode(&raw.bytes) {
            Ok(record) => record,
            Err(err) => {
                self.undecodable += 1;
                tracing::warn!(sequence = raw.sequence, error = %err, "skipping undecodable record");
                return true;
            }
        };
        self.stats.received += 1;

        if !self.filters.evaluate(&record) {
            self.stats.rejected += 1;
            return true;
        }

        let rendered = RenderedRecord::new(raw.sequence, record);
        for sink in &mut self.sinks {
            if let Err(err) = sink.write(&rendered) {
                self.stats.sink_failures += 1;
                tracing::warn!(sink = sink.name(), sequence = rendered.sequence, error = %err, "sink failed");
                if let Some(callback) = &self.on_sink_error {
                    callback(sink.name(), &err);
                }
            }
        }
        self.stats.delivered += 1;
        self.unflushed = true;
        true
    }

    /// Process every record currently queued, returning how many were taken
    pub fn drain(&mut self) -> usize {
        let mut taken = 0;
        while self.process_one() {
            taken += 1;
        }
        taken
    }

    /// Flush every sink, reporting failures like write failures
    pub fn flush(&mut self) {
        self.unflushed = false;
        for sink in &mut self.sinks {
            if let Err(err) = sink.flush() {
                self.stats.sink_failures += 1;
                tracing::warn!(sink = sink.name(), error = %err, "sink flush failed");
                if let Some(callback) = &self.on_sink_error {
                    callback(sink.name(), &err);
                }
            }
        }
    }

    /// Poll the ring until it is closed
    ///
    /// Sleeps for the poll interval whenever the ring is empty, so shutdown is
    /// noticed within one interval. Remaining records are then drained or
    /// discarded and the sinks flushed.
    pub fn run(&mut self) {
        tracing::debug!("consumer started");
        while !self.ring().is_closed() {
            if self.process_one() {
                continue;
            }
            if self.unflushed {
                self.flush();
            }
            thread::sleep(self.poll_interval);
        }

        if self.drain_on_shutdown {
            self.drain();
        } else {
            let discarded = self.consumer.discard();
            if discarded > 0 {
                tracing::debug!(discarded, "discarded queued records at shutdown");
            }
        }
        self.flush();
        tracing::debug!(stats = ?self.stats(), "consumer stopped");
    }

    /// Run on a dedicated thread; the handler is returned when it stops
    pub fn spawn(mut self) -> io::Result<JoinHandle<Handler>> {
        thread::Builder::new()
            .name(CONSUMER_THREAD_NAME.into())
            .spawn(move || {
                self.run();
                self
            })
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("filters", &self.filters)
            .field("sinks", &self.sinks.len())
            .field("poll_interval", &self.poll_interval)
            .field("drain_on_shutdown", &self.drain_on_shutdown)
            .field("stats", &self.stats())
            .finish()
    }
}
