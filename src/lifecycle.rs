//! Setup and teardown of the logging pipeline
//!
//! The [`LifecycleManager`] owns the ring buffer, the producer context and
//! the consumer thread. Its state moves through
//! `Uninitialized -> Active | Unformatted -> TornDown`; a torn-down manager
//! may be initialized again.

use crate::config::Config;
use crate::error::{LogError, LogResult, SegmentError};
use crate::handler::Handler;
use crate::logger::{LogContext, Logger};
use crate::memory::ring::RingBuffer;
use crate::memory::segment::Segment;
use crate::memory::SegmentHeader;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Result of [`LifecycleManager::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The ring buffer is live
    Success,
    /// The segment could not be sized for the requested capacity; nothing was set up
    ShmTooSmall,
    /// Raw passthrough was requested, or the segment to attach is not a ring
    Unformatted,
}

struct Active {
    ring: Arc<RingBuffer>,
    context: Arc<LogContext>,
    consumer: Option<JoinHandle<Handler>>,
    config: Config,
}

impl Active {
    fn owns_ring(&self) -> bool {
        !self.config.attach
    }
}

enum State {
    Uninitialized,
    Active(Active),
    Unformatted,
    TornDown,
}

static GLOBAL: Lazy<LifecycleManager> = Lazy::new(LifecycleManager::new);

/// Owner of one logging pipeline
pub struct LifecycleManager {
    state: Mutex<State>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    /// Manager in the uninitialized state
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninitialized),
        }
    }

    /// Process-wide manager used by the crate-level helpers
    pub fn global() -> &'static LifecycleManager {
        &GLOBAL
    }

    /// Set up the ring buffer described by `config`
    ///
    /// A size shortfall is reported as [`InitOutcome::ShmTooSmall`] and
    /// leaves the manager as it was, so `init` can be retried with a smaller
    /// layout. Other setup failures are returned as errors.
    ///
    /// # Panics
    ///
    /// Panics if the manager is already initialized.
    pub fn init(&self, config: Config) -> LogResult<InitOutcome> {
        let mut state = self.state.lock();
        if matches!(*state, State::Active(_) | State::Unformatted) {
            panic!("logging pipeline is already initialized; call deinit first");
        }

        if config.raw {
            *state = State::Unformatted;
            tracing::info!("raw passthrough requested, no ring buffer");
            return Ok(InitOutcome::Unformatted);
        }
        config.validate()?;

        let ring = if config.attach {
            attach_ring(&config)
        } else {
            create_ring(&config)
        };

        match ring {
            Ok(ring) => {
                let ring = Arc::new(ring);
                tracing::info!(
                    capacity = ring.capacity(),
                    slot_stride = ring.slot_stride(),
                    segment = ?ring.segment().path(),
                    "ring buffer initialized"
                );
                let context = Arc::new(LogContext::new(ring.clone(), config.on_drop.clone()));
                *state = State::Active(Active {
                    ring,
                    context,
                    consumer: None,
                    config,
                });
                Ok(InitOutcome::Success)
            }
            Err(SegmentError::TooSmall {
                required,
                available,
            }) => {
                tracing::info!(required, available, "shared memory too small for ring buffer");
                Ok(InitOutcome::ShmTooSmall)
            }
            Err(SegmentError::Unformatted) => {
                *state = State::Unformatted;
                tracing::info!("segment is not a ring buffer, running unformatted");
                Ok(InitOutcome::Unformatted)
            }
            Err(SegmentError::Log(err)) => Err(err),
        }
    }

    /// Shut the pipeline down
    ///
    /// Further pushes fail with [`PushError::Closed`](crate::PushError::Closed).
    /// The consumer thread, if started, drains or discards what is queued
    /// and is joined. A named segment created by this manager is unlinked.
    ///
    /// # Panics
    ///
    /// Panics if the manager was never initialized or is already torn down.
    pub fn deinit(&self) {
        let previous = {
            let mut state = self.state.lock();
            match *state {
                State::Uninitialized => panic!("deinit called before init"),
                State::TornDown => panic!("deinit called twice"),
                _ => std::mem::replace(&mut *state, State::TornDown),
            }
        };

        if let State::Active(active) = previous {
            teardown(active);
            tracing::info!("logging pipeline torn down");
        }
    }

    /// Whether a ring buffer is live
    pub fn is_active(&self) -> bool {
        matches!(*self.state.lock(), State::Active(_))
    }

    /// Logger for the live ring, or a detached one
    pub fn logger(&self) -> Logger {
        match &*self.state.lock() {
            State::Active(active) => Logger::from_context(active.context.clone()),
            _ => Logger::detached(),
        }
    }

    /// The live ring buffer
    pub fn ring(&self) -> Option<Arc<RingBuffer>> {
        match &*self.state.lock() {
            State::Active(active) => Some(active.ring.clone()),
            _ => None,
        }
    }

    /// Handler bound to the live ring's consumer, set up from the config
    pub fn handler(&self) -> LogResult<Handler> {
        let state = self.state.lock();
        let State::Active(active) = &*state else {
            return Err(LogError::NotActive);
        };
        let consumer = active.ring.consumer().ok_or(LogError::ConsumerBusy)?;
        let mut handler = Handler::new(consumer)
            .with_poll_interval(active.config.poll_interval_duration())
            .with_drain_on_shutdown(active.config.drain_on_shutdown);
        handler.set_sink_error_callback(active.config.on_sink_error.clone());
        Ok(handler)
    }

    /// Run `handler` on the consumer thread until [`LifecycleManager::deinit`]
    pub fn start(&self, handler: Handler) -> LogResult<()> {
        let mut state = self.state.lock();
        let State::Active(active) = &mut *state else {
            return Err(LogError::NotActive);
        };
        if !Arc::ptr_eq(handler.ring(), &active.ring) {
            return Err(LogError::InvalidConfig {
                reason: "handler drains a different ring buffer",
            });
        }
        if active.consumer.is_some() {
            return Err(LogError::ConsumerBusy);
        }
        active.consumer = Some(handler.spawn()?);
        tracing::debug!("consumer thread started");
        Ok(())
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), State::TornDown);
        if let State::Active(active) = state {
            teardown(active);
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.lock() {
            State::Uninitialized => "uninitialized",
            State::Active(_) => "active",
            State::Unformatted => "unformatted",
            State::TornDown => "torn down",
        };
        f.debug_struct("LifecycleManager")
            .field("state", &state)
            .finish()
    }
}

fn create_ring(config: &Config) -> Result<RingBuffer, SegmentError> {
    let slot_size = config.effective_slot_size();
    let limit = config.max_segment_bytes.unwrap_or(u64::MAX);
    let required = RingBuffer::required_len(config.capacity, slot_size).ok_or(
        SegmentError::TooSmall {
            required: u64::MAX,
            available: limit,
        },
    )?;
    if required as u64 > limit {
        return Err(SegmentError::TooSmall {
            required: required as u64,
            available: limit,
        });
    }

    let segment = match &config.shm_name {
        Some(name) => Segment::create(&config.shm_dir, name, required)?,
        None => Segment::anonymous(required)?,
    };
    RingBuffer::format(segment, config.capacity, slot_size, config.threshold_level)
}

fn attach_ring(config: &Config) -> Result<RingBuffer, SegmentError> {
    let name = config.shm_name.as_deref().ok_or(LogError::InvalidConfig {
        reason: "attach requires shm_name",
    })?;
    let segment = Segment::open(&config.shm_dir, name, SegmentHeader::SIZE)?;
    RingBuffer::attach(segment)
}

fn teardown(active: Active) {
    active.context.close();
    if active.owns_ring() || active.consumer.is_some() {
        active.ring.close();
    }
    if let Some(consumer) = active.consumer {
        match consumer.join() {
            Ok(handler) => tracing::debug!(stats = ?handler.stats(), "consumer joined"),
            Err(_) => tracing::warn!("consumer thread panicked"),
        }
    }
    if let Err(err) = active.ring.segment().unlink() {
        tracing::warn!(error = %err, "failed to remove shared segment");
    }
}
