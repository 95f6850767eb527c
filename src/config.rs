//! Pipeline configuration
//!
//! Plain values deserialize from TOML; callbacks can only be attached in
//! code.
//!
//! ```toml
//! capacity = 8192
//! threshold_level = "notice"
//! shm_name = "orders"
//! drain_on_shutdown = false
//! ```

use crate::error::{LogError, LogResult, SinkError};
use crate::handler::SinkErrorCallback;
use crate::level::Level;
use crate::logger::{DropCallback, DropEvent};
use crate::memory::MIN_SLOT_SIZE;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Settings for [`LifecycleManager::init`](crate::LifecycleManager::init)
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of slots in the ring
    pub capacity: u64,
    /// Minimum enabled level
    pub threshold_level: Level,
    /// Named segment shared with other processes; anonymous when `None`
    pub shm_name: Option<String>,
    /// Directory holding named segments
    pub shm_dir: PathBuf,
    /// Bytes per slot, slot header included
    pub slot_size: u32,
    /// Refuse layouts larger than this many bytes
    pub max_segment_bytes: Option<u64>,
    /// Map an existing segment instead of creating one
    pub attach: bool,
    /// Raw passthrough; no ring is set up
    pub raw: bool,
    /// Deliver queued records at shutdown instead of discarding them
    pub drain_on_shutdown: bool,
    /// Consumer idle sleep in milliseconds
    pub poll_interval_ms: u64,
    #[serde(skip)]
    pub(crate) on_drop: Option<DropCallback>,
    #[serde(skip)]
    pub(crate) on_sink_error: Option<SinkErrorCallback>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: 4096,
            threshold_level: Level::Info,
            shm_name: None,
            shm_dir: PathBuf::from("/dev/shm"),
            slot_size: MIN_SLOT_SIZE,
            max_segment_bytes: None,
            attach: false,
            raw: false,
            drain_on_shutdown: true,
            poll_interval_ms: 10,
            on_drop: None,
            on_sink_error: None,
        }
    }
}

impl Config {
    /// Parse from a TOML document
    pub fn from_toml_str(text: &str) -> LogResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> LogResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the slot count
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the minimum enabled level
    pub fn threshold(mut self, level: Level) -> Self {
        self.threshold_level = level;
        self
    }

    /// Share the ring through a named segment in `shm_dir`
    pub fn shm_name(mut self, name: impl Into<String>) -> Self {
        self.shm_name = Some(name.into());
        self
    }

    /// Set the directory for named segments
    pub fn shm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shm_dir = dir.into();
        self
    }

    /// Set the slot size
    pub fn slot_size(mut self, bytes: u32) -> Self {
        self.slot_size = bytes;
        self
    }

    /// Cap the mapped size
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = Some(bytes);
        self
    }

    /// Attach to a segment created elsewhere
    pub fn attach(mut self, attach: bool) -> Self {
        self.attach = attach;
        self
    }

    /// Request raw passthrough
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Drain or discard queued records at shutdown
    pub fn drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Set the consumer idle sleep
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Called on the producer thread whenever a push is dropped for lack of space
    pub fn on_drop(mut self, callback: impl Fn(&DropEvent) + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Arc::new(callback));
        self
    }

    /// Called on the consumer thread whenever a sink fails
    pub fn on_sink_error(
        mut self,
        callback: impl Fn(&str, &SinkError) + Send + Sync + 'static,
    ) -> Self {
        self.on_sink_error = Some(Arc::new(callback));
        self
    }

    /// Consumer idle sleep as a duration
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Slot size actually used, raised to the minimum if needed
    pub fn effective_slot_size(&self) -> u32 {
        if self.slot_size < MIN_SLOT_SIZE {
            tracing::warn!(
                requested = self.slot_size,
                used = MIN_SLOT_SIZE,
                "slot size below minimum, raising it"
            );
        }
        self.slot_size.max(MIN_SLOT_SIZE)
    }

    pub(crate) fn validate(&self) -> LogResult<()> {
        if self.capacity == 0 {
            return Err(LogError::InvalidConfig {
                reason: "capacity must be at least one slot",
            });
        }
        if self.attach && self.shm_name.is_none() {
            return Err(LogError::InvalidConfig {
                reason: "attach requires shm_name",
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("capacity", &self.capacity)
            .field("threshold_level", &self.threshold_level)
            .field("shm_name", &self.shm_name)
            .field("shm_dir", &self.shm_dir)
            .field("slot_size", &self.slot_size)
            .field("max_segment_bytes", &self.max_segment_bytes)
            .field("attach", &self.attach)
            .field("raw", &self.raw)
            .field("drain_on_shutdown", &self.drain_on_shutdown)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("on_drop", &self.on_drop.is_some())
            .field("on_sink_error", &self.on_sink_error.is_some())
            .finish()
    }
}
