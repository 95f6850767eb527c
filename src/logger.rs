//! Producer-side front end
//!
//! A [`Logger`] is a cheap, cloneable handle onto the active ring buffer.
//! [`Logger::enabled_at`] checks the shared threshold and then the shared
//! per-call-site level table, and the logging macros call it before
//! evaluating any argument. A level below the threshold and below every
//! table override costs two relaxed loads and a branch.

use crate::builder::StringBuilder;
use crate::error::PushError;
use crate::level::Level;
use crate::memory::ring::RingBuffer;
use crate::record::{Arg, CallSite, LogRecord, Payload, ProducerId, RecordFlags};
use crossbeam_utils::CachePadded;
use std::borrow::Cow;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reported to the drop callback when a push finds the ring full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropEvent {
    /// Level of the dropped record
    pub level: Level,
    /// Drops recorded by the ring so far, this one included
    pub total_dropped: u64,
}

/// Callback invoked on the producer thread for every dropped record
pub type DropCallback = Arc<dyn Fn(&DropEvent) + Send + Sync>;

/// State shared by every logger bound to one ring
pub(crate) struct LogContext {
    ring: Arc<RingBuffer>,
    on_drop: Option<DropCallback>,
    lost: CachePadded<AtomicBool>,
    closed: AtomicBool,
}

impl LogContext {
    pub(crate) fn new(ring: Arc<RingBuffer>, on_drop: Option<DropCallback>) -> Self {
        Self {
            ring,
            on_drop,
            lost: CachePadded::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse further pushes from this process, whether or not the ring stays open
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Handle for emitting records
///
/// A logger obtained while the pipeline is not running is detached: every
/// level is disabled and direct submissions fail with
/// [`PushError::Unavailable`].
#[derive(Clone, Default)]
pub struct Logger {
    context: Option<Arc<LogContext>>,
    tag: Option<&'static str>,
    component: Option<&'static str>,
}

impl Logger {
    /// Logger bound to no ring
    pub fn detached() -> Self {
        Self::default()
    }

    /// Logger writing straight into `ring`
    pub fn new(ring: Arc<RingBuffer>) -> Self {
        Self::from_context(Arc::new(LogContext::new(ring, None)))
    }

    pub(crate) fn from_context(context: Arc<LogContext>) -> Self {
        Self {
            context: Some(context),
            tag: None,
            component: None,
        }
    }

    /// Whether this logger is bound to a ring
    pub fn is_attached(&self) -> bool {
        self.context.is_some()
    }

    /// Whether records at `level` pass the shared threshold
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        match &self.context {
            Some(context) => context.ring.enabled(level),
            None => false,
        }
    }

    /// Whether a record at `level` from `site` would be built
    ///
    /// Also consults the shared level table, keyed by the call site's
    /// component and file and this logger's tag.
    #[inline]
    pub fn enabled_at(&self, level: Level, site: &CallSite) -> bool {
        match &self.context {
            Some(context) => context.ring.enabled_at(level, site, self.tag),
            None => false,
        }
    }

    /// Copy of this logger whose records carry `tag`
    pub fn tagged(&self, tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            ..self.clone()
        }
    }

    /// Tag attached to this logger's records
    pub fn tag(&self) -> Option<&'static str> {
        self.tag
    }

    /// Copy of this logger that attributes [`Logger::log`] calls to `component`
    pub fn with_component(&self, component: &'static str) -> Self {
        Self {
            component: Some(component),
            ..self.clone()
        }
    }

    /// Component used by [`Logger::log`], if one was set
    pub fn component(&self) -> Option<&'static str> {
        self.component
    }

    /// Shared minimum level, if attached
    pub fn threshold(&self) -> Option<Level> {
        self.context.as_ref().map(|context| context.ring.threshold())
    }

    /// Change the minimum level for every producer on this ring
    pub fn set_threshold(&self, level: Level) {
        if let Some(context) = &self.context {
            context.ring.set_threshold(level);
        }
    }

    /// Pushes rejected because the ring was full
    pub fn dropped(&self) -> u64 {
        self.context
            .as_ref()
            .map_or(0, |context| context.ring.dropped())
    }

    /// Render `args` now and push the result
    pub fn submit_formatted(
        &self,
        level: Level,
        site: &CallSite,
        args: fmt::Arguments<'_>,
        threaded: bool,
    ) -> Result<u64, PushError> {
        if self.context.is_none() {
            return Err(PushError::Unavailable);
        }
        let mut sb = StringBuilder::new();
        if sb.append_formatted(args).is_err() {
            sb.append_copy("<formatting failed>");
        }
        let message = String::from_utf8(sb.into_bytes())
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned());
        self.submit(level, site, Payload::Rendered(message), threaded)
    }

    /// Push `spec` and its captured arguments for the consumer to render
    pub fn submit_deferred(
        &self,
        level: Level,
        site: &CallSite,
        spec: &'static str,
        args: Vec<Arg>,
        threaded: bool,
    ) -> Result<u64, PushError> {
        let payload = Payload::Deferred {
            spec: Cow::Borrowed(spec),
            args,
        };
        self.submit(level, site, payload, threaded)
    }

    /// Push a plain message attributed to the caller's source location
    ///
    /// The component is the one set with [`Logger::with_component`], or
    /// else the module name derived from the caller's file.
    #[track_caller]
    pub fn log(&self, level: Level, message: &str) -> Result<u64, PushError> {
        let location = Location::caller();
        let component = self
            .component
            .unwrap_or_else(|| module_name(location.file()));
        let site = CallSite::new(component, location.file(), location.line());
        self.submit(level, &site, Payload::Rendered(message.to_owned()), false)
    }

    /// Build a record and push it, returning its claim index
    ///
    /// Records are not gated by the threshold here; callers that want the
    /// gate check [`Logger::enabled`] first, as the macros do.
    pub fn submit(
        &self,
        level: Level,
        site: &CallSite,
        payload: Payload,
        threaded: bool,
    ) -> Result<u64, PushError> {
        let Some(context) = &self.context else {
            return Err(PushError::Unavailable);
        };
        if context.closed.load(Ordering::Acquire) {
            return Err(PushError::Closed);
        }

        let producer = if threaded {
            ProducerId::threaded()
        } else {
            ProducerId::process()
        };
        let follows_drop = context.lost.swap(false, Ordering::Relaxed);
        let mut record = LogRecord::new(level, site, producer, payload).with_flags(RecordFlags {
            follows_drop,
            truncated: false,
        });
        if let Some(tag) = self.tag {
            record = record.with_tag(tag);
        }

        match context.ring.push(&record) {
            Ok(sequence) => Ok(sequence),
            Err(err) => {
                if follows_drop || err == PushError::Full {
                    context.lost.store(true, Ordering::Relaxed);
                }
                if err == PushError::Full {
                    if let Some(on_drop) = &context.on_drop {
                        on_drop(&DropEvent {
                            level,
                            total_dropped: context.ring.dropped(),
                        });
                    }
                }
                Err(err)
            }
        }
    }
}

/// Module name for a source path: the file stem, or the directory of a
/// `mod.rs`, `lib.rs` or `main.rs`
fn module_name(path: &'static str) -> &'static str {
    let mut parts = path.rsplit(['/', '\\']);
    let file = parts.next().unwrap_or(path);
    let stem = file.strip_suffix(".rs").unwrap_or(file);
    match stem {
        "mod" | "lib" | "main" => parts.next().filter(|dir| !dir.is_empty()).unwrap_or(stem),
        _ => stem,
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("attached", &self.is_attached())
            .field("tag", &self.tag)
            .field("component", &self.component)
            .finish()
    }
}
