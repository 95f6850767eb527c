//! Immutable log records
//!
//! A [`LogRecord`] is the snapshot of one emitted event. Producers build it
//! on their own stack and the ring buffer copies its encoded form into a
//! slot; the consumer decodes a fresh owned record on the other side.
//!
//! The message is either rendered eagerly by the producer or carried as a
//! deferred `{}` format spec plus captured [`Arg`] values that the consumer
//! renders only after the record passed the filter chain.

pub mod codec;

use crate::builder::StringBuilder;
use crate::level::Level;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Point in time captured when a record is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// `CLOCK_MONOTONIC` nanoseconds, comparable across processes on one host
    pub monotonic_ns: u64,
    /// Nanoseconds since the Unix epoch
    pub wall_ns: u64,
}

impl Timestamp {
    /// Capture the current time
    pub fn now() -> Self {
        let monotonic_ns = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
            .map(|ts| ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64)
            .unwrap_or_default();
        let wall_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            monotonic_ns,
            wall_ns,
        }
    }

    /// Wall-clock time as a `SystemTime`
    pub fn wall_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.wall_ns)
    }
}

static NEXT_THREAD_ORDINAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ORDINAL: u64 = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
}

/// Identity of the thread that emitted a threaded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTag {
    /// Process-unique ordinal, starting at 1
    pub ordinal: u64,
    /// Thread name, if the thread was named
    pub name: Option<String>,
}

impl ThreadTag {
    /// Tag for the calling thread
    pub fn current() -> Self {
        Self {
            ordinal: THREAD_ORDINAL.with(|ordinal| *ordinal),
            name: std::thread::current().name().map(str::to_owned),
        }
    }
}

/// Who produced a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerId {
    /// Process id of the producer
    pub pid: u32,
    /// Present only on threaded records
    pub thread: Option<ThreadTag>,
}

impl ProducerId {
    /// The current process, without thread attribution
    pub fn process() -> Self {
        Self {
            pid: std::process::id(),
            thread: None,
        }
    }

    /// The current process and calling thread
    pub fn threaded() -> Self {
        Self {
            pid: std::process::id(),
            thread: Some(ThreadTag::current()),
        }
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread {
            Some(ThreadTag {
                name: Some(name), ..
            }) => write!(f, "{}:{}", self.pid, name),
            Some(thread) => write!(f, "{}:{}", self.pid, thread.ordinal),
            None => write!(f, "{}", self.pid),
        }
    }
}

/// Static description of a logging call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Module path of the call site
    pub component: &'static str,
    /// Source file of the call site
    pub file: &'static str,
    /// Source line of the call site
    pub line: u32,
}

impl CallSite {
    /// Describe a call site
    pub const fn new(component: &'static str, file: &'static str, line: u32) -> Self {
        Self {
            component,
            file,
            line,
        }
    }
}

/// A value captured by a deferred record
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point number
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Single character
    Char(char),
    /// Owned string
    Str(String),
}

macro_rules! arg_from {
    ($variant:ident as $target:ty: $($source:ty),+) => {
        $(
            impl From<$source> for Arg {
                fn from(value: $source) -> Self {
                    Arg::$variant(value as $target)
                }
            }
        )+
    };
}

arg_from!(Int as i64: i8, i16, i32, i64, isize);
arg_from!(UInt as u64: u8, u16, u32, u64, usize);
arg_from!(Float as f64: f32, f64);

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<char> for Arg {
    fn from(value: char) -> Self {
        Arg::Char(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Str(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Str(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Str(value.clone())
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::UInt(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
            Arg::Bool(v) => write!(f, "{v}"),
            Arg::Char(v) => write!(f, "{v}"),
            Arg::Str(v) => f.write_str(v),
        }
    }
}

/// Message carried by a record
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Text rendered by the producer
    Rendered(String),
    /// Format spec and captured arguments rendered by the consumer
    Deferred {
        /// `{}` placeholders, `{{` and `}}` for literal braces
        spec: Cow<'static, str>,
        /// Values substituted in order
        args: Vec<Arg>,
    },
}

impl Payload {
    /// Whether rendering is postponed to the consumer
    pub fn is_deferred(&self) -> bool {
        matches!(self, Payload::Deferred { .. })
    }

    /// Render the message into `sb`
    pub fn render_into(&self, sb: &mut StringBuilder<'_>) {
        match self {
            Payload::Rendered(text) => {
                sb.append_copy(text);
            }
            Payload::Deferred { spec, args } => render_deferred(spec, args, sb),
        }
    }

    /// Render the message as a string
    pub fn render(&self) -> String {
        match self {
            Payload::Rendered(text) => text.clone(),
            Payload::Deferred { .. } => {
                let mut sb = StringBuilder::new();
                self.render_into(&mut sb);
                String::from_utf8(sb.into_bytes())
                    .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
            }
        }
    }
}

/// Substitute `args` into `spec`; missing arguments render as `{?}`
fn render_deferred(spec: &str, args: &[Arg], sb: &mut StringBuilder<'_>) {
    let mut args = args.iter();
    let mut rest = spec;
    while let Some(idx) = rest.find(['{', '}']) {
        sb.append_copy(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with("{{") {
            sb.append_copy("{");
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            sb.append_copy("}");
            rest = &tail[2..];
        } else if tail.starts_with("{}") {
            match args.next() {
                // Arg's Display never fails
                Some(arg) => {
                    let _ = sb.append_formatted(format_args!("{arg}"));
                }
                None => {
                    sb.append_copy("{?}");
                }
            }
            rest = &tail[2..];
        } else {
            sb.append_copy(&tail[..1]);
            rest = &tail[1..];
        }
    }
    sb.append_copy(rest);
}

/// Per-record condition flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFlags {
    /// Records from this producer were dropped since its last successful push
    pub follows_drop: bool,
    /// The message was cut to fit a slot
    pub truncated: bool,
}

impl RecordFlags {
    const FOLLOWS_DROP: u8 = 1 << 0;
    const TRUNCATED: u8 = 1 << 1;

    pub(crate) fn bits(self) -> u8 {
        let mut bits = 0;
        if self.follows_drop {
            bits |= Self::FOLLOWS_DROP;
        }
        if self.truncated {
            bits |= Self::TRUNCATED;
        }
        bits
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            follows_drop: bits & Self::FOLLOWS_DROP != 0,
            truncated: bits & Self::TRUNCATED != 0,
        }
    }
}

/// Immutable snapshot of one emitted event
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    timestamp: Timestamp,
    level: Level,
    producer: ProducerId,
    component: Cow<'static, str>,
    tag: Option<Cow<'static, str>>,
    file: Cow<'static, str>,
    line: u32,
    payload: Payload,
    flags: RecordFlags,
}

impl LogRecord {
    /// Capture a record for `site`, stamped with the current time
    pub fn new(level: Level, site: &CallSite, producer: ProducerId, payload: Payload) -> Self {
        Self {
            timestamp: Timestamp::now(),
            level,
            producer,
            component: Cow::Borrowed(site.component),
            tag: None,
            file: Cow::Borrowed(file_name(site.file)),
            line: site.line,
            payload,
            flags: RecordFlags::default(),
        }
    }

    /// Attach a tag
    pub fn with_tag(mut self, tag: impl Into<Cow<'static, str>>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Replace the condition flags
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// When the record was created
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Severity
    pub fn level(&self) -> Level {
        self.level
    }

    /// Emitting process and, for threaded records, thread
    pub fn producer(&self) -> &ProducerId {
        &self.producer
    }

    /// Module path of the call site
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Optional sub-component label
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// File name of the call site
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Line of the call site
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Message payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Condition flags
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub(crate) fn into_parts(self) -> RecordParts {
        RecordParts {
            timestamp: self.timestamp,
            level: self.level,
            producer: self.producer,
            component: self.component.into_owned(),
            tag: self.tag.map(Cow::into_owned),
            file: self.file.into_owned(),
            line: self.line,
            payload: self.payload,
            flags: self.flags,
        }
    }
}

/// Owned fields of a record, used when it is turned into a rendered record
pub(crate) struct RecordParts {
    pub timestamp: Timestamp,
    pub level: Level,
    pub producer: ProducerId,
    pub component: String,
    pub tag: Option<String>,
    pub file: String,
    pub line: u32,
    pub payload: Payload,
    pub flags: RecordFlags,
}

/// Strip directories from a source path
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
