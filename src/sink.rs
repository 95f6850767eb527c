//! Record destinations
//!
//! A [`Sink`] receives every record that passed the filter chain, already
//! rendered into a [`RenderedRecord`]. Sinks run on the consumer thread, one
//! after another in registration order.

use crate::builder::StringBuilder;
use crate::error::SinkError;
use crate::level::Level;
use crate::record::{LogRecord, ProducerId, RecordFlags, Timestamp};
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::sync::Arc;

/// strftime pattern of the default line format
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A record with its message rendered, as handed to sinks
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRecord {
    /// Claim index in the ring buffer
    pub sequence: u64,
    /// When the record was created
    pub timestamp: Timestamp,
    /// Severity
    pub level: Level,
    /// Emitting process and, for threaded records, thread
    pub producer: ProducerId,
    /// Module path of the call site
    pub component: String,
    /// Optional sub-component label
    pub tag: Option<String>,
    /// File name of the call site
    pub file: String,
    /// Line of the call site
    pub line: u32,
    /// Condition flags
    pub flags: RecordFlags,
    /// Final message text
    pub message: String,
}

impl RenderedRecord {
    /// Render a decoded record claimed at `sequence`
    pub fn new(sequence: u64, record: LogRecord) -> Self {
        let parts = record.into_parts();
        Self {
            sequence,
            timestamp: parts.timestamp,
            level: parts.level,
            producer: parts.producer,
            component: parts.component,
            tag: parts.tag,
            file: parts.file,
            line: parts.line,
            flags: parts.flags,
            message: parts.payload.render(),
        }
    }

    /// Default line format without a trailing newline
    ///
    /// `YYYY-MM-DD HH:MM:SS.uuuuuu LEVEL pid[:tid] component[/tag] file:line msg`
    pub fn to_builder(&self) -> Result<StringBuilder<'_>, fmt::Error> {
        let mut sb = StringBuilder::new();
        sb.append_time_formatted(TIME_FORMAT, &self.timestamp.wall_time())?;
        write!(sb, " {} {} {}", self.level, self.producer, self.component)?;
        if let Some(tag) = &self.tag {
            write!(sb, "/{tag}")?;
        }
        write!(sb, " {}:{} ", self.file, self.line)?;
        sb.append_reference(self.message.as_str());
        Ok(sb)
    }
}

impl fmt::Display for RenderedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_builder()?, f)
    }
}

/// Destination for rendered records
pub trait Sink: Send {
    /// Deliver one record
    fn write(&mut self, record: &RenderedRecord) -> Result<(), SinkError>;

    /// Push buffered output out; called when the ring goes idle and at shutdown
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Label used when reporting failures
    fn name(&self) -> &str {
        "sink"
    }
}

impl<F> Sink for F
where
    F: FnMut(&RenderedRecord) -> Result<(), SinkError> + Send,
{
    fn write(&mut self, record: &RenderedRecord) -> Result<(), SinkError> {
        self(record)
    }
}

/// Writes one formatted line per record to any `io::Write`
pub struct WriterSink<W> {
    name: String,
    writer: W,
}

impl WriterSink<io::Stderr> {
    /// Sink writing to standard error
    pub fn stderr() -> Self {
        Self::new("stderr", io::stderr())
    }
}

impl<W: Write + Send> WriterSink<W> {
    /// Wrap a writer under the given name
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn write(&mut self, record: &RenderedRecord) -> Result<(), SinkError> {
        let line = record
            .to_builder()
            .map_err(|_| SinkError::Rejected("unformattable timestamp".into()))?;
        for slice in line.as_io_slices() {
            self.writer.write_all(&slice)?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Collects records in memory; clones share the same storage
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<RenderedRecord>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far
    pub fn records(&self) -> Vec<RenderedRecord> {
        self.records.lock().clone()
    }

    /// Messages received so far, in delivery order
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Number of records received
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing was received
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Sink for MemorySink {
    fn write(&mut self, record: &RenderedRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Arg, CallSite, Payload, ThreadTag};

    static SITE: CallSite = CallSite::new("app::net", "src/net.rs", 42);

    fn rendered() -> RenderedRecord {
        let producer = ProducerId {
            pid: 77,
            thread: Some(ThreadTag {
                ordinal: 3,
                name: None,
            }),
        };
        let record = LogRecord::new(
            Level::Warning,
            &SITE,
            producer,
            Payload::Deferred {
                spec: "retry {} of {}".into(),
                args: vec![Arg::from(2u32), Arg::from(5u32)],
            },
        )
        .with_tag("conn");
        RenderedRecord::new(9, record)
    }

    #[test]
    fn test_deferred_payload_is_rendered() {
        let record = rendered();
        assert_eq!(record.sequence, 9);
        assert_eq!(record.message, "retry 2 of 5");
    }

    #[test]
    fn test_line_format() {
        let line = rendered().to_string();
        let (date, rest) = line.split_at(26);
        assert_eq!(date.len(), 26);
        assert_eq!(&date[4..5], "-");
        assert_eq!(&date[19..20], ".");
        assert_eq!(rest, " WARNING 77:3 app::net/conn net.rs:42 retry 2 of 5");
    }

    #[test]
    fn test_writer_sink_lines() {
        let mut sink = WriterSink::new("buffer", Vec::new());
        sink.write(&rendered()).unwrap();
        sink.write(&rendered()).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.name(), "buffer");

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("net.rs:42 retry 2 of 5"));
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |r: &RenderedRecord| -> Result<(), SinkError> {
                seen.push(r.sequence);
                Ok(())
            };
            Sink::write(&mut sink, &rendered()).unwrap();
            assert_eq!(Sink::name(&sink), "sink");
        }
        assert_eq!(seen, vec![9]);
    }

    #[test]
    fn test_memory_sink_clones_share_storage() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write(&rendered()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.messages(), vec!["retry 2 of 5".to_string()]);
    }
}
