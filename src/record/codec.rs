//! Position-independent slot encoding for records
//!
//! All integers are little-endian; strings are a `u32` length followed by
//! UTF-8 bytes. The layout never stores pointers, so any process mapping the
//! segment can decode it:
//!
//! ```text
//! u64 mono_ns | u64 wall_ns | u8 level | u8 flags | u16 reserved | u32 pid
//! u64 thread_ordinal (0 = none) | u32 line
//! str thread_name | str component | str tag | str file
//! u8 kind = 0: str message
//! u8 kind = 1: str spec | u16 argc | (u8 arg_kind, value)*
//! ```

use super::{Arg, LogRecord, Payload, ProducerId, RecordFlags, ThreadTag, Timestamp};
use crate::error::{LogError, LogResult};
use crate::level::Level;
use std::borrow::Cow;

/// Bytes taken by the fixed-width head
pub const HEAD_LEN: usize = 36;

/// Metadata strings are cut to this many bytes
pub const MAX_META_LEN: usize = 64;

/// Largest encoding of everything except the message
pub const MAX_METADATA_LEN: usize = HEAD_LEN + 4 * (4 + MAX_META_LEN) + 1;

/// Deferred records with more arguments are rendered by the producer
pub const MAX_DEFERRED_ARGS: usize = u16::MAX as usize;

const KIND_RENDERED: u8 = 0;
const KIND_DEFERRED: u8 = 1;

const ARG_INT: u8 = 0;
const ARG_UINT: u8 = 1;
const ARG_FLOAT: u8 = 2;
const ARG_BOOL: u8 = 3;
const ARG_CHAR: u8 = 4;
const ARG_STR: u8 = 5;

enum Body<'r> {
    Rendered(&'r str),
    Deferred { spec: &'r str, args: &'r [Arg] },
}

fn metadata(record: &LogRecord) -> [&str; 4] {
    let thread_name = record
        .producer
        .thread
        .as_ref()
        .and_then(|thread| thread.name.as_deref())
        .unwrap_or("");
    [
        truncate_utf8(thread_name, MAX_META_LEN),
        truncate_utf8(&record.component, MAX_META_LEN),
        truncate_utf8(record.tag.as_deref().unwrap_or(""), MAX_META_LEN),
        truncate_utf8(&record.file, MAX_META_LEN),
    ]
}

fn metadata_len(meta: &[&str; 4]) -> usize {
    HEAD_LEN + meta.iter().map(|s| str_len(s)).sum::<usize>() + 1
}

/// Bytes [`encode`] needs to store `record` without truncating it
pub fn encoded_len(record: &LogRecord) -> usize {
    metadata_len(&metadata(record))
        + match &record.payload {
            Payload::Rendered(message) => str_len(message),
            Payload::Deferred { spec, args } if args.len() <= MAX_DEFERRED_ARGS => {
                deferred_len(spec, args)
            }
            deferred => str_len(&deferred.render()),
        }
}

/// Encode `record` into `out`, truncating the message if it does not fit
///
/// Returns the number of bytes written, or `None` if not even the metadata
/// fits.
pub fn encode(record: &LogRecord, out: &mut [u8]) -> Option<usize> {
    let meta = metadata(record);
    let budget = out.len().checked_sub(metadata_len(&meta))?;

    let mut flags = record.flags;
    let text: Cow<'_, str>;
    let body = match &record.payload {
        Payload::Deferred { spec, args }
            if args.len() <= MAX_DEFERRED_ARGS && deferred_len(spec, args) <= budget =>
        {
            Body::Deferred { spec, args }
        }
        payload => {
            text = match payload {
                Payload::Rendered(message) => Cow::Borrowed(message.as_str()),
                deferred => Cow::Owned(deferred.render()),
            };
            let max = budget.checked_sub(4)?;
            if text.len() > max {
                flags.truncated = true;
            }
            Body::Rendered(truncate_utf8(&text, max))
        }
    };

    let mut w = SliceWriter { buf: out, pos: 0 };
    w.put_u64(record.timestamp.monotonic_ns);
    w.put_u64(record.timestamp.wall_ns);
    w.put_u8(record.level.as_u8());
    w.put_u8(flags.bits());
    w.put_u16(0);
    w.put_u32(record.producer.pid);
    w.put_u64(record.producer.thread.as_ref().map_or(0, |t| t.ordinal));
    w.put_u32(record.line);
    for s in meta {
        w.put_str(s);
    }
    match body {
        Body::Rendered(message) => {
            w.put_u8(KIND_RENDERED);
            w.put_str(message);
        }
        Body::Deferred { spec, args } => {
            w.put_u8(KIND_DEFERRED);
            w.put_str(spec);
            w.put_u16(args.len() as u16);
            for arg in args {
                w.put_arg(arg);
            }
        }
    }
    Some(w.pos)
}

/// Decode a record previously written by [`encode`]
pub fn decode(bytes: &[u8]) -> LogResult<LogRecord> {
    let mut r = SliceReader { buf: bytes, pos: 0 };
    let monotonic_ns = r.get_u64()?;
    let wall_ns = r.get_u64()?;
    let level = Level::from_u8(r.get_u8()?).ok_or(LogError::Decode {
        reason: "unknown level",
    })?;
    let flags = RecordFlags::from_bits(r.get_u8()?);
    r.get_u16()?;
    let pid = r.get_u32()?;
    let ordinal = r.get_u64()?;
    let line = r.get_u32()?;
    let thread_name = r.get_str()?;
    let component = r.get_str()?;
    let tag = r.get_str()?;
    let file = r.get_str()?;

    let payload = match r.get_u8()? {
        KIND_RENDERED => Payload::Rendered(r.get_str()?),
        KIND_DEFERRED => {
            let spec = r.get_str()?;
            let argc = r.get_u16()? as usize;
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(r.get_arg()?);
            }
            Payload::Deferred {
                spec: Cow::Owned(spec),
                args,
            }
        }
        _ => {
            return Err(LogError::Decode {
                reason: "unknown payload kind",
            })
        }
    };

    let thread = (ordinal != 0).then(|| ThreadTag {
        ordinal,
        name: (!thread_name.is_empty()).then_some(thread_name),
    });

    Ok(LogRecord {
        timestamp: Timestamp {
            monotonic_ns,
            wall_ns,
        },
        level,
        producer: ProducerId { pid, thread },
        component: Cow::Owned(component),
        tag: (!tag.is_empty()).then_some(Cow::Owned(tag)),
        file: Cow::Owned(file),
        line,
        payload,
        flags,
    })
}

fn str_len(s: &str) -> usize {
    4 + s.len()
}

fn arg_len(arg: &Arg) -> usize {
    1 + match arg {
        Arg::Int(_) | Arg::UInt(_) | Arg::Float(_) => 8,
        Arg::Bool(_) => 1,
        Arg::Char(_) => 4,
        Arg::Str(s) => str_len(s),
    }
}

fn deferred_len(spec: &str, args: &[Arg]) -> usize {
    str_len(spec) + 2 + args.iter().map(arg_len).sum::<usize>()
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char boundary
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

struct SliceWriter<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl SliceWriter<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    fn put_u16(&mut self, v: u16) {
        self.put(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.put(s.as_bytes());
    }

    fn put_arg(&mut self, arg: &Arg) {
        match arg {
            Arg::Int(v) => {
                self.put_u8(ARG_INT);
                self.put(&v.to_le_bytes());
            }
            Arg::UInt(v) => {
                self.put_u8(ARG_UINT);
                self.put_u64(*v);
            }
            Arg::Float(v) => {
                self.put_u8(ARG_FLOAT);
                self.put_u64(v.to_bits());
            }
            Arg::Bool(v) => {
                self.put_u8(ARG_BOOL);
                self.put_u8(*v as u8);
            }
            Arg::Char(v) => {
                self.put_u8(ARG_CHAR);
                self.put_u32(*v as u32);
            }
            Arg::Str(v) => {
                self.put_u8(ARG_STR);
                self.put_str(v);
            }
        }
    }
}

struct SliceReader<'b> {
    buf: &'b [u8],
    pos: usize,
}

impl<'b> SliceReader<'b> {
    fn take(&mut self, n: usize) -> LogResult<&'b [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(LogError::Decode {
                reason: "record truncated",
            }),
        }
    }

    fn get_array<const N: usize>(&mut self) -> LogResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn get_u8(&mut self) -> LogResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> LogResult<u16> {
        self.get_array().map(u16::from_le_bytes)
    }

    fn get_u32(&mut self) -> LogResult<u32> {
        self.get_array().map(u32::from_le_bytes)
    }

    fn get_u64(&mut self) -> LogResult<u64> {
        self.get_array().map(u64::from_le_bytes)
    }

    fn get_str(&mut self) -> LogResult<String> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| LogError::Decode {
            reason: "invalid UTF-8",
        })
    }

    fn get_arg(&mut self) -> LogResult<Arg> {
        Ok(match self.get_u8()? {
            ARG_INT => Arg::Int(self.get_array().map(i64::from_le_bytes)?),
            ARG_UINT => Arg::UInt(self.get_u64()?),
            ARG_FLOAT => Arg::Float(f64::from_bits(self.get_u64()?)),
            ARG_BOOL => Arg::Bool(self.get_u8()? != 0),
            ARG_CHAR => Arg::Char(char::from_u32(self.get_u32()?).ok_or(LogError::Decode {
                reason: "invalid char",
            })?),
            ARG_STR => Arg::Str(self.get_str()?),
            _ => {
                return Err(LogError::Decode {
                    reason: "unknown argument kind",
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CallSite;

    const SITE: CallSite = CallSite::new("shmlog::codec", "src/record/codec.rs", 42);

    #[test]
    fn test_threaded_deferred_record_survives_encoding() {
        let record = LogRecord::new(
            Level::Notice,
            &SITE,
            ProducerId::threaded(),
            Payload::Deferred {
                spec: Cow::Borrowed("{} {} {}"),
                args: vec![Arg::from('x'), Arg::from(1.5f64), Arg::from(true)],
            },
        )
        .with_tag("net");

        let mut slot = [0u8; 488];
        let len = encode(&record, &mut slot).unwrap();
        let decoded = decode(&slot[..len]).unwrap();

        assert_eq!(decoded.level(), Level::Notice);
        assert_eq!(decoded.tag(), Some("net"));
        assert_eq!(decoded.file(), "codec.rs");
        assert_eq!(decoded.producer().pid, record.producer().pid);
        assert_eq!(
            decoded.producer().thread.as_ref().map(|t| t.ordinal),
            record.producer().thread.as_ref().map(|t| t.ordinal)
        );
        assert_eq!(decoded.payload().render(), "x 1.5 true");
        assert!(!decoded.flags().truncated);
    }

    #[test]
    fn test_long_message_is_truncated_on_char_boundary() {
        let message = "é".repeat(400);
        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Rendered(message),
        );

        let mut slot = [0u8; 256];
        let len = encode(&record, &mut slot).unwrap();
        let decoded = decode(&slot[..len]).unwrap();

        assert!(decoded.flags().truncated);
        match decoded.payload() {
            Payload::Rendered(text) => {
                assert!(!text.is_empty());
                assert!(text.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_oversized_deferred_is_rendered_eagerly() {
        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Deferred {
                spec: Cow::Borrowed("{}"),
                args: vec![Arg::from("y".repeat(500))],
            },
        );

        let mut slot = [0u8; 256];
        let len = encode(&record, &mut slot).unwrap();
        let decoded = decode(&slot[..len]).unwrap();
        assert!(!decoded.payload().is_deferred());
        assert!(decoded.flags().truncated);
    }

    #[test]
    fn test_corrupt_input_is_rejected() {
        assert!(decode(&[1, 2, 3]).is_err());

        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Rendered("ok".into()),
        );
        let mut slot = [0u8; 256];
        let len = encode(&record, &mut slot).unwrap();
        slot[16] = 42; // level byte
        assert!(decode(&slot[..len]).is_err());
    }

    #[test]
    fn test_encoded_len_matches_untruncated_encoding() {
        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::threaded(),
            Payload::Deferred {
                spec: Cow::Borrowed("{} and {}"),
                args: vec![Arg::from("left"), Arg::from(-3i32)],
            },
        );
        let mut out = vec![0u8; 4096];
        assert_eq!(encode(&record, &mut out), Some(encoded_len(&record)));

        let long = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Rendered("z".repeat(3000)),
        );
        assert_eq!(encode(&long, &mut out), Some(encoded_len(&long)));
    }

    #[test]
    fn test_too_many_deferred_args_are_rendered() {
        let spec = "{}".repeat(MAX_DEFERRED_ARGS + 2);
        let args: Vec<Arg> = (0..MAX_DEFERRED_ARGS + 2).map(|_| Arg::from(true)).collect();
        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Deferred {
                spec: Cow::Owned(spec),
                args,
            },
        );

        let mut out = vec![0u8; encoded_len(&record)];
        let len = encode(&record, &mut out).unwrap();
        let decoded = decode(&out[..len]).unwrap();

        assert!(!decoded.payload().is_deferred(), "Argument count must not wrap");
        assert!(!decoded.flags().truncated);
        assert_eq!(decoded.payload().render(), "true".repeat(MAX_DEFERRED_ARGS + 2));
    }

    #[test]
    fn test_slot_too_small_for_metadata() {
        let record = LogRecord::new(
            Level::Info,
            &SITE,
            ProducerId::process(),
            Payload::Rendered("ok".into()),
        );
        let mut slot = [0u8; 16];
        assert_eq!(encode(&record, &mut slot), None);
    }
}
