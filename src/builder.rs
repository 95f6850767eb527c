//! Segmented string builder used to assemble message payloads
//!
//! A `StringBuilder` is an ordered list of byte segments. Each segment is
//! governed by exactly one ownership discipline:
//!
//! - copied bytes land in a builder-owned arena that grows geometrically
//! - adopted buffers are moved in and freed by the builder
//! - referenced bytes are borrowed for the builder's lifetime `'a`
//!
//! Together the segments read as one logically contiguous byte sequence.
//! Formatted appends write straight into the arena and roll back on failure,
//! so a failed append never leaves half-written content behind.

use chrono::format::StrftimeItems;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::io::IoSlice;
use std::time::SystemTime;

/// First allocation made for the copy arena
const FIRST_ARENA_SIZE: usize = 64;

#[derive(Debug)]
enum Segment<'a> {
    /// Builder-owned arena receiving copied and formatted bytes
    Arena(Vec<u8>),
    /// Buffer adopted from the caller
    Adopted(Vec<u8>),
    /// Borrowed bytes that outlive the builder
    Borrowed(&'a [u8]),
}

impl<'a> Segment<'a> {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Segment::Arena(buf) | Segment::Adopted(buf) => buf,
            Segment::Borrowed(bytes) => bytes,
        }
    }

    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Keep only `lo..hi` of this segment without copying borrowed bytes
    fn narrow(self, lo: usize, hi: usize) -> Segment<'a> {
        match self {
            Segment::Arena(mut buf) => {
                buf.truncate(hi);
                buf.drain(..lo);
                Segment::Arena(buf)
            }
            Segment::Adopted(mut buf) => {
                buf.truncate(hi);
                buf.drain(..lo);
                Segment::Adopted(buf)
            }
            Segment::Borrowed(bytes) => Segment::Borrowed(&bytes[lo..hi]),
        }
    }
}

/// A location inside a builder's content
///
/// Positions are only meaningful for the builder that produced them and only
/// until that builder is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    segment: usize,
    offset: usize,
}

/// Sources accepted by [`StringBuilder::append_time_formatted`]
pub trait TimeInput {
    /// Write `self` formatted with a strftime-style `format` into `out`
    fn write_strftime(&self, format: &str, out: &mut dyn fmt::Write) -> fmt::Result;
}

impl TimeInput for SystemTime {
    fn write_strftime(&self, format: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        DateTime::<Local>::from(*self).write_strftime(format, out)
    }
}

impl<Tz: TimeZone> TimeInput for DateTime<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn write_strftime(&self, format: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        let items = StrftimeItems::new(format);
        write!(out, "{}", self.format_with_items(items))
    }
}

impl TimeInput for NaiveDateTime {
    fn write_strftime(&self, format: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        let items = StrftimeItems::new(format);
        write!(out, "{}", self.format_with_items(items))
    }
}

/// Snapshot used to undo a failed formatted append
#[derive(Clone, Copy)]
struct Mark {
    segments: usize,
    tail_len: usize,
    len: usize,
}

/// Growable, segmented byte buffer with explicit ownership per segment
#[derive(Debug, Default)]
pub struct StringBuilder<'a> {
    segments: Vec<Segment<'a>>,
    len: usize,
}

impl<'a> StringBuilder<'a> {
    /// Create an empty builder; nothing is allocated until content arrives
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            len: 0,
        }
    }

    /// Total number of content bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the builder holds no content
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of segments backing the content
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Remove all content, releasing adopted buffers
    pub fn clear(&mut self) -> &mut Self {
        self.segments.clear();
        self.len = 0;
        self
    }

    /// Position of the first byte
    pub fn begin(&self) -> Position {
        self.normalize(Position { segment: 0, offset: 0 })
    }

    /// Position one past the last byte
    pub fn end(&self) -> Position {
        Position {
            segment: self.segments.len(),
            offset: 0,
        }
    }

    /// Position of the byte at `index`, clamped to [`end`](Self::end)
    pub fn position_at(&self, index: usize) -> Position {
        let mut remaining = index;
        for (segment, seg) in self.segments.iter().enumerate() {
            if remaining < seg.len() {
                return Position {
                    segment,
                    offset: remaining,
                };
            }
            remaining -= seg.len();
        }
        self.end()
    }

    /// Byte offset of `pos` from the beginning of the content
    pub fn offset_of(&self, pos: Position) -> usize {
        let before: usize = self.segments[..pos.segment.min(self.segments.len())]
            .iter()
            .map(Segment::len)
            .sum();
        before + pos.offset
    }

    fn normalize(&self, mut pos: Position) -> Position {
        while pos.segment < self.segments.len() && pos.offset >= self.segments[pos.segment].len() {
            pos.offset -= self.segments[pos.segment].len();
            pos.segment += 1;
        }
        if pos.segment >= self.segments.len() {
            return self.end();
        }
        pos
    }

    /// Borrowed slices covering `start..end`
    fn slices(&self, start: Position, end: Position) -> impl Iterator<Item = &[u8]> + '_ {
        let (start, end) = ordered(self.normalize(start), self.normalize(end));
        self.segments
            .iter()
            .enumerate()
            .skip(start.segment)
            .take_while(move |(idx, _)| *idx <= end.segment && *idx < self.segments.len())
            .filter_map(move |(idx, seg)| {
                let bytes = seg.as_bytes();
                let lo = if idx == start.segment { start.offset } else { 0 };
                let hi = if idx == end.segment { end.offset } else { bytes.len() };
                (lo < hi).then(|| &bytes[lo..hi])
            })
    }

    /// The arena at the tail, with room for at least `additional` bytes
    fn arena_tail(&mut self, additional: usize) -> &mut Vec<u8> {
        if !matches!(self.segments.last(), Some(Segment::Arena(_))) {
            self.segments
                .push(Segment::Arena(Vec::with_capacity(additional.max(FIRST_ARENA_SIZE))));
        }
        match self.segments.last_mut() {
            Some(Segment::Arena(buf)) => {
                let free = buf.capacity() - buf.len();
                if free < additional {
                    // At least double so repeated small copies stay amortized
                    let grow = additional.max(buf.capacity());
                    buf.reserve_exact(grow);
                }
                buf
            }
            _ => unreachable!("tail segment was just made an arena"),
        }
    }

    fn mark(&self) -> Mark {
        let tail_len = match self.segments.last() {
            Some(Segment::Arena(buf)) => buf.len(),
            _ => 0,
        };
        Mark {
            segments: self.segments.len(),
            tail_len,
            len: self.len,
        }
    }

    fn rollback(&mut self, mark: Mark) {
        self.segments.truncate(mark.segments);
        if let Some(Segment::Arena(buf)) = self.segments.last_mut() {
            buf.truncate(mark.tail_len);
        }
        self.len = mark.len;
    }

    /// Copy `bytes` into the builder-owned arena
    ///
    /// The caller may mutate or free its buffer afterwards.
    pub fn append_copy(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let bytes = bytes.as_ref();
        if !bytes.is_empty() {
            self.arena_tail(bytes.len()).extend_from_slice(bytes);
            self.len += bytes.len();
        }
        self
    }

    /// Copy the whole content of another builder
    pub fn append_copy_builder(&mut self, other: &StringBuilder<'_>) -> &mut Self {
        self.append_copy_range(other, other.begin(), other.end())
    }

    /// Copy the content of `other` between two positions
    pub fn append_copy_range(
        &mut self,
        other: &StringBuilder<'_>,
        start: Position,
        end: Position,
    ) -> &mut Self {
        for slice in other.slices(start, end) {
            self.append_copy(slice);
        }
        self
    }

    /// Take ownership of a heap buffer; it is freed when the builder drops
    ///
    /// Adopting an empty buffer is a no-op.
    pub fn append_adopt(&mut self, buffer: impl Into<Vec<u8>>) -> &mut Self {
        let buffer = buffer.into();
        if !buffer.is_empty() {
            self.len += buffer.len();
            self.segments.push(Segment::Adopted(buffer));
        }
        self
    }

    /// Take over every segment of another builder without copying
    pub fn append_adopt_builder(&mut self, other: StringBuilder<'a>) -> &mut Self {
        let (begin, end) = (other.begin(), other.end());
        self.append_adopt_range(other, begin, end)
    }

    /// Take over the segments of `other` that fall between two positions
    ///
    /// Segments outside the range are released with `other`.
    pub fn append_adopt_range(
        &mut self,
        other: StringBuilder<'a>,
        start: Position,
        end: Position,
    ) -> &mut Self {
        let (start, end) = ordered(other.normalize(start), other.normalize(end));
        for (idx, seg) in other.segments.into_iter().enumerate() {
            if idx < start.segment || idx > end.segment {
                continue;
            }
            let lo = if idx == start.segment { start.offset } else { 0 };
            let hi = if idx == end.segment { end.offset } else { seg.len() };
            if lo < hi {
                let seg = seg.narrow(lo, hi);
                self.len += seg.len();
                self.segments.push(seg);
            }
        }
        self
    }

    /// Reference bytes without copying; they must outlive the builder
    pub fn append_reference<B>(&mut self, bytes: &'a B) -> &mut Self
    where
        B: AsRef<[u8]> + ?Sized,
    {
        let bytes = bytes.as_ref();
        if !bytes.is_empty() {
            self.len += bytes.len();
            self.segments.push(Segment::Borrowed(bytes));
        }
        self
    }

    /// Reference the whole content of another builder
    pub fn append_reference_builder(&mut self, other: &'a StringBuilder<'_>) -> &mut Self {
        self.append_reference_range(other, other.begin(), other.end())
    }

    /// Reference the content of `other` between two positions
    pub fn append_reference_range(
        &mut self,
        other: &'a StringBuilder<'_>,
        start: Position,
        end: Position,
    ) -> &mut Self {
        for slice in other.slices(start, end) {
            self.len += slice.len();
            self.segments.push(Segment::Borrowed(slice));
        }
        self
    }

    /// Append formatted text directly into the arena
    ///
    /// If any argument fails to format, the builder is restored to its prior
    /// content and the error is returned.
    pub fn append_formatted(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        let mark = self.mark();
        self.write_fmt(args).inspect_err(|_| self.rollback(mark))
    }

    /// Append a time rendered with a strftime-style format
    ///
    /// An invalid format string leaves the content unchanged and returns an
    /// error.
    pub fn append_time_formatted<T>(&mut self, format: &str, time: &T) -> fmt::Result
    where
        T: TimeInput + ?Sized,
    {
        let mark = self.mark();
        time.write_strftime(format, self)
            .inspect_err(|_| self.rollback(mark))
    }

    /// Reserve `len` zero-filled bytes in the arena for direct writes
    pub fn append_empty(&mut self, len: usize) -> &mut [u8] {
        self.len += len;
        let buf = self.arena_tail(len);
        let start = buf.len();
        buf.resize(start + len, 0);
        &mut buf[start..]
    }

    /// Position of the first occurrence of `needle`
    pub fn find(&self, needle: impl AsRef<[u8]>) -> Option<Position> {
        let needle = needle.as_ref();
        if needle.is_empty() {
            return Some(self.begin());
        }
        let content = self.contiguous();
        content
            .windows(needle.len())
            .position(|window| window == needle)
            .map(|index| self.position_at(index))
    }

    /// Iterate over the content bytes
    pub fn bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.segments
            .iter()
            .flat_map(|seg| seg.as_bytes().iter().copied())
    }

    /// Borrow the segments for a vectored write
    pub fn as_io_slices(&self) -> Vec<IoSlice<'_>> {
        self.segments
            .iter()
            .map(|seg| IoSlice::new(seg.as_bytes()))
            .collect()
    }

    /// Borrow the content as one slice, copying only when it is split
    pub fn contiguous(&self) -> Cow<'_, [u8]> {
        match self.segments.as_slice() {
            [] => Cow::Borrowed(&[]),
            [single] => Cow::Borrowed(single.as_bytes()),
            _ => Cow::Owned(self.to_vec()),
        }
    }

    /// Copy the content into a new vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segments {
            out.extend_from_slice(seg.as_bytes());
        }
        out
    }

    /// Content as text, replacing invalid UTF-8
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contiguous()).into_owned()
    }

    /// Consume the builder, reusing a lone owned segment without copying
    pub fn into_bytes(mut self) -> Vec<u8> {
        match self.segments.as_slice() {
            [Segment::Arena(_) | Segment::Adopted(_)] => match self.segments.pop() {
                Some(Segment::Arena(buf) | Segment::Adopted(buf)) => buf,
                _ => Vec::new(),
            },
            _ => self.to_vec(),
        }
    }
}

impl fmt::Write for StringBuilder<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.append_copy(s);
        Ok(())
    }
}

impl fmt::Display for StringBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            f.write_str(&String::from_utf8_lossy(seg.as_bytes()))?;
        }
        Ok(())
    }
}

fn ordered(a: Position, b: Position) -> (Position, Position) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct Failing;

    impl fmt::Display for Failing {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_copies_coalesce_into_arena() {
        let mut sb = StringBuilder::new();
        sb.append_copy("hello").append_copy(", ").append_copy("world");
        assert_eq!(sb.segment_count(), 1);
        assert_eq!(sb.to_string_lossy(), "hello, world");
        assert_eq!(sb.len(), 12);
    }

    #[test]
    fn test_mixed_disciplines() {
        let borrowed = String::from("borrowed");
        let mut sb = StringBuilder::new();
        sb.append_copy("copy|")
            .append_adopt(String::from("adopted|"))
            .append_reference(&borrowed);
        assert_eq!(sb.segment_count(), 3);
        assert_eq!(sb.to_vec(), b"copy|adopted|borrowed");
    }

    #[test]
    fn test_adopt_empty_is_noop() {
        let mut sb = StringBuilder::new();
        sb.append_adopt(Vec::new());
        assert!(sb.is_empty());
        assert_eq!(sb.segment_count(), 0);
    }

    #[test]
    fn test_formatted_failure_rolls_back() {
        let mut sb = StringBuilder::new();
        sb.append_copy("keep");
        let result = sb.append_formatted(format_args!("{} and {}", 1, Failing));
        assert!(result.is_err());
        assert_eq!(sb.to_string_lossy(), "keep");

        sb.append_formatted(format_args!(" {}-{}", 2, "ok")).unwrap();
        assert_eq!(sb.to_string_lossy(), "keep 2-ok");
    }

    #[test]
    fn test_time_formatted() {
        let time = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();
        let mut sb = StringBuilder::new();
        sb.append_time_formatted("%Y-%m-%d %H:%M:%S", &time).unwrap();
        assert_eq!(sb.to_string_lossy(), "2024-02-29 13:05:09");

        // A naive time has no offset to print
        assert!(sb.append_time_formatted(" %z", &time).is_err());
        assert_eq!(sb.to_string_lossy(), "2024-02-29 13:05:09");
    }

    #[test]
    fn test_append_empty_direct_write() {
        let mut sb = StringBuilder::new();
        sb.append_copy("ab");
        sb.append_empty(3).copy_from_slice(b"cde");
        assert_eq!(sb.to_string_lossy(), "abcde");
        assert_eq!(sb.len(), 5);
    }

    #[test]
    fn test_ranges_and_find() {
        let tail = "tail";
        let mut source = StringBuilder::new();
        source.append_copy("head-").append_adopt("body-").append_reference(tail);

        let start = source.find("dy").unwrap();
        let end = source.find("il").unwrap();
        assert_eq!(source.offset_of(start), 7);

        let mut copied = StringBuilder::new();
        copied.append_copy_range(&source, start, end);
        assert_eq!(copied.to_string_lossy(), "dy-ta");

        let mut referenced = StringBuilder::new();
        referenced.append_reference_range(&source, end, start);
        assert_eq!(referenced.to_string_lossy(), "dy-ta");
        assert_eq!(referenced.segment_count(), 2);
    }

    #[test]
    fn test_adopt_range_takes_segments() {
        let mut source = StringBuilder::new();
        source.append_copy("0123").append_adopt("4567").append_copy("89");
        let start = source.position_at(2);
        let end = source.position_at(9);

        let mut sb = StringBuilder::new();
        sb.append_adopt_range(source, start, end);
        assert_eq!(sb.to_string_lossy(), "2345678");
        assert_eq!(sb.len(), 7);
    }

    #[test]
    fn test_into_bytes_reuses_single_segment() {
        let mut sb = StringBuilder::new();
        sb.append_formatted(format_args!("x={}", 42)).unwrap();
        assert_eq!(sb.into_bytes(), b"x=42");
    }
}
