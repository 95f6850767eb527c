//! Shared-memory layout of the ring buffer
//!
//! The mapped region is a flat byte range with a fixed-offset header
//! followed by `capacity` equally sized slots:
//!
//! ```text
//! 0    magic | version | slot_stride | capacity | threshold | shutdown
//!      consumer | table_floor
//! 64   claim   (monotonic claim counter)
//! 128  read    (consumer read cursor)
//! 192  dropped (buffer-full pushes)
//! 256  level table (one byte per call-site key)
//! SLOTS_OFFSET  slot[0] | slot[1] | ... | slot[capacity - 1]
//! ```
//!
//! Each hot counter sits on its own cache line to prevent false sharing
//! between producers and the consumer. Slots are addressed by index times
//! stride; no native pointer is ever stored in the region, so independently
//! compiled processes can map the same segment.

pub mod levels;
pub mod ring;
pub mod segment;

use static_assertions::const_assert_eq;
use std::mem::{offset_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64};

/// "SHMLOG01" in little-endian
pub const SEGMENT_MAGIC: u64 = u64::from_le_bytes(*b"SHMLOG01");

/// Current layout version
pub const SEGMENT_VERSION: u32 = 2;

/// Smallest accepted slot size, enough for the largest record metadata
pub const MIN_SLOT_SIZE: u32 = 512;

/// Segment header at offset 0 of the mapped region
#[repr(C, align(64))]
pub struct SegmentHeader {
    /// Written last during formatting; readers treat anything else as unformatted
    pub magic: AtomicU64,
    /// Layout version
    pub version: u32,
    /// Bytes per slot, slot header included
    pub slot_stride: u32,
    /// Number of slots
    pub capacity: u64,
    /// Minimum enabled level shared by every process
    pub threshold: AtomicU32,
    /// Non-zero once shutdown was requested
    pub shutdown: AtomicU32,
    /// Non-zero while a consumer is attached
    pub consumer_attached: AtomicU32,
    /// Lowest level enabled by the level table, plus one; zero when empty
    pub table_floor: AtomicU32,
    _pad0: [u8; 24],
    /// Next claim index; only ever increases
    pub claim: AtomicU64,
    _pad1: [u8; 56],
    /// Next index the consumer will read
    pub read: AtomicU64,
    _pad2: [u8; 56],
    /// Pushes rejected because the buffer was full
    pub dropped: AtomicU64,
    _pad3: [u8; 56],
}

const_assert_eq!(size_of::<SegmentHeader>(), 256);
const_assert_eq!(offset_of!(SegmentHeader, version), 8);
const_assert_eq!(offset_of!(SegmentHeader, slot_stride), 12);
const_assert_eq!(offset_of!(SegmentHeader, capacity), 16);
const_assert_eq!(offset_of!(SegmentHeader, threshold), 24);
const_assert_eq!(offset_of!(SegmentHeader, table_floor), 36);
const_assert_eq!(offset_of!(SegmentHeader, claim), 64);
const_assert_eq!(offset_of!(SegmentHeader, read), 128);
const_assert_eq!(offset_of!(SegmentHeader, dropped), 192);

impl SegmentHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = size_of::<Self>();
}

/// Offset of the first slot
pub const SLOTS_OFFSET: usize = SegmentHeader::SIZE + levels::LEVEL_TABLE_LEN;

const_assert_eq!(SLOTS_OFFSET % 64, 0);

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    /// Available for a producer to claim
    Free = 0,
    /// Claimed; a producer is writing the payload
    Writing = 1,
    /// Published; the consumer may read it
    Ready = 2,
}

impl SlotState {
    /// Decode a raw state value; unknown values count as `Writing`
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => SlotState::Free,
            2 => SlotState::Ready,
            _ => SlotState::Writing,
        }
    }
}

/// Header at the start of every slot
///
/// All fields are atomics because producers and the consumer touch the same
/// slot from different threads or processes; the `state` transition to
/// `Ready` (release) orders every other field.
#[repr(C)]
pub struct SlotHeader {
    /// Raw [`SlotState`]
    pub state: AtomicU32,
    /// Slot flags such as [`SlotHeader::VOID`]
    pub flags: AtomicU32,
    /// Payload length in bytes
    pub len: AtomicU32,
    /// CRC32 of the payload
    pub crc32: AtomicU32,
    /// Claim index this slot was last written for
    pub seq: AtomicU64,
}

const_assert_eq!(size_of::<SlotHeader>(), 24);

impl SlotHeader {
    /// Size of the slot header in bytes
    pub const SIZE: usize = size_of::<Self>();

    /// The claim was abandoned; the consumer skips this slot
    pub const VOID: u32 = 1 << 0;

    /// The record goes on in the next slot
    pub const CONTINUED: u32 = 1 << 1;
}

/// Slot stride for a requested slot size: clamped to the minimum, 8-byte aligned
pub fn slot_stride(slot_size: u32) -> usize {
    let size = slot_size.max(MIN_SLOT_SIZE) as usize;
    (size + 7) & !7
}

/// Total bytes needed for `capacity` slots of `stride` bytes, if representable
pub fn segment_len(capacity: u64, stride: usize) -> Option<usize> {
    usize::try_from(capacity)
        .ok()?
        .checked_mul(stride)?
        .checked_add(SLOTS_OFFSET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_stride_rounding() {
        assert_eq!(slot_stride(0), MIN_SLOT_SIZE as usize);
        assert_eq!(slot_stride(513), 520);
        assert_eq!(slot_stride(1024), 1024);
    }

    #[test]
    fn test_segment_len_overflow() {
        assert_eq!(segment_len(4, 512), Some(256 + 65536 + 4 * 512));
        assert_eq!(segment_len(u64::MAX, 512), None);
    }

    #[test]
    fn test_slot_state_decoding() {
        assert_eq!(SlotState::from_raw(0), SlotState::Free);
        assert_eq!(SlotState::from_raw(2), SlotState::Ready);
        assert_eq!(SlotState::from_raw(9), SlotState::Writing);
    }
}
