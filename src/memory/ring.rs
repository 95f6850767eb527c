//! Lock-free MPSC ring buffer over a shared segment
//!
//! Producers claim slots with a compare-and-swap on a monotonic claim
//! counter, write the encoded record into the claimed slot and publish it by
//! flipping the slot state to `Ready`. A single [`Consumer`] reads slots in
//! claim order, so records leave the ring in exactly the order they were
//! claimed across every producer.
//!
//! The producer path never blocks: when every slot is in use the push fails
//! immediately with [`PushError::Full`] and the shared drop counter is bumped.
//! A [`Reservation`] dropped without being committed still publishes its
//! slots, marked void, so the consumer never waits on an abandoned claim.
//!
//! A record too long for one slot claims a run of consecutive slots with a
//! single compare-and-swap. Every slot but the last carries
//! [`SlotHeader::CONTINUED`] and the consumer joins the run back together.

use crate::error::{LogError, PushError, SegmentError};
use crate::level::Level;
use crate::memory::levels::{LevelKey, LevelTable, LEVEL_TABLE_LEN};
use crate::memory::segment::Segment;
use crate::memory::{
    segment_len, slot_stride, SegmentHeader, SlotHeader, SlotState, SEGMENT_MAGIC, SEGMENT_VERSION,
    SLOTS_OFFSET,
};
use crate::record::{codec, CallSite, LogRecord};
use crossbeam_utils::Backoff;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Most slots one record may span; longer records are truncated
pub const MAX_LINKED_SLOTS: u64 = 16;

/// Claimed run of slots that the producer is filling
pub struct Reservation<'a> {
    ring: &'a RingBuffer,
    seq: u64,
    slots: u64,
    committed: bool,
}

impl Reservation<'_> {
    /// Claim index of this reservation
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Payload area of the claimed slot
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.ring.payload_capacity();
        // SAFETY: the slot at `seq` is owned by this reservation until it is
        // published; nobody else reads or writes its payload meanwhile.
        unsafe { std::slice::from_raw_parts_mut(self.ring.payload_ptr(self.seq), len) }
    }

    /// Number of slots claimed
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Publish the first `len` payload bytes and return the claim index
    pub fn commit(mut self, len: usize) -> u64 {
        let len = len.min(self.ring.payload_capacity());
        let crc = crc32fast::hash(&self.payload_mut()[..len]);
        self.ring.publish(self.seq, len as u32, crc, 0);
        for seq in self.seq + 1..self.seq + self.slots {
            self.ring.publish(seq, 0, 0, SlotHeader::VOID);
        }
        self.committed = true;
        self.seq
    }

    /// Split `bytes` across the claimed run and publish it
    fn commit_linked(mut self, bytes: &[u8]) -> u64 {
        let chunk_len = self.ring.payload_capacity();
        let chunks = bytes.len().div_ceil(chunk_len).max(1) as u64;
        for i in 0..self.slots {
            let seq = self.seq + i;
            if i >= chunks {
                self.ring.publish(seq, 0, 0, SlotHeader::VOID);
                continue;
            }
            let start = i as usize * chunk_len;
            let chunk = &bytes[start..(start + chunk_len).min(bytes.len())];
            // SAFETY: every slot of the run is owned by this reservation
            // until it is published.
            unsafe {
                ptr::copy_nonoverlapping(chunk.as_ptr(), self.ring.payload_ptr(seq), chunk.len());
            }
            let flags = if i + 1 < chunks { SlotHeader::CONTINUED } else { 0 };
            self.ring
                .publish(seq, chunk.len() as u32, crc32fast::hash(chunk), flags);
        }
        self.committed = true;
        self.seq
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            for seq in self.seq..self.seq + self.slots {
                self.ring.publish(seq, 0, 0, SlotHeader::VOID);
            }
        }
    }
}

/// Record bytes read from one slot or a linked run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Claim index of the record's first slot
    pub sequence: u64,
    /// Encoded record
    pub bytes: Vec<u8>,
}

/// Point-in-time counters of a ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    /// Number of slots
    pub capacity: u64,
    /// Slots claimed since the ring was formatted
    pub claimed: u64,
    /// Slots consumed since the ring was formatted
    pub consumed: u64,
    /// Pushes rejected because the ring was full
    pub dropped: u64,
}

impl RingStats {
    /// Claimed slots not yet consumed
    pub fn in_flight(&self) -> u64 {
        self.claimed.saturating_sub(self.consumed)
    }
}

/// Multi-producer, single-consumer ring buffer in a mapped segment
pub struct RingBuffer {
    segment: Segment,
    capacity: u64,
    stride: usize,
}

impl RingBuffer {
    /// Bytes needed for a ring of `capacity` slots of `slot_size` bytes
    pub fn required_len(capacity: u64, slot_size: u32) -> Option<usize> {
        segment_len(capacity, slot_stride(slot_size))
    }

    /// Create a ring in an anonymous mapping, shared by this process only
    pub fn anonymous(capacity: u64, slot_size: u32, threshold: Level) -> Result<Self, SegmentError> {
        let required = Self::required_len(capacity, slot_size).ok_or(SegmentError::TooSmall {
            required: u64::MAX,
            available: usize::MAX as u64,
        })?;
        let segment = Segment::anonymous(required)?;
        Self::format(segment, capacity, slot_size, threshold)
    }

    /// Lay out a fresh ring in a zero-filled segment
    ///
    /// The magic number is stored last, so a process attaching concurrently
    /// sees either an unformatted segment or a complete header.
    pub fn format(
        segment: Segment,
        capacity: u64,
        slot_size: u32,
        threshold: Level,
    ) -> Result<Self, SegmentError> {
        if capacity == 0 {
            return Err(LogError::InvalidConfig {
                reason: "capacity must be at least one slot",
            }
            .into());
        }
        let stride = slot_stride(slot_size);
        let required = segment_len(capacity, stride).ok_or(SegmentError::TooSmall {
            required: u64::MAX,
            available: segment.len() as u64,
        })?;
        if segment.len() < required {
            return Err(SegmentError::TooSmall {
                required: required as u64,
                available: segment.len() as u64,
            });
        }

        let header = segment.as_ptr() as *mut SegmentHeader;
        // SAFETY: the segment is at least header-sized, page aligned, and not
        // yet visible to any other user of the ring.
        unsafe {
            ptr::addr_of_mut!((*header).version).write(SEGMENT_VERSION);
            ptr::addr_of_mut!((*header).slot_stride).write(stride as u32);
            ptr::addr_of_mut!((*header).capacity).write(capacity);
        }

        let ring = Self {
            segment,
            capacity,
            stride,
        };
        let header = ring.header();
        header.threshold.store(threshold.as_u8() as u32, Ordering::Relaxed);
        header.magic.store(SEGMENT_MAGIC, Ordering::Release);
        Ok(ring)
    }

    /// Adopt a segment another process formatted
    pub fn attach(segment: Segment) -> Result<Self, SegmentError> {
        if segment.len() < SegmentHeader::SIZE {
            return Err(SegmentError::Unformatted);
        }
        // SAFETY: the segment holds at least a header and is page aligned.
        let header = unsafe { &*(segment.as_ptr() as *const SegmentHeader) };
        if header.magic.load(Ordering::Acquire) != SEGMENT_MAGIC || header.version != SEGMENT_VERSION {
            return Err(SegmentError::Unformatted);
        }

        let stride = header.slot_stride as usize;
        let capacity = header.capacity;
        if capacity == 0 || stride <= SlotHeader::SIZE || stride % 8 != 0 {
            return Err(SegmentError::Unformatted);
        }
        let required = segment_len(capacity, stride).ok_or(SegmentError::Unformatted)?;
        if segment.len() < required {
            return Err(SegmentError::TooSmall {
                required: required as u64,
                available: segment.len() as u64,
            });
        }

        Ok(Self {
            segment,
            capacity,
            stride,
        })
    }

    fn header(&self) -> &SegmentHeader {
        // SAFETY: construction checked that the mapping holds a header.
        unsafe { &*(self.segment.as_ptr() as *const SegmentHeader) }
    }

    fn slot_offset(&self, seq: u64) -> usize {
        SLOTS_OFFSET + (seq % self.capacity) as usize * self.stride
    }

    fn slot_is_free(&self, seq: u64) -> bool {
        self.slot(seq).state.load(Ordering::Acquire) == SlotState::Free as u32
    }

    fn publish(&self, seq: u64, len: u32, crc: u32, flags: u32) {
        let slot = self.slot(seq);
        slot.len.store(len, Ordering::Relaxed);
        slot.crc32.store(crc, Ordering::Relaxed);
        slot.flags.store(flags, Ordering::Relaxed);
        slot.seq.store(seq, Ordering::Relaxed);
        slot.state.store(SlotState::Ready as u32, Ordering::Release);
    }

    fn slot(&self, seq: u64) -> &SlotHeader {
        // SAFETY: every slot offset lies inside the mapping and is 8-byte aligned.
        unsafe { &*(self.segment.as_ptr().add(self.slot_offset(seq)) as *const SlotHeader) }
    }

    fn payload_ptr(&self, seq: u64) -> *mut u8 {
        // SAFETY: the payload follows the slot header inside the same stride.
        unsafe { self.segment.as_ptr().add(self.slot_offset(seq) + SlotHeader::SIZE) }
    }

    /// Number of slots
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes per slot, header included
    pub fn slot_stride(&self) -> usize {
        self.stride
    }

    /// Bytes available for an encoded record in each slot
    pub fn payload_capacity(&self) -> usize {
        self.stride - SlotHeader::SIZE
    }

    /// Backing segment
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Most slots a single record may span in this ring
    pub fn max_linked_slots(&self) -> u64 {
        self.capacity.min(MAX_LINKED_SLOTS)
    }

    /// Per-call-site level overrides shared by every process mapping this ring
    pub fn level_table(&self) -> LevelTable<'_> {
        // SAFETY: the table lies between the header and the first slot, and
        // every byte of it is only accessed atomically.
        let entries = unsafe {
            std::slice::from_raw_parts(
                self.segment.as_ptr().add(SegmentHeader::SIZE) as *const AtomicU8,
                LEVEL_TABLE_LEN,
            )
        };
        LevelTable::new(entries, &self.header().table_floor)
    }

    /// Minimum enabled level
    pub fn threshold(&self) -> Level {
        let raw = self.header().threshold.load(Ordering::Relaxed);
        Level::from_u8(raw as u8).unwrap_or(Level::Critical)
    }

    /// Change the minimum enabled level for every process mapping this ring
    pub fn set_threshold(&self, level: Level) {
        self.header()
            .threshold
            .store(level.as_u8() as u32, Ordering::Relaxed);
    }

    /// Whether records at `level` pass the shared threshold
    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        level.as_u8() as u32 >= self.header().threshold.load(Ordering::Relaxed)
    }

    /// Whether a record at `level` from `site` with `tag` should be built
    ///
    /// Passes when the shared threshold does, or when the level table
    /// enables a more verbose level for this call site. Levels below every
    /// override cost one more relaxed load and no hashing.
    #[inline]
    pub fn enabled_at(&self, level: Level, site: &CallSite, tag: Option<&str>) -> bool {
        if self.enabled(level) {
            return true;
        }
        let table = self.level_table();
        let floor = table.raw_floor();
        if floor == 0 || (level.as_u8() as u32) + 1 < floor {
            return false;
        }
        table
            .lookup(LevelKey::new(site.component, tag, site.file))
            .is_some_and(|min| level >= min)
    }

    /// Claim the next slot
    ///
    /// Fails immediately with [`PushError::Full`] when all slots are in use
    /// and with [`PushError::Closed`] after [`RingBuffer::close`].
    pub fn reserve(&self) -> Result<Reservation<'_>, PushError> {
        self.reserve_span(1)
    }

    /// Claim `slots` consecutive slots with one compare-and-swap
    fn reserve_span(&self, slots: u64) -> Result<Reservation<'_>, PushError> {
        let header = self.header();
        if header.shutdown.load(Ordering::Acquire) != 0 {
            return Err(PushError::Closed);
        }

        let mut claim = header.claim.load(Ordering::Acquire);
        loop {
            let read = header.read.load(Ordering::Acquire);
            if read > claim {
                claim = header.claim.load(Ordering::Acquire);
                continue;
            }

            if claim - read + slots > self.capacity {
                header.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(PushError::Full);
            }

            if !(claim..claim + slots).all(|seq| self.slot_is_free(seq)) {
                // Another producer took `claim` after it was loaded.
                let current = header.claim.load(Ordering::Acquire);
                if current != claim {
                    claim = current;
                    continue;
                }
                header.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(PushError::Full);
            }

            match header.claim.compare_exchange_weak(
                claim,
                claim + slots,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    for seq in claim..claim + slots {
                        self.slot(seq)
                            .state
                            .store(SlotState::Writing as u32, Ordering::Relaxed);
                    }
                    return Ok(Reservation {
                        ring: self,
                        seq: claim,
                        slots,
                        committed: false,
                    });
                }
                Err(current) => claim = current,
            }
        }
    }

    /// Encode and publish a record, returning the claim index of its first slot
    ///
    /// A record longer than one slot is encoded up front and spread over a
    /// linked run of at most [`RingBuffer::max_linked_slots`] slots.
    pub fn push(&self, record: &LogRecord) -> Result<u64, PushError> {
        let payload = self.payload_capacity();
        let needed = codec::encoded_len(record);
        if needed <= payload || self.max_linked_slots() == 1 {
            let mut reservation = self.reserve()?;
            return match codec::encode(record, reservation.payload_mut()) {
                Some(len) => Ok(reservation.commit(len)),
                None => {
                    drop(reservation);
                    self.header().dropped.fetch_add(1, Ordering::Relaxed);
                    Err(PushError::Full)
                }
            };
        }

        let slots = needed.div_ceil(payload).min(self.max_linked_slots() as usize);
        let mut bytes = vec![0u8; slots * payload];
        let Some(len) = codec::encode(record, &mut bytes) else {
            self.header().dropped.fetch_add(1, Ordering::Relaxed);
            return Err(PushError::Full);
        };
        bytes.truncate(len);
        let reservation = self.reserve_span(len.div_ceil(payload).max(1) as u64)?;
        Ok(reservation.commit_linked(&bytes))
    }

    /// Attach the single consumer; `None` while another consumer is attached
    pub fn consumer(self: &Arc<Self>) -> Option<Consumer> {
        self.header()
            .consumer_attached
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Consumer {
                ring: Arc::clone(self),
                corrupt: 0,
            })
    }

    /// Refuse further pushes and release a waiting consumer
    pub fn close(&self) {
        self.header().shutdown.store(1, Ordering::Release);
    }

    /// Whether [`RingBuffer::close`] was called by any process
    pub fn is_closed(&self) -> bool {
        self.header().shutdown.load(Ordering::Acquire) != 0
    }

    /// Pushes rejected because the ring was full
    pub fn dropped(&self) -> u64 {
        self.header().dropped.load(Ordering::Relaxed)
    }

    /// Snapshot of the ring counters
    pub fn stats(&self) -> RingStats {
        let header = self.header();
        RingStats {
            capacity: self.capacity,
            claimed: header.claim.load(Ordering::Relaxed),
            consumed: header.read.load(Ordering::Relaxed),
            dropped: header.dropped.load(Ordering::Relaxed),
        }
    }

    /// Current usage as a percentage of capacity
    pub fn usage_percent(&self) -> f32 {
        let stats = self.stats();
        (stats.in_flight() as f32 / self.capacity as f32) * 100.0
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("stride", &self.stride)
            .field("segment", &self.segment)
            .finish()
    }
}

/// The unique reader of a ring buffer
///
/// Dropping the consumer lets another one attach.
pub struct Consumer {
    ring: Arc<RingBuffer>,
    corrupt: u64,
}

impl Consumer {
    /// Ring this consumer drains
    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Slots skipped because their checksum did not match
    pub fn corrupt(&self) -> u64 {
        self.corrupt
    }

    /// Take the next record in claim order
    ///
    /// Returns `None` when nothing is claimed. When the next slot is claimed
    /// but not yet published this waits for the producer, giving up once the
    /// ring is closed. Linked runs come back as one record.
    pub fn pop(&mut self) -> Option<RawRecord> {
        let header = self.ring.header();
        // first sequence, bytes so far, every chunk intact
        let mut linked: Option<(u64, Vec<u8>, bool)> = None;
        loop {
            let read = header.read.load(Ordering::Relaxed);
            if read == header.claim.load(Ordering::Acquire) {
                return None;
            }

            let slot = self.ring.slot(read);
            let backoff = Backoff::new();
            while SlotState::from_raw(slot.state.load(Ordering::Acquire)) != SlotState::Ready {
                if self.ring.is_closed() {
                    return None;
                }
                backoff.snooze();
            }

            let flags = slot.flags.load(Ordering::Relaxed);
            let len = (slot.len.load(Ordering::Relaxed) as usize).min(self.ring.payload_capacity());
            let crc = slot.crc32.load(Ordering::Relaxed);
            let seq = slot.seq.load(Ordering::Relaxed);

            let bytes = if flags & SlotHeader::VOID != 0 {
                None
            } else {
                // SAFETY: the slot is Ready, so its producer finished writing
                // and nobody writes it again until it is marked Free below.
                let payload = unsafe { std::slice::from_raw_parts(self.ring.payload_ptr(read), len) };
                Some(payload.to_vec())
            };

            slot.state.store(SlotState::Free as u32, Ordering::Release);
            header.read.store(read + 1, Ordering::Release);

            let Some(chunk) = bytes else {
                if let Some((first, _, _)) = linked.take() {
                    self.corrupt += 1;
                    tracing::warn!(sequence = first, "linked record cut short");
                }
                continue;
            };
            let intact = seq == read && crc32fast::hash(&chunk) == crc;
            let (sequence, bytes, intact) = match linked.take() {
                Some((first, mut bytes, ok)) => {
                    bytes.extend_from_slice(&chunk);
                    (first, bytes, ok && intact)
                }
                None => (read, chunk, intact),
            };
            if flags & SlotHeader::CONTINUED != 0 {
                linked = Some((sequence, bytes, intact));
                continue;
            }
            if !intact {
                self.corrupt += 1;
                tracing::warn!(sequence, "skipping corrupt ring slot");
                continue;
            }
            return Some(RawRecord { sequence, bytes });
        }
    }

    /// Release every published slot without reading it, returning how many
    pub fn discard(&mut self) -> u64 {
        let mut discarded = 0;
        while self.pop().is_some() {
            discarded += 1;
        }
        discarded
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.ring
            .header()
            .consumer_attached
            .store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("ring", &self.ring)
            .field("corrupt", &self.corrupt)
            .finish()
    }
}
