//! Per-call-site level table kept in the shared segment
//!
//! The table refines the global threshold for individual components, tags
//! and files. A call site is keyed by three tier hashes (component, tag and
//! file name) packed into one index. Each entry holds the lowest level
//! enabled for its key, stored as `level + 1`, with zero meaning the key has
//! no override.
//!
//! Entries only ever get more verbose while a segment lives. A hash
//! collision can enable extra call sites but never disables one; the
//! consumer's filters still decide what reaches a sink.

use crate::level::Level;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Hash bits of the component, tag and file tiers
pub const TIER_BITS: [u32; 3] = [6, 6, 4];

/// Number of entries, one byte each
pub const LEVEL_TABLE_LEN: usize = 1 << (TIER_BITS[0] + TIER_BITS[1] + TIER_BITS[2]);

const HASH_INIT: u32 = 5381;

/// Only the trailing characters of a key are hashed
const HASH_CHARS: usize = 32;

/// Hash one key into `bits` bits
///
/// Characters are taken from the end of the key, case-folded, and hashing
/// stops at the first path separator, so a full source path and its file
/// name hash alike. The empty key hashes to zero and no other key does.
pub fn tier_hash(key: &str, bits: u32) -> u32 {
    let bytes = key.as_bytes();
    let Some(&last) = bytes.last() else {
        return 0;
    };
    let mask = (1u32 << bits) - 1;
    let tail = &bytes[bytes.len().saturating_sub(HASH_CHARS)..];
    let hash = tail
        .iter()
        .rev()
        .take_while(|&&b| b != b'/' && b != b'\\')
        .fold(HASH_INIT, |hash, &b| {
            hash.wrapping_mul(33)
                .wrapping_add(b.to_ascii_lowercase() as u32)
        })
        & mask;
    match hash {
        0 => match last.to_ascii_lowercase() as u32 & mask {
            0 => 1,
            fallback => fallback,
        },
        hash => hash,
    }
}

/// Table index of a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelKey {
    component: u32,
    tag: u32,
    file: u32,
}

impl LevelKey {
    /// Key for a component, optional tag and source file
    pub fn new(component: &str, tag: Option<&str>, file: &str) -> Self {
        Self {
            component: tier_hash(component, TIER_BITS[0]),
            tag: tier_hash(tag.unwrap_or(""), TIER_BITS[1]),
            file: tier_hash(file, TIER_BITS[2]),
        }
    }

    fn index(self) -> usize {
        pack(self.component, self.tag, self.file)
    }
}

fn pack(component: u32, tag: u32, file: u32) -> usize {
    ((component << (TIER_BITS[1] + TIER_BITS[2])) | (tag << TIER_BITS[2]) | file) as usize
}

/// Hashes a tier covers: one for a key, every hash for a wildcard
fn tier_range(key: Option<&str>, bits: u32) -> std::ops::Range<u32> {
    match key {
        Some(key) => {
            let hash = tier_hash(key, bits);
            hash..hash + 1
        }
        None => 0..1 << bits,
    }
}

/// View of the level table inside a mapped segment
#[derive(Clone, Copy)]
pub struct LevelTable<'a> {
    entries: &'a [AtomicU8],
    floor: &'a AtomicU32,
}

impl<'a> LevelTable<'a> {
    pub(crate) fn new(entries: &'a [AtomicU8], floor: &'a AtomicU32) -> Self {
        debug_assert_eq!(entries.len(), LEVEL_TABLE_LEN);
        Self { entries, floor }
    }

    /// Lowest level enabled for `key`, if the key has an override
    #[inline]
    pub fn lookup(&self, key: LevelKey) -> Option<Level> {
        decode(self.entries[key.index()].load(Ordering::Relaxed) as u32)
    }

    /// Lowest level enabled by any entry
    #[inline]
    pub fn floor(&self) -> Option<Level> {
        decode(self.floor.load(Ordering::Relaxed))
    }

    /// Raw floor, `level + 1` or zero
    #[inline]
    pub(crate) fn raw_floor(&self) -> u32 {
        self.floor.load(Ordering::Relaxed)
    }

    /// Enable `level` and above for every key matching the given parts
    ///
    /// A `None` part matches every value of its tier. Entries that are
    /// already more verbose are left alone.
    pub fn lower(
        &self,
        level: Level,
        component: Option<&str>,
        tag: Option<&str>,
        file: Option<&str>,
    ) {
        let encoded = level.as_u8() + 1;
        for c in tier_range(component, TIER_BITS[0]) {
            for t in tier_range(tag, TIER_BITS[1]) {
                for f in tier_range(file, TIER_BITS[2]) {
                    lower_entry(&self.entries[pack(c, t, f)], encoded);
                }
            }
        }
        let _ = self
            .floor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current == 0 || (encoded as u32) < current).then_some(encoded as u32)
            });
    }

    /// Remove every override
    pub fn clear(&self) {
        self.floor.store(0, Ordering::Relaxed);
        for entry in self.entries {
            entry.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for LevelTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelTable")
            .field("floor", &self.floor())
            .finish()
    }
}

fn lower_entry(entry: &AtomicU8, encoded: u8) {
    let _ = entry.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        (current == 0 || encoded < current).then_some(encoded)
    });
}

fn decode(raw: u32) -> Option<Level> {
    raw.checked_sub(1).and_then(|level| Level::from_u8(level as u8))
}
