//! Mapped memory regions backing a ring buffer
//!
//! A segment is either an anonymous mapping (shared between the threads of
//! one process) or a file in a tmpfs directory such as `/dev/shm` that other
//! processes can map by name.

use crate::error::{LogError, SegmentError};
use memmap2::{MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::sys::statvfs::statvfs;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

/// File name prefix for named segments
pub const SEGMENT_PREFIX: &str = "shmlog_";

/// A mapped region of shared memory
pub struct Segment {
    map: MmapMut,
    base: NonNull<u8>,
    path: Option<PathBuf>,
    owner: bool,
    unlinked: AtomicBool,
}

// SAFETY: the mapping lives as long as the segment and is never remapped.
// Concurrent access to its bytes is coordinated by the ring protocol, which
// only touches shared state through atomics or through slots owned by a claim.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Map an anonymous region of `len` zeroed bytes
    pub fn anonymous(len: usize) -> Result<Self, SegmentError> {
        let map = MmapMut::map_anon(len).map_err(|err| classify(err, len, 0))?;
        Ok(Self::from_map(map, None, false))
    }

    /// Create and map a new named segment of `len` bytes in `dir`
    ///
    /// The file is created exclusively with owner-only permissions. Any
    /// failure after the file exists removes it again.
    pub fn create(dir: &Path, name: &str, len: usize) -> Result<Self, SegmentError> {
        let path = segment_path(dir, name)?;

        let available = available_bytes(dir)?;
        if len as u64 > available {
            return Err(SegmentError::TooSmall {
                required: len as u64,
                available,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&path)?;

        match map_new_file(&file, len) {
            Ok(map) => {
                tracing::debug!(path = %path.display(), len, "created shared segment");
                Ok(Self::from_map(map, Some(path), true))
            }
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(classify(err, len, available))
            }
        }
    }

    /// Map an existing named segment created by another process
    ///
    /// A file too short to hold the segment header is reported as
    /// [`SegmentError::Unformatted`].
    pub fn open(dir: &Path, name: &str, header_len: usize) -> Result<Self, SegmentError> {
        let path = segment_path(dir, name)?;
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::SegmentMissing {
                    name: name.to_string(),
                }
                .into())
            }
            Err(err) => return Err(err.into()),
        };

        if file.metadata()?.len() < header_len as u64 {
            return Err(SegmentError::Unformatted);
        }

        // SAFETY: the file is a shared segment whose contents are only
        // accessed through the ring protocol.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self::from_map(map, Some(path), false))
    }

    fn from_map(mut map: MmapMut, path: Option<PathBuf>, owner: bool) -> Self {
        let base = NonNull::new(map.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            map,
            base,
            path,
            owner,
            unlinked: AtomicBool::new(false),
        }
    }

    /// Base address of the mapping
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the mapping is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// File backing a named segment
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this process created the segment
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Remove the backing file of a segment this process created
    ///
    /// Safe to call more than once; the mapping stays valid until drop.
    pub fn unlink(&self) -> io::Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if !self.owner || self.unlinked.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match fs::remove_file(path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(err) = self.unlink() {
            tracing::warn!(error = %err, "failed to remove shared segment");
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("len", &self.map.len())
            .field("path", &self.path)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Path of the file backing segment `name` in `dir`
pub fn segment_path(dir: &Path, name: &str) -> Result<PathBuf, SegmentError> {
    if name.is_empty() || name.contains('/') || name.contains('\0') {
        return Err(LogError::InvalidConfig {
            reason: "shm_name must be a non-empty file name",
        }
        .into());
    }
    Ok(dir.join(format!("{SEGMENT_PREFIX}{name}")))
}

fn available_bytes(dir: &Path) -> Result<u64, SegmentError> {
    let stats = statvfs(dir)?;
    Ok((stats.blocks_available() as u64).saturating_mul(stats.fragment_size() as u64))
}

fn map_new_file(file: &File, len: usize) -> io::Result<MmapMut> {
    file.set_len(len as u64)?;
    // SAFETY: the file was just created exclusively by this process.
    unsafe { MmapOptions::new().len(len).map_mut(file) }
}

/// Translate out-of-memory style failures into a size error
fn classify(err: io::Error, required: usize, available: u64) -> SegmentError {
    let exhausted = [Errno::ENOMEM, Errno::ENOSPC, Errno::EFBIG, Errno::EOVERFLOW]
        .iter()
        .any(|errno| err.raw_os_error() == Some(*errno as i32));
    if exhausted {
        SegmentError::TooSmall {
            required: required as u64,
            available,
        }
    } else {
        err.into()
    }
}
