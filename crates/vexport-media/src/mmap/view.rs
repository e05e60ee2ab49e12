//! Mapped views handed out by the engine.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::ops::{Deref, DerefMut, Range};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use memmap2::{Mmap, MmapMut};

use crate::error::{MediaError, MediaResult};

/// How a file is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    /// Existing file, shared read-only mapping.
    ReadOnly,
    /// Existing file, shared writable mapping.
    ReadWrite,
    /// Writable mapping; the file is created when missing.
    WriteCreate,
}

impl MapMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// The OS mapping owned by the cache.
pub(crate) enum Mapping {
    ReadOnly(Mmap),
    Writable(RwLock<MmapMut>),
}

impl Mapping {
    /// Open `path` and map it in `mode`.
    ///
    /// # Safety hazard
    ///
    /// A mapping reflects the file as it is on disk. If another process
    /// truncates the file while it is mapped, touching the lost pages
    /// raises SIGBUS. The engine does not guard against this; callers own
    /// the files they map.
    pub(crate) fn open(path: &Path, mode: MapMode) -> MediaResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true);
        match mode {
            MapMode::ReadOnly => {}
            MapMode::ReadWrite => {
                options.write(true);
            }
            MapMode::WriteCreate => {
                options.write(true).create(true);
            }
        }

        let file = options.open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MediaError::mapping(path, "not found"),
            ErrorKind::PermissionDenied => MediaError::mapping(path, "permission denied"),
            _ => MediaError::Io(e),
        })?;

        if file.metadata()?.is_dir() {
            return Err(MediaError::mapping(path, "is a directory"));
        }

        // SAFETY: see the hazard documented above; the mapping never outlives
        // the process and mutation through it is serialized by the RwLock.
        let mapping = match mode {
            MapMode::ReadOnly => Self::ReadOnly(unsafe { Mmap::map(&file)? }),
            MapMode::ReadWrite | MapMode::WriteCreate => {
                Self::Writable(RwLock::new(unsafe { MmapMut::map_mut(&file)? }))
            }
        };
        Ok(mapping)
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::ReadOnly(map) => map.len(),
            Self::Writable(lock) => lock.read().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }
}

/// A cheap, clonable handle to a cached mapping.
///
/// Each live view counts as one reference on the cache entry; entries with
/// live views are never evicted.
#[derive(Clone)]
pub struct MappedView {
    path: Arc<Path>,
    mode: MapMode,
    len: usize,
    mapping: Arc<Mapping>,
}

impl std::fmt::Debug for MappedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedView")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("len", &self.len)
            .finish()
    }
}

impl MappedView {
    pub(crate) fn new(path: Arc<Path>, mode: MapMode, mapping: Arc<Mapping>) -> Self {
        let len = mapping.len();
        Self {
            path,
            mode,
            len,
            mapping,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> MapMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Direct slice for read-only mappings; `None` for writable ones,
    /// which must go through [`read`](Self::read).
    pub fn as_slice(&self) -> Option<&[u8]> {
        match self.mapping.as_ref() {
            Mapping::ReadOnly(map) => Some(&map[..]),
            Mapping::Writable(_) => None,
        }
    }

    /// Borrow the whole mapping for reading.
    pub fn read(&self) -> ViewGuard<'_> {
        self.guard(0..self.len)
    }

    /// Borrow a byte range for reading.
    pub fn read_range(&self, range: Range<usize>) -> MediaResult<ViewGuard<'_>> {
        if range.start > range.end || range.end > self.len {
            return Err(MediaError::invalid_input(format!(
                "range {:?} outside mapping of {} bytes",
                range, self.len
            )));
        }
        Ok(self.guard(range))
    }

    fn guard(&self, range: Range<usize>) -> ViewGuard<'_> {
        let inner = match self.mapping.as_ref() {
            Mapping::ReadOnly(map) => GuardInner::Direct(&map[..]),
            Mapping::Writable(lock) => {
                GuardInner::Locked(lock.read().unwrap_or_else(PoisonError::into_inner))
            }
        };
        ViewGuard { inner, range }
    }

    /// Borrow the mapping for writing. Fails for read-only views.
    pub fn write(&self) -> MediaResult<ViewGuardMut<'_>> {
        match self.mapping.as_ref() {
            Mapping::ReadOnly(_) => Err(MediaError::mapping(self.path.as_ref(), "view is read-only")),
            Mapping::Writable(lock) => Ok(ViewGuardMut {
                inner: lock.write().unwrap_or_else(PoisonError::into_inner),
            }),
        }
    }

    /// Flush dirty pages of a writable mapping to disk. No-op for read-only views.
    pub fn flush(&self) -> MediaResult<()> {
        if let Mapping::Writable(lock) = self.mapping.as_ref() {
            lock.read().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }

    /// Number of outstanding handles to the underlying mapping, this one included.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.mapping)
    }
}

enum GuardInner<'a> {
    Direct(&'a [u8]),
    Locked(RwLockReadGuard<'a, MmapMut>),
}

/// Shared borrow of (part of) a mapping.
pub struct ViewGuard<'a> {
    inner: GuardInner<'a>,
    range: Range<usize>,
}

impl Deref for ViewGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let bytes: &[u8] = match &self.inner {
            GuardInner::Direct(bytes) => bytes,
            GuardInner::Locked(guard) => &guard[..],
        };
        &bytes[self.range.clone()]
    }
}

/// Exclusive borrow of a writable mapping.
pub struct ViewGuardMut<'a> {
    inner: RwLockWriteGuard<'a, MmapMut>,
}

impl Deref for ViewGuardMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner[..]
    }
}

impl DerefMut for ViewGuardMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.inner[..]
    }
}
