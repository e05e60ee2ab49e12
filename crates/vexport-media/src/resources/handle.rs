//! Tracked resource handles and their release strategies.

use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::process::Child;

use crate::mmap::MappedView;

use super::CleanupPriority;

/// A resource that knows how to close itself, e.g. a client connection.
pub trait Releasable: Send {
    fn release(self: Box<Self>) -> io::Result<()>;
}

/// Kind label of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    File,
    Buffer,
    Mapping,
    TempPath,
    Process,
    Connection,
    Custom,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::File => "file",
            Self::Buffer => "buffer",
            Self::Mapping => "mapping",
            Self::TempPath => "temp_path",
            Self::Process => "process",
            Self::Connection => "connection",
            Self::Custom => "custom",
        };
        f.write_str(label)
    }
}

/// An owned OS resource together with how to release it.
pub enum ResourceHandle {
    /// Closed on release.
    File(File),
    /// Large in-memory buffer; dropped on release.
    Buffer(Box<dyn Any + Send>),
    /// Flushed, then the view is dropped.
    Mapping(MappedView),
    /// Temp file or directory; removed on release. Already gone is fine.
    TempPath(PathBuf),
    /// External process; killed and reaped if still running.
    Process(Child),
    Connection(Box<dyn Releasable>),
    Custom(Box<dyn FnOnce() -> io::Result<()> + Send>),
}

impl ResourceHandle {
    pub fn buffer<B: Send + 'static>(buffer: B) -> Self {
        Self::Buffer(Box::new(buffer))
    }

    pub fn custom<F>(release: F) -> Self
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        Self::Custom(Box::new(release))
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::File(_) => ResourceKind::File,
            Self::Buffer(_) => ResourceKind::Buffer,
            Self::Mapping(_) => ResourceKind::Mapping,
            Self::TempPath(_) => ResourceKind::TempPath,
            Self::Process(_) => ResourceKind::Process,
            Self::Connection(_) => ResourceKind::Connection,
            Self::Custom(_) => ResourceKind::Custom,
        }
    }

    /// Priority tier used when none is given at registration.
    pub fn default_priority(&self) -> CleanupPriority {
        match self {
            Self::TempPath(_) => CleanupPriority::Low,
            Self::Buffer(_) | Self::Custom(_) => CleanupPriority::Medium,
            Self::File(_) | Self::Mapping(_) | Self::Process(_) | Self::Connection(_) => {
                CleanupPriority::High
            }
        }
    }

    pub(crate) fn release(self) -> io::Result<()> {
        match self {
            Self::File(file) => {
                drop(file);
                Ok(())
            }
            Self::Buffer(buffer) => {
                drop(buffer);
                Ok(())
            }
            Self::Mapping(view) => view.flush().map_err(io::Error::other),
            Self::TempPath(path) => remove_path(&path),
            Self::Process(mut child) => {
                if child.try_wait()?.is_none() {
                    child.kill()?;
                    child.wait()?;
                }
                Ok(())
            }
            Self::Connection(conn) => conn.release(),
            Self::Custom(release) => release(),
        }
    }
}

fn remove_path(path: &std::path::Path) -> io::Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempPath(path) => f.debug_tuple("TempPath").field(path).finish(),
            Self::Mapping(view) => f.debug_tuple("Mapping").field(view).finish(),
            Self::Process(child) => f.debug_tuple("Process").field(&child.id()).finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

impl From<File> for ResourceHandle {
    fn from(file: File) -> Self {
        Self::File(file)
    }
}

impl From<MappedView> for ResourceHandle {
    fn from(view: MappedView) -> Self {
        Self::Mapping(view)
    }
}

impl From<PathBuf> for ResourceHandle {
    fn from(path: PathBuf) -> Self {
        Self::TempPath(path)
    }
}

impl From<Child> for ResourceHandle {
    fn from(child: Child) -> Self {
        Self::Process(child)
    }
}

impl From<Box<dyn Releasable>> for ResourceHandle {
    fn from(conn: Box<dyn Releasable>) -> Self {
        Self::Connection(conn)
    }
}
