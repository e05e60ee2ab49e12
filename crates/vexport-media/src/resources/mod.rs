//! Resource lifecycle management.
//!
//! A [`ResourceManager`] tracks every OS resource the media core acquires
//! (file handles, mappings, buffers, temp files, encoder processes,
//! connections) and guarantees each is released exactly once: on an explicit
//! [`clean`](ResourceManager::clean), when a [`ResourceScope`] ends, or when
//! the last manager handle is dropped.
//!
//! Cleanup is best-effort. A failing release is recorded in the
//! [`CleanupReport`] and the pass carries on with the rest.

mod handle;
mod scope;

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::mmap::MappedView;

pub use handle::{Releasable, ResourceHandle, ResourceKind};
pub use scope::ResourceScope;

/// Escalating cleanup levels.
///
/// `clean(level)` releases every resource whose tier is at most `level`, so
/// `Critical` releases everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CleanupPriority {
    /// Disposable temp files.
    Low,
    /// Temp buffers.
    Medium,
    /// Large buffers, open handles, processes, connections.
    High,
    /// Everything; emergency teardown.
    Critical,
}

/// One resource that failed to release.
#[derive(Debug, Clone, Error)]
#[error("Failed to release {kind} '{key}': {message}")]
pub struct ResourceReleaseError {
    pub key: String,
    pub kind: ResourceKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStatus {
    Success,
    /// Some releases failed, others succeeded.
    Partial,
    Failed,
}

/// Summary of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub cleaned_count: usize,
    pub errors: Vec<ResourceReleaseError>,
    pub duration: Duration,
}

impl CleanupReport {
    pub fn status(&self) -> CleanupStatus {
        match (self.cleaned_count, self.errors.len()) {
            (_, 0) => CleanupStatus::Success,
            (0, _) => CleanupStatus::Failed,
            _ => CleanupStatus::Partial,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: CleanupReport) {
        self.cleaned_count += other.cleaned_count;
        self.errors.extend(other.errors);
        self.duration += other.duration;
    }
}

/// Registration handle for one tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

struct ManagedResource {
    key: String,
    priority: CleanupPriority,
    scope: Option<u64>,
    handle: ResourceHandle,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    resources: BTreeMap<u64, ManagedResource>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_where(
        &mut self,
        mut pred: impl FnMut(u64, &ManagedResource) -> bool,
    ) -> Vec<(u64, ManagedResource)> {
        let ids: Vec<u64> = self
            .resources
            .iter()
            .filter(|(id, res)| pred(**id, *res))
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.resources.remove(&id).map(|res| (id, res)))
            .collect()
    }
}

struct Inner {
    registry: Mutex<Registry>,
    temp_root: PathBuf,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove matching resources under the lock, release them outside it.
    fn release_where(&self, pred: impl FnMut(u64, &ManagedResource) -> bool) -> CleanupReport {
        let started = Instant::now();
        let mut taken = self.lock().take_where(pred);

        // Highest tier first, newest first within a tier: handles and
        // processes go before the temp files they may point into.
        taken.sort_by(|(a_id, a), (b_id, b)| b.priority.cmp(&a.priority).then(b_id.cmp(a_id)));

        let mut report = CleanupReport::default();
        for (_, res) in taken {
            let kind = res.handle.kind();
            match res.handle.release() {
                Ok(()) => {
                    debug!(key = %res.key, %kind, priority = ?res.priority, "Released resource");
                    report.cleaned_count += 1;
                }
                Err(e) => {
                    error!(key = %res.key, %kind, error = %e, "Failed to release resource");
                    report.errors.push(ResourceReleaseError {
                        key: res.key,
                        kind,
                        message: e.to_string(),
                    });
                }
            }
        }
        report.duration = started.elapsed();
        metrics::record_cleanup(report.cleaned_count, report.errors.len());
        report
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let report = self.release_where(|_, _| true);
        if report.cleaned_count > 0 || !report.errors.is_empty() {
            debug!(
                cleaned = report.cleaned_count,
                errors = report.errors.len(),
                "Released leftover resources on manager drop"
            );
        }
    }
}

/// Tracks and releases OS resources.
///
/// Cheap to clone; clones share one registry guarded by a single lock, so a
/// worker thread can register while a supervisor runs emergency cleanup.
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("temp_root", &self.inner.temp_root)
            .field("tracked", &self.tracked_count())
            .finish()
    }
}

impl ResourceManager {
    /// Manager whose temp area lives under the OS temp directory.
    pub fn new() -> Self {
        Self::with_temp_root(std::env::temp_dir().join("vexport"))
    }

    pub fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                temp_root: temp_root.into(),
            }),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.inner.temp_root
    }

    pub(crate) fn insert(
        &self,
        key: impl Into<String>,
        handle: ResourceHandle,
        priority: Option<CleanupPriority>,
        scope: Option<u64>,
    ) -> ResourceId {
        let key = key.into();
        let priority = priority.unwrap_or_else(|| handle.default_priority());
        debug!(key = %key, kind = %handle.kind(), ?priority, "Registered resource");

        let mut registry = self.inner.lock();
        let id = registry.next_id();
        registry.resources.insert(
            id,
            ManagedResource {
                key,
                priority,
                scope,
                handle,
            },
        );
        ResourceId(id)
    }

    pub(crate) fn next_scope_id(&self) -> u64 {
        self.inner.lock().next_id()
    }

    /// Register any handle at its default priority.
    pub fn register(&self, key: impl Into<String>, handle: impl Into<ResourceHandle>) -> ResourceId {
        self.insert(key, handle.into(), None, None)
    }

    pub fn register_with_priority(
        &self,
        key: impl Into<String>,
        handle: impl Into<ResourceHandle>,
        priority: CleanupPriority,
    ) -> ResourceId {
        self.insert(key, handle.into(), Some(priority), None)
    }

    pub fn register_file(&self, key: impl Into<String>, file: File) -> ResourceId {
        self.register(key, ResourceHandle::File(file))
    }

    pub fn register_buffer<B: Send + 'static>(&self, key: impl Into<String>, buffer: B) -> ResourceId {
        self.register(key, ResourceHandle::buffer(buffer))
    }

    pub fn register_mapping(&self, key: impl Into<String>, view: MappedView) -> ResourceId {
        self.register(key, ResourceHandle::Mapping(view))
    }

    pub fn register_temp_path(&self, key: impl Into<String>, path: impl Into<PathBuf>) -> ResourceId {
        self.register(key, ResourceHandle::TempPath(path.into()))
    }

    pub fn register_process(&self, key: impl Into<String>, child: Child) -> ResourceId {
        self.register(key, ResourceHandle::Process(child))
    }

    pub fn register_connection(&self, key: impl Into<String>, conn: Box<dyn Releasable>) -> ResourceId {
        self.register(key, ResourceHandle::Connection(conn))
    }

    pub fn register_custom<F>(&self, key: impl Into<String>, priority: CleanupPriority, release: F) -> ResourceId
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.insert(key, ResourceHandle::custom(release), Some(priority), None)
    }

    /// Create a unique directory `<temp root>/<prefix>_<uuid>` and track it.
    pub fn create_temp_dir(&self, prefix: &str) -> MediaResult<PathBuf> {
        let path = self.make_temp_dir(prefix)?;
        self.register_temp_path(format!("temp_dir:{prefix}"), path.clone());
        Ok(path)
    }

    pub(crate) fn make_temp_dir(&self, prefix: &str) -> MediaResult<PathBuf> {
        let root = &self.inner.temp_root;
        std::fs::create_dir_all(root).map_err(|e| {
            MediaError::configuration(format!(
                "Temp root {} is not writable: {e}",
                root.display()
            ))
        })?;

        let path = root.join(format!("{}_{}", prefix, uuid::Uuid::new_v4().simple()));
        std::fs::create_dir(&path)?;
        Ok(path)
    }

    /// Release everything registered under `key`.
    pub fn release(&self, key: &str) -> CleanupReport {
        self.inner.release_where(|_, res| res.key == key)
    }

    /// Release one registration.
    pub fn release_id(&self, id: ResourceId) -> CleanupReport {
        self.inner.release_where(|slot, _| slot == id.0)
    }

    /// Stop tracking a resource without releasing it and hand it back.
    pub fn forget(&self, id: ResourceId) -> Option<ResourceHandle> {
        self.inner.lock().resources.remove(&id.0).map(|res| res.handle)
    }

    /// Release every resource whose tier is at most `level`.
    pub fn clean(&self, level: CleanupPriority) -> CleanupReport {
        let report = self.inner.release_where(|_, res| res.priority <= level);
        info!(
            level = ?level,
            cleaned = report.cleaned_count,
            errors = report.errors.len(),
            duration_ms = report.duration.as_millis() as u64,
            "Resource cleanup finished"
        );
        report
    }

    /// Release everything. Meant for top-level error and signal handlers.
    pub fn emergency_clean(&self) -> CleanupReport {
        warn!(tracked = self.tracked_count(), "Emergency resource cleanup");
        self.clean(CleanupPriority::Critical)
    }

    pub(crate) fn release_scope(&self, scope: u64) -> CleanupReport {
        self.inner.release_where(|_, res| res.scope == Some(scope))
    }

    /// Number of resources currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.inner.lock().resources.len()
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.inner.lock().resources.values().any(|res| res.key == key)
    }

    /// Open a scope whose registrations are released when it ends.
    pub fn scope(&self, name: impl Into<String>) -> ResourceScope {
        ResourceScope::new(self.clone(), name.into())
    }

    /// Run `f` inside a scope and return its result after the scope's
    /// resources are released.
    pub fn with_scope<R>(&self, name: impl Into<String>, f: impl FnOnce(&ResourceScope) -> R) -> R {
        let scope = self.scope(name);
        let result = f(&scope);
        scope.finish();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn counter_release(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> io::Result<()> + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_second_clean_releases_nothing() {
        let dir = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(dir.path());
        let file = File::create(dir.path().join("a.txt")).unwrap();
        manager.register_file("a", file);
        manager.register_buffer("buf", vec![0u8; 1024]);
        manager.register_temp_path("tmp", dir.path().join("a.txt"));

        let first = manager.clean(CleanupPriority::Critical);
        assert_eq!(first.cleaned_count, 3);
        assert!(first.is_clean());
        assert!(!dir.path().join("a.txt").exists());

        let second = manager.clean(CleanupPriority::Critical);
        assert_eq!(second.cleaned_count, 0);
        assert!(second.errors.is_empty());
    }

    #[test]
    fn test_failing_release_does_not_block_others() {
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        let released = Arc::new(AtomicUsize::new(0));

        manager.register_custom("first", CleanupPriority::High, counter_release(&released));
        manager.register_custom("broken", CleanupPriority::High, || {
            Err(io::Error::other("device busy"))
        });
        manager.register_custom("last", CleanupPriority::Low, counter_release(&released));

        let report = manager.emergency_clean();
        assert_eq!(report.cleaned_count, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "broken");
        assert_eq!(report.errors[0].kind, ResourceKind::Custom);
        assert_eq!(report.status(), CleanupStatus::Partial);
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(manager.tracked_count(), 0);
    }

    #[test]
    fn test_clean_level_covers_lower_tiers_only() {
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        let released = Arc::new(AtomicUsize::new(0));
        manager.register_custom("low", CleanupPriority::Low, counter_release(&released));
        manager.register_custom("medium", CleanupPriority::Medium, counter_release(&released));
        manager.register_custom("high", CleanupPriority::High, counter_release(&released));

        assert_eq!(manager.clean(CleanupPriority::Low).cleaned_count, 1);
        assert!(!manager.is_tracked("low"));
        assert!(manager.is_tracked("medium"));

        assert_eq!(manager.clean(CleanupPriority::Medium).cleaned_count, 1);
        assert_eq!(manager.clean(CleanupPriority::Critical).cleaned_count, 1);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_release_by_key_and_id() {
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        let released = Arc::new(AtomicUsize::new(0));
        manager.register_custom("shared", CleanupPriority::Low, counter_release(&released));
        manager.register_custom("shared", CleanupPriority::High, counter_release(&released));
        let id = manager.register_custom("single", CleanupPriority::Low, counter_release(&released));

        assert_eq!(manager.release("shared").cleaned_count, 2);
        assert_eq!(manager.release_id(id).cleaned_count, 1);
        assert_eq!(manager.release_id(id).cleaned_count, 0);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_temp_dir_created_and_removed() {
        let root = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(root.path().join("work"));
        let dir = manager.create_temp_dir("concat").unwrap();
        std::fs::write(dir.join("list.txt"), "file 'a.mp4'\n").unwrap();

        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("concat_"));
        assert!(dir.starts_with(root.path().join("work")));

        let report = manager.clean(CleanupPriority::Low);
        assert_eq!(report.cleaned_count, 1);
        assert!(!dir.exists());
    }

    #[test]
    fn test_already_removed_temp_path_is_success() {
        let root = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(root.path());
        manager.register_temp_path("gone", root.path().join("never-created"));
        let report = manager.clean(CleanupPriority::Low);
        assert_eq!(report.cleaned_count, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_scope_releases_on_error_return() {
        let root = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(root.path());
        let mut seen = PathBuf::new();

        let result: MediaResult<()> = manager.with_scope("export", |scope| {
            let dir = scope.create_temp_dir("segment")?;
            seen = dir.clone();
            let file = File::create(dir.join("seg.bin"))?;
            scope.register("seg", file);
            Err(MediaError::invalid_input("encoder failed"))
        });

        assert!(result.is_err());
        assert!(seen.starts_with(root.path()));
        assert!(!seen.exists());
        assert_eq!(manager.tracked_count(), 0);
    }

    #[test]
    fn test_scope_releases_on_panic() {
        let root = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(root.path());
        let released = Arc::new(AtomicUsize::new(0));

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scope = manager.scope("panicking");
            scope.register("custom", ResourceHandle::custom(counter_release(&released)));
            panic!("stage blew up");
        }));

        assert!(outcome.is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked_count(), 0);
    }

    #[test]
    fn test_scope_only_releases_its_own_resources() {
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        let released = Arc::new(AtomicUsize::new(0));
        manager.register_custom("outside", CleanupPriority::Low, counter_release(&released));

        let scope = manager.scope("inner");
        scope.register_with_priority(
            "inside",
            ResourceHandle::custom(counter_release(&released)),
            CleanupPriority::Critical,
        );
        let report = scope.finish();

        assert_eq!(report.cleaned_count, 1);
        assert!(manager.is_tracked("outside"));
        assert!(!manager.is_tracked("inside"));
    }

    #[test]
    fn test_process_is_killed_on_release() {
        let Ok(child) = std::process::Command::new("sleep").arg("30").spawn() else {
            return;
        };
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        manager.register_process("sleeper", child);
        let report = manager.clean(CleanupPriority::High);
        assert_eq!(report.cleaned_count, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_drop_releases_leftovers() {
        let released = Arc::new(AtomicUsize::new(0));
        {
            let manager = ResourceManager::with_temp_root(std::env::temp_dir());
            let clone = manager.clone();
            clone.register_custom("leftover", CleanupPriority::Low, counter_release(&released));
            drop(clone);
            assert_eq!(released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    struct Connection {
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Releasable for Connection {
        fn release(self: Box<Self>) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("peer reset"));
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_mapping_and_connection_release_at_high_tier() {
        let dir = TempDir::new().unwrap();
        let manager = ResourceManager::with_temp_root(dir.path());
        let data = dir.path().join("frames.bin");
        std::fs::write(&data, [0u8; 16]).unwrap();

        let engine = crate::mmap::MmapEngine::new(4);
        let view = engine.map_file(&data, crate::mmap::MapMode::ReadWrite).unwrap();
        view.write().unwrap()[..4].copy_from_slice(b"vexp");

        let closed = Arc::new(AtomicUsize::new(0));
        manager.register_mapping("frames", view);
        manager.register_connection(
            "encoder-socket",
            Box::new(Connection {
                closed: closed.clone(),
                fail: false,
            }),
        );
        manager.register_temp_path("scratch", dir.path().join("scratch"));

        let low = manager.clean(CleanupPriority::Medium);
        assert_eq!(low.cleaned_count, 1);
        assert!(manager.is_tracked("frames"));
        assert!(manager.is_tracked("encoder-socket"));
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        let high = manager.clean(CleanupPriority::High);
        assert_eq!(high.cleaned_count, 2);
        assert!(high.is_clean());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked_count(), 0);
        assert_eq!(&std::fs::read(&data).unwrap()[..4], b"vexp");
    }

    #[test]
    fn test_failed_connection_release_is_reported() {
        let manager = ResourceManager::with_temp_root(std::env::temp_dir());
        let closed = Arc::new(AtomicUsize::new(0));
        manager.register_connection("flaky", Box::new(Connection { closed: closed.clone(), fail: true }));
        manager.register_connection("steady", Box::new(Connection { closed: closed.clone(), fail: false }));

        let report = manager.emergency_clean();
        assert_eq!(report.cleaned_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, "flaky");
        assert_eq!(report.errors[0].kind, ResourceKind::Connection);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.tracked_count(), 0);
    }
}
