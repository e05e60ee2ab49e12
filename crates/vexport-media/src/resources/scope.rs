use std::path::PathBuf;

use tracing::{debug, warn};

use super::{CleanupPriority, CleanupReport, ResourceHandle, ResourceId, ResourceManager};
use crate::error::MediaResult;

/// A tracking set of resources released together when the scope ends.
///
/// Ending the scope with [`finish`](Self::finish) returns the cleanup
/// report. Dropping it (early return, `?`, panic unwinding) releases the
/// same resources and logs failures instead.
#[must_use = "a scope releases its resources as soon as it is dropped"]
pub struct ResourceScope {
    manager: ResourceManager,
    id: u64,
    name: String,
    finished: bool,
}

impl ResourceScope {
    pub(crate) fn new(manager: ResourceManager, name: String) -> Self {
        let id = manager.next_scope_id();
        debug!(scope = %name, "Opened resource scope");
        Self {
            manager,
            id,
            name,
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &ResourceManager {
        &self.manager
    }

    pub fn register(&self, key: impl Into<String>, handle: impl Into<ResourceHandle>) -> ResourceId {
        self.manager.insert(key, handle.into(), None, Some(self.id))
    }

    pub fn register_with_priority(
        &self,
        key: impl Into<String>,
        handle: impl Into<ResourceHandle>,
        priority: CleanupPriority,
    ) -> ResourceId {
        self.manager
            .insert(key, handle.into(), Some(priority), Some(self.id))
    }

    /// Create a unique temp directory owned by this scope.
    pub fn create_temp_dir(&self, prefix: &str) -> MediaResult<PathBuf> {
        let path = self.manager.make_temp_dir(prefix)?;
        self.register(format!("{}:temp_dir:{prefix}", self.name), path.clone());
        Ok(path)
    }

    /// End the scope, releasing everything registered through it.
    pub fn finish(mut self) -> CleanupReport {
        self.finished = true;
        let report = self.manager.release_scope(self.id);
        debug!(
            scope = %self.name,
            cleaned = report.cleaned_count,
            errors = report.errors.len(),
            "Closed resource scope"
        );
        report
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let report = self.manager.release_scope(self.id);
        if std::thread::panicking() {
            warn!(
                scope = %self.name,
                cleaned = report.cleaned_count,
                "Released scope resources during unwinding"
            );
        }
        for err in &report.errors {
            warn!(scope = %self.name, error = %err, "Scope resource release failed");
        }
    }
}
