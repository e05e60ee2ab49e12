use std::time::Duration;

/// Accumulated performance counters for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageStats {
    pub name: String,
    pub invocations: u64,
    pub errors: u64,
    pub total_duration: Duration,
}

impl StageStats {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record(&mut self, elapsed: Duration, failed: bool) {
        self.invocations += 1;
        self.total_duration += elapsed;
        if failed {
            self.errors += 1;
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new(std::mem::take(&mut self.name));
    }

    /// Mean duration per invocation; zero before the first call.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.invocations) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(self.total_duration.as_secs_f64() / self.invocations as f64),
        }
    }
}
