use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a long-running
/// batch job. Jobs poll it at chunk and iteration boundaries only.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.flag.store(true, Ordering::SeqCst); }

    pub fn is_cancelled(&self) -> bool { self.flag.load(Ordering::SeqCst) }

    /// Returns `Err(Cancelled)` wrapped in anyhow once cancellation was requested.
    pub fn check(&self, stage: &'static str) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(Cancelled { stage }.into());
        }
        Ok(())
    }
}

/// Marker error for a job stopped through its [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    pub stage: &'static str,
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cancelled", self.stage)
    }
}

impl std::error::Error for Cancelled {}
