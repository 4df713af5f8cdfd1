use super::{CompilationError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between a caller and running compilations.
///
/// Compilations only look at the flag between stages. A running `opa`
/// process or an in-flight native call is always allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(CompilationError::Cancelled { stage });
        }
        Ok(())
    }
}
