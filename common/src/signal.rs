use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// One-shot shutdown flag shared between the capture thread and the server.
///
/// Cloning shares the same flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually flipped it.
    pub fn set(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        if first {
            info!("stop signal set");
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns a guard that sets the signal when dropped.
    pub fn guard(&self) -> StopGuard {
        StopGuard {
            signal: self.clone(),
        }
    }
}

/// Sets its [`StopSignal`] on drop, covering early returns and panics.
#[derive(Debug)]
pub struct StopGuard {
    signal: StopSignal,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.signal.set();
    }
}
