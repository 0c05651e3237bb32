use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::frame::EncodedFrame;

/// Single-capacity, overwrite-on-write holder for the most recent frame.
///
/// Backed by an atomic pointer swap: `publish` replaces the whole frame in one
/// store and never waits on readers, and `peek` hands out a reference-counted
/// snapshot that stays valid no matter how many publishes happen after it.
#[derive(Debug, Default)]
pub struct LatestFrame {
    inner: ArcSwapOption<EncodedFrame>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self {
            inner: ArcSwapOption::empty(),
        }
    }

    /// Replace whatever frame is currently held.
    pub fn publish(&self, frame: EncodedFrame) {
        self.inner.store(Some(Arc::new(frame)));
    }

    /// The most recently published frame, or `None` if nothing was published yet.
    /// Non-destructive: every reader sees the same frame until the next publish.
    pub fn peek(&self) -> Option<Arc<EncodedFrame>> {
        self.inner.load_full()
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.peek().map(|frame| frame.seq)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_none()
    }
}
