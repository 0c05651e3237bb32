use frame_relay_common::signal::StopSignal;
use frame_relay_common::slot::LatestFrame;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

use crate::capture::{run_capture_loop, CaptureStats};
use crate::encoder::FrameEncoder;
use crate::source::CaptureSource;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// Owns the background capture thread for as long as the service is up.
///
/// Shutdown is fire-and-forget: `shutdown` (or dropping the service) only sets
/// the stop signal. The loop notices within one frame interval.
pub struct CaptureService {
    stop: StopSignal,
    handle: Option<JoinHandle<CaptureStats>>,
}

impl CaptureService {
    pub fn start(
        source: Box<dyn CaptureSource>,
        encoder: Box<dyn FrameEncoder>,
        slot: Arc<LatestFrame>,
        interval: Duration,
        stop: StopSignal,
    ) -> Result<Self, LifecycleError> {
        let loop_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || run_capture_loop(source, encoder, slot, interval, loop_stop))
            .map_err(|e| {
                stop.set();
                LifecycleError::Spawn(e)
            })?;

        info!(interval_ms = interval.as_millis() as u64, "capture service started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the capture loop to stop without waiting for it.
    pub fn shutdown(&self) {
        if self.stop.set() {
            info!("capture service shutting down");
        }
    }

    /// Stop the loop and wait for its final stats.
    pub fn join(mut self) -> Option<CaptureStats> {
        self.stop.set();
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("capture thread panicked outside the loop body");
                None
            }
        }
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        self.stop.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ExitReason;
    use crate::encoder::JpegEncoder;
    use crate::source::{CaptureError, TestPatternSource};
    use frame_relay_common::frame::RawFrame;

    const INTERVAL: Duration = Duration::from_millis(5);

    fn start_pattern(slot: &Arc<LatestFrame>, stop: &StopSignal) -> CaptureService {
        CaptureService::start(
            Box::new(TestPatternSource::new(16, 16)),
            Box::new(JpegEncoder::new(60)),
            Arc::clone(slot),
            INTERVAL,
            stop.clone(),
        )
        .unwrap()
    }

    fn wait_for_frame(slot: &LatestFrame) {
        for _ in 0..200 {
            if !slot.is_empty() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("no frame published within 1s");
    }

    #[test]
    fn stop_signal_halts_publishing() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        let service = start_pattern(&slot, &stop);
        wait_for_frame(&slot);

        service.shutdown();
        // One interval for the loop to notice, plus slack.
        std::thread::sleep(INTERVAL * 4);
        let seq_after_stop = slot.latest_seq();
        std::thread::sleep(INTERVAL * 10);
        assert_eq!(slot.latest_seq(), seq_after_stop);

        let stats = service.join().unwrap();
        assert_eq!(stats.exit, ExitReason::Stopped);
    }

    #[test]
    fn shutdown_does_not_block_and_is_idempotent() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        let service = start_pattern(&slot, &stop);

        let start = std::time::Instant::now();
        service.shutdown();
        service.shutdown();
        assert!(start.elapsed() < INTERVAL);
        assert!(stop.is_set());
        assert_eq!(service.join().unwrap().exit, ExitReason::Stopped);
    }

    #[test]
    fn drop_signals_stop() {
        let slot = Arc::new(LatestFrame::new());
        let stop = StopSignal::new();
        drop(start_pattern(&slot, &stop));
        assert!(stop.is_set());
    }

    struct Broken;

    impl CaptureSource for Broken {
        fn open(&mut self) -> Result<(), CaptureError> {
            Err(CaptureError::Open("camera busy".into()))
        }

        fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
            Err(CaptureError::Read("not open".into()))
        }
    }

    #[test]
    fn open_failure_ends_thread_without_frames() {
        let slot = Arc::new(LatestFrame::new());
        let service = CaptureService::start(
            Box::new(Broken),
            Box::new(JpegEncoder::new(80)),
            Arc::clone(&slot),
            INTERVAL,
            StopSignal::new(),
        )
        .unwrap();

        let stats = service.join().unwrap();
        assert!(matches!(stats.exit, ExitReason::OpenFailed(_)));
        assert!(slot.is_empty());
    }
}
