use frame_relay_common::frame::EncodedFrame;
use frame_relay_common::signal::StopSignal;
use frame_relay_common::slot::LatestFrame;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::encoder::FrameEncoder;
use crate::source::CaptureSource;

/// Why the capture loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The stop signal was observed.
    Stopped,
    /// The source could not be opened; nothing was published.
    OpenFailed(String),
    /// A panic inside the loop body.
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStats {
    pub published: u64,
    pub capture_failures: u64,
    pub encode_failures: u64,
    pub exit: ExitReason,
}

/// Pull, encode and publish frames until `stop` is set.
///
/// Every `read_frame` and encode failure is counted and skipped; none of them
/// ends the loop. Every iteration, successful or not, ends with a blocking
/// sleep of `interval`, so a failed read is retried one interval later rather
/// than immediately, and a dead device can't spin the capture thread.
pub fn run_capture_loop(
    mut source: Box<dyn CaptureSource>,
    mut encoder: Box<dyn FrameEncoder>,
    slot: Arc<LatestFrame>,
    interval: Duration,
    stop: StopSignal,
) -> CaptureStats {
    let mut stats = CaptureStats {
        published: 0,
        capture_failures: 0,
        encode_failures: 0,
        exit: ExitReason::Stopped,
    };
    let source_name = source.name().to_string();

    if let Err(e) = source.open() {
        error!(source = source_name, error = %e, "cannot open capture source, capture loop exiting");
        stats.exit = ExitReason::OpenFailed(e.to_string());
        return stats;
    }
    info!(source = source_name, interval_ms = interval.as_millis() as u64, "capture loop started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        capture_frames(source.as_mut(), encoder.as_mut(), &slot, interval, &stop, &mut stats)
    }));
    stats.exit = match outcome {
        Ok(exit) => exit,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(source = source_name, panic = msg, "capture loop panicked");
            ExitReason::Fatal(msg)
        }
    };

    info!(
        source = source_name,
        published = stats.published,
        capture_failures = stats.capture_failures,
        encode_failures = stats.encode_failures,
        exit = ?stats.exit,
        "capture loop stopped"
    );
    stats
}

fn capture_frames(
    source: &mut dyn CaptureSource,
    encoder: &mut dyn FrameEncoder,
    slot: &LatestFrame,
    interval: Duration,
    stop: &StopSignal,
    stats: &mut CaptureStats,
) -> ExitReason {
    let mut seq: u64 = 0;

    loop {
        if stop.is_set() {
            return ExitReason::Stopped;
        }

        match source.read_frame() {
            Ok(raw) => match encoder.encode(&raw) {
                Ok(data) => {
                    seq += 1;
                    slot.publish(EncodedFrame::now(data, seq));
                    stats.published += 1;
                    if stats.published % 100 == 0 {
                        debug!(published = stats.published, seq, "frames published");
                    }
                }
                Err(e) => {
                    stats.encode_failures += 1;
                    warn!(error = %e, bytes = raw.payload_size(), "failed to encode frame, skipping");
                }
            },
            Err(e) => {
                stats.capture_failures += 1;
                debug!(error = %e, "frame capture failed, retrying next cycle");
            }
        }

        std::thread::sleep(interval);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
