use frame_relay_common::config::CaptureConfig;
use frame_relay_common::frame::RawFrame;

use crate::mjpeg::MjpegHttpSource;

/// A camera-like device that yields raw frames on demand.
///
/// `open` and `read_frame` are called from the capture thread only, so
/// implementations are free to block.
pub trait CaptureSource: Send {
    /// Acquire the device. Failing here means no frame will ever be read.
    fn open(&mut self) -> Result<(), CaptureError>;

    /// Read the next raw frame.
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to open capture source: {0}")]
    Open(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("unknown capture source {0:?}, expected 'test-pattern' or 'mjpeg'")]
    UnknownSource(String),
}

/// Build the source named by `capture.source`.
pub fn from_config(config: &CaptureConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
    match config.source.as_str() {
        "test-pattern" => Ok(Box::new(TestPatternSource::new(config.width, config.height))),
        "mjpeg" => Ok(Box::new(MjpegHttpSource::new(
            &config.url,
            config.connect_timeout(),
            config.read_timeout(),
        ))),
        other => Err(CaptureError::UnknownSource(other.to_string())),
    }
}

/// Synthetic RGB source: a vertical bar sweeping across a diagonal gradient.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar_width = (w / 16).max(1);
        let bar_start = (self.tick as usize * 4) % w.max(1);
        let shade = (self.tick % 256) as u8;

        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let in_bar = x >= bar_start && x < bar_start + bar_width;
                if in_bar {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / w.max(1)) as u8;
                    let g = (y * 255 / h.max(1)) as u8;
                    data.extend_from_slice(&[r, g, shade]);
                }
            }
        }
        data
    }
}

impl CaptureSource for TestPatternSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Open(format!(
                "test pattern needs non-zero dimensions, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let data = self.render();
        self.tick = self.tick.wrapping_add(1);
        Ok(RawFrame::Rgb8 {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}
