use bytes::BytesMut;
use frame_relay_common::frame::RawFrame;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::source::{CaptureError, CaptureSource};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 64 * 1024;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg { scanned: usize },
}

/// Incremental splitter for a `multipart/x-mixed-replace; boundary=frame` body.
///
/// A part is only complete once the following boundary arrives, so the last
/// part of a stream that ends without one is never returned.
pub struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
}

impl MultipartParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete JPEG payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.state = ParseState::CollectingJpeg { scanned: 0 };
                }
                ParseState::CollectingJpeg { scanned } => {
                    let Some(pos) = find_subsequence(&self.buffer[scanned..], BOUNDARY) else {
                        // Don't re-scan what we've already looked at
                        self.state = ParseState::CollectingJpeg {
                            scanned: self.buffer.len().saturating_sub(BOUNDARY.len()),
                        };
                        return None;
                    };
                    let jpeg_end = scanned + pos;
                    // Strip the \r\n that precedes the boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;

                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParseState::SeekingBoundary;
    }
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls JPEG frames from an upstream MJPEG-over-HTTP stream.
///
/// The blocking client is created in `open`, on the capture thread, because
/// reqwest's blocking client must not be built or dropped inside an async
/// runtime. Its timeout bounds each body read, so an upstream that stops
/// sending surfaces as `CaptureError::Read` after `read_timeout` and is
/// reconnected like a dropped stream.
pub struct MjpegHttpSource {
    url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    client: Option<reqwest::blocking::Client>,
    response: Option<reqwest::blocking::Response>,
    parser: MultipartParser,
    chunk: Vec<u8>,
    backoff: Duration,
    retry_at: Option<Instant>,
}

impl MjpegHttpSource {
    pub fn new(url: &str, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout,
            read_timeout,
            client: None,
            response: None,
            parser: MultipartParser::new(),
            chunk: vec![0u8; READ_CHUNK],
            backoff: INITIAL_BACKOFF,
            retry_at: None,
        }
    }

    fn connect(&mut self) -> Result<(), String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| "source was never opened".to_string())?;
        info!(url = self.url, "connecting to MJPEG stream");
        let response = client.get(&self.url).send().map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP status {}", response.status().as_u16()));
        }
        info!(status = %response.status(), "connected to MJPEG stream");
        self.parser.reset();
        self.response = Some(response);
        Ok(())
    }

    /// Drop the current connection and schedule the next attempt.
    fn schedule_reconnect(&mut self, reason: &str) {
        warn!(url = self.url, reason, "MJPEG stream lost, reconnecting in {:?}", self.backoff);
        self.response = None;
        self.retry_at = Some(Instant::now() + self.backoff);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
    }
}

impl CaptureSource for MjpegHttpSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
            .map_err(|e| CaptureError::Open(e.to_string()))?;
        self.client = Some(client);
        self.connect().map_err(CaptureError::Open)
    }

    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if self.response.is_none() {
            if let Some(at) = self.retry_at {
                if Instant::now() < at {
                    return Err(CaptureError::Read("waiting to reconnect".into()));
                }
            }
            if let Err(e) = self.connect() {
                self.schedule_reconnect(&e);
                return Err(CaptureError::Read(e));
            }
            self.retry_at = None;
        }

        loop {
            if let Some(jpeg) = self.parser.next_frame() {
                self.backoff = INITIAL_BACKOFF;
                debug!(bytes = jpeg.len(), "received MJPEG part");
                return Ok(RawFrame::Jpeg(jpeg));
            }
            let Some(response) = self.response.as_mut() else {
                return Err(CaptureError::Read("no upstream connection".into()));
            };
            match response.read(&mut self.chunk) {
                Ok(0) => {
                    self.schedule_reconnect("stream ended");
                    return Err(CaptureError::Read("upstream stream ended".into()));
                }
                Ok(n) => self.parser.push(&self.chunk[..n]),
                Err(e) => {
                    let reason = e.to_string();
                    self.schedule_reconnect(&reason);
                    return Err(CaptureError::Read(reason));
                }
            }
        }
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
