use bytes::Bytes;

/// What a capture source hands to the encoder.
#[derive(Debug, Clone)]
pub enum RawFrame {
    /// Tightly packed RGB8 pixels, `width * height * 3` bytes.
    Rgb8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Already-compressed JPEG (e.g. pulled from an upstream MJPEG stream).
    Jpeg(Vec<u8>),
}

impl RawFrame {
    /// Returns the size of the payload data in bytes.
    pub fn payload_size(&self) -> usize {
        match self {
            RawFrame::Rgb8 { data, .. } => data.len(),
            RawFrame::Jpeg(data) => data.len(),
        }
    }
}

/// One fully encoded JPEG image, ready for transmission.
///
/// `seq` increases by one per successful capture+encode cycle, so readers can
/// tell a fresh frame from one they have already seen without comparing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub seq: u64,
    pub captured_at_ms: i64,
}

impl EncodedFrame {
    pub fn new(data: impl Into<Bytes>, seq: u64, captured_at_ms: i64) -> Self {
        Self {
            data: data.into(),
            seq,
            captured_at_ms,
        }
    }

    /// Stamp a payload with the current wall-clock time.
    pub fn now(data: impl Into<Bytes>, seq: u64) -> Self {
        Self::new(data, seq, chrono::Utc::now().timestamp_millis())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
