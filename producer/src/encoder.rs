use bytes::Bytes;
use frame_relay_common::frame::RawFrame;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;

/// Turns a raw frame into the bytes that go on the wire.
pub trait FrameEncoder: Send {
    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, EncodeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("RGB frame is {got} bytes, expected {expected} for {width}x{height}")]
    Dimensions {
        width: u32,
        height: u32,
        got: usize,
        expected: usize,
    },
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("encoder produced an empty frame")]
    Empty,
}

/// JPEG encoder for RGB frames. Frames that are already JPEG pass through.
///
/// Zero-length output is an error: an empty image part can't be framed.
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, frame: &RawFrame) -> Result<Bytes, EncodeError> {
        match frame {
            RawFrame::Jpeg(data) if data.is_empty() => Err(EncodeError::Empty),
            RawFrame::Jpeg(data) => Ok(Bytes::copy_from_slice(data)),
            RawFrame::Rgb8 {
                width,
                height,
                data,
            } => {
                let expected = *width as usize * *height as usize * 3;
                if *width == 0 || *height == 0 || data.len() != expected {
                    return Err(EncodeError::Dimensions {
                        width: *width,
                        height: *height,
                        got: data.len(),
                        expected,
                    });
                }
                let mut out = Vec::with_capacity(expected / 8);
                ImageJpegEncoder::new_with_quality(&mut out, self.quality).encode(
                    data,
                    *width,
                    *height,
                    ExtendedColorType::Rgb8,
                )?;
                if out.is_empty() {
                    return Err(EncodeError::Empty);
                }
                Ok(Bytes::from(out))
            }
        }
    }
}
