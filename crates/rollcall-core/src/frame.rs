//! Decoded RGB frames and image-byte decoding.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("frame data length {len} does not match {width}x{height} RGB geometry")]
    Geometry { len: usize, width: u32, height: u32 },
}

/// A decoded RGB8 image frame.
///
/// Pixel data is row-major, 3 bytes per pixel (R, G, B). Frames are
/// ephemeral per recognition request; persistence is the caller's choice.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap already-decoded RGB8 pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(FrameError::Geometry { len: data.len(), width, height });
        }
        Ok(Self { data, width, height })
    }

    /// Decode encoded image bytes (PNG, JPEG, ...) into an RGB8 frame.
    ///
    /// Undecodable bytes are an immediate caller error, distinct from a
    /// decodable frame that simply contains no face.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FrameError::InvalidImage(e.to_string()))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            data: rgb.into_raw(),
            width,
            height,
        })
    }

    /// Sample one pixel channel (0 = R, 1 = G, 2 = B) without bounds panics.
    #[inline]
    pub(crate) fn channel_at(&self, x: usize, y: usize, channel: usize) -> u8 {
        let idx = (y * self.width as usize + x) * 3 + channel;
        self.data.get(idx).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Frame::decode(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let err = Frame::decode(&[]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidImage(_)));
    }

    #[test]
    fn test_decode_png_roundtrip() {
        // Encode a small RGB image with the image crate, then decode it back.
        let mut img = image::RgbImage::new(4, 2);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(3, 1, image::Rgb([0, 0, 255]));

        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(frame.channel_at(0, 0, 0), 255);
        assert_eq!(frame.channel_at(3, 1, 2), 255);
    }

    #[test]
    fn test_new_rejects_wrong_geometry() {
        let err = Frame::new(vec![0u8; 10], 4, 2).unwrap_err();
        assert!(matches!(err, FrameError::Geometry { len: 10, .. }));
    }

    #[test]
    fn test_channel_at_out_of_range_is_zero() {
        let frame = Frame::new(vec![7u8; 2 * 2 * 3], 2, 2).unwrap();
        assert_eq!(frame.channel_at(0, 0, 0), 7);
        assert_eq!(frame.channel_at(5, 5, 0), 0);
    }
}
