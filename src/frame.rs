//! Pixel frame types and pixel format conversions.

use image::RgbaImage;

/// Supported pixel formats for decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
    /// BGRA with 8 bits per channel, as some decoders emit it
    Bgra,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba | PixelFormat::Bgra => 4,
        }
    }
}

/// A single frame of pixel data, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Raw pixel data
    pub data: Vec<u8>,
}

impl PixelFrame {
    /// Creates a zeroed frame with the given dimensions and format.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            data: vec![0; size],
        }
    }

    /// Creates a frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
        }
    }

    /// A frame filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = (width as usize) * (height as usize);
        Self::from_data(width, height, PixelFormat::Rgba, rgba.repeat(pixels))
    }

    /// The 1x1 magenta frame shown when media cannot be decoded.
    pub fn placeholder() -> Self {
        Self::solid(1, 1, [255, 0, 255, 255])
    }

    /// Whether `data` holds exactly `width * height` pixels.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel()
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> PixelFrame {
        match self.format {
            PixelFormat::Rgba => self.clone(),
            PixelFormat::Rgb => {
                let mut rgba = Vec::with_capacity(self.data.len() / 3 * 4);
                for px in self.data.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                PixelFrame::from_data(self.width, self.height, PixelFormat::Rgba, rgba)
            }
            PixelFormat::Bgra => {
                let mut rgba = self.data.clone();
                for px in rgba.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                PixelFrame::from_data(self.width, self.height, PixelFormat::Rgba, rgba)
            }
        }
    }

    /// Returns a copy with the row order reversed.
    pub fn flipped_rows(&self) -> PixelFrame {
        let stride = self.width as usize * self.format.bytes_per_pixel();
        if stride == 0 {
            return self.clone();
        }
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks_exact(stride).rev() {
            data.extend_from_slice(row);
        }
        PixelFrame::from_data(self.width, self.height, self.format, data)
    }

    /// Scale this frame down if either dimension exceeds `max_dimension`.
    /// Preserves aspect ratio. Always converts to RGBA format.
    pub fn scale_to_fit(&self, max_dimension: u32) -> PixelFrame {
        let rgba = self.to_rgba();
        let max_dim = self.width.max(self.height);
        if max_dim <= max_dimension {
            return rgba;
        }

        let scale = max_dimension as f32 / max_dim as f32;
        let new_width = ((self.width as f32 * scale) as u32).max(1);
        let new_height = ((self.height as f32 * scale) as u32).max(1);

        let Some(img) = RgbaImage::from_raw(rgba.width, rgba.height, rgba.data.clone()) else {
            tracing::warn!("Frame data does not match {}x{}, skipping resize", rgba.width, rgba.height);
            return rgba;
        };
        let resized = image::imageops::resize(&img, new_width, new_height, image::imageops::FilterType::Triangle);
        PixelFrame::from(resized)
    }
}

impl From<RgbaImage> for PixelFrame {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        PixelFrame::from_data(width, height, PixelFormat::Rgba, img.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_rgba_conversion() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = PixelFrame::from_data(2, 2, PixelFormat::Rgb, rgb_data);
        let rgba_frame = frame.to_rgba();

        assert_eq!(rgba_frame.format, PixelFormat::Rgba);
        assert_eq!(rgba_frame.data.len(), 16);
        assert_eq!(&rgba_frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba_frame.data[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_bgra_swaps_red_and_blue() {
        let frame = PixelFrame::from_data(1, 1, PixelFormat::Bgra, vec![10, 20, 30, 40]);
        assert_eq!(frame.to_rgba().data, vec![30, 20, 10, 40]);
    }

    #[test]
    fn test_flipped_rows_reverses_row_order() {
        let frame = PixelFrame::from_data(1, 3, PixelFormat::Rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
        assert_eq!(frame.flipped_rows().data, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }

    #[test]
    fn test_scale_to_fit_preserves_aspect() {
        let frame = PixelFrame::solid(400, 200, [1, 2, 3, 255]);
        let scaled = frame.scale_to_fit(100);
        assert_eq!((scaled.width, scaled.height), (100, 50));
        assert!(scaled.is_consistent());
        assert_eq!(&scaled.data[0..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_placeholder_is_single_pixel() {
        let p = PixelFrame::placeholder();
        assert_eq!((p.width, p.height), (1, 1));
        assert!(p.is_consistent());
    }
}
