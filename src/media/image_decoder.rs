//! Still and animated image decoding through the `image` crate.

use super::{CancelToken, FrameSequence, MediaAsset, MediaKind, SequenceFrame};
use crate::error::MediaDecodeError;
use crate::frame::PixelFrame;
use image::codecs::gif::GifDecoder;
use image::codecs::png::PngDecoder;
use image::{AnimationDecoder, Frames};
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;

const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Decodes a still or animated image. Frames larger than `max_dimension`
/// are scaled down.
pub fn decode_image(asset: &MediaAsset, max_dimension: u32, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
    let bytes = asset.bytes();
    let sequence = match (asset.kind(), image::guess_format(bytes)?) {
        (MediaKind::Animated, image::ImageFormat::Gif) => {
            let decoder = GifDecoder::new(Cursor::new(bytes))?;
            collect_frames(decoder.into_frames(), max_dimension, cancel)?
        }
        (MediaKind::Animated, image::ImageFormat::Png) => {
            let decoder = PngDecoder::new(Cursor::new(bytes))?;
            if decoder.is_apng()? {
                collect_frames(decoder.apng()?.into_frames(), max_dimension, cancel)?
            } else {
                still(bytes, max_dimension)?
            }
        }
        _ => still(bytes, max_dimension)?,
    };
    debug!("Decoded {} with {} frame(s)", asset.kind().label(), sequence.len());
    Ok(sequence)
}

fn still(bytes: &[u8], max_dimension: u32) -> Result<FrameSequence, MediaDecodeError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    Ok(FrameSequence::still(PixelFrame::from(img).scale_to_fit(max_dimension)))
}

fn collect_frames(frames: Frames<'_>, max_dimension: u32, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
    let mut out = Vec::new();
    for frame in frames {
        cancel.check()?;
        let frame = frame?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let pixels = PixelFrame::from(frame.into_buffer()).scale_to_fit(max_dimension);
        out.push(SequenceFrame {
            pixels,
            duration: Some(frame_delay(numer, denom)),
        });
    }
    if out.len() == 1 {
        out[0].duration = None;
    }
    FrameSequence::new(out)
}

/// Zero delays mean the default; short delays are clamped.
fn frame_delay(numer: u32, denom: u32) -> Duration {
    if numer == 0 || denom == 0 {
        return DEFAULT_FRAME_DELAY;
    }
    let nanos = u64::from(numer) * 1_000_000 / u64::from(denom);
    Duration::from_nanos(nanos).max(MIN_FRAME_DELAY)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_static_image_is_one_infinite_frame() {
        let asset = MediaAsset::new(fixtures::png(3, 2, [10, 20, 30, 255]), None);
        let seq = decode_image(&asset, 2048, &CancelToken::new()).unwrap();
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.duration(0), None);
        let frame = &seq.frame(0).unwrap().pixels;
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(&frame.data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_gif_frames_keep_their_delays() {
        let asset = MediaAsset::new(fixtures::gif(&[100, 100, 100]), None);
        let seq = decode_image(&asset, 2048, &CancelToken::new()).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.duration(1), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_gif_delays_are_clamped() {
        let asset = MediaAsset::new(fixtures::gif(&[0, 10, 40]), None);
        let seq = decode_image(&asset, 2048, &CancelToken::new()).unwrap();
        assert_eq!(seq.duration(0), Some(DEFAULT_FRAME_DELAY));
        assert_eq!(seq.duration(1), Some(MIN_FRAME_DELAY));
        assert_eq!(seq.duration(2), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_cancelled_decode_stops() {
        let asset = MediaAsset::new(fixtures::gif(&[100, 100]), None);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(decode_image(&asset, 2048, &token), Err(MediaDecodeError::Cancelled)));
    }

    #[test]
    fn test_corrupt_bytes_fail() {
        let asset = MediaAsset::new(b"GIF89a-truncated".to_vec(), None);
        assert!(decode_image(&asset, 2048, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_large_frames_are_scaled() {
        let asset = MediaAsset::new(fixtures::png(64, 32, [0, 0, 0, 255]), None);
        let seq = decode_image(&asset, 16, &CancelToken::new()).unwrap();
        let frame = &seq.frame(0).unwrap().pixels;
        assert_eq!((frame.width, frame.height), (16, 8));
    }
}
