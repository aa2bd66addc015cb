//! Media assets, decoded frame sequences and the texture stream.

mod image_decoder;
mod stream;
mod video;

pub use image_decoder::decode_image;
pub use stream::{PlaybackCursor, StreamState, StreamStatus, TextureStream};
pub use video::{parse_fps, VideoDecoder};

use crate::error::MediaDecodeError;
use crate::frame::PixelFrame;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Declared or inferred media kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Static,
    Animated,
    Video,
}

impl MediaKind {
    /// Infers the kind from leading magic bytes.
    pub fn infer(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            return MediaKind::Animated;
        }
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            return if png_has_animation(bytes) {
                MediaKind::Animated
            } else {
                MediaKind::Static
            };
        }
        if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
            return MediaKind::Video;
        }
        if bytes.starts_with(&[0x1a, 0x45, 0xdf, 0xa3]) {
            return MediaKind::Video;
        }
        if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"AVI " {
            return MediaKind::Video;
        }
        MediaKind::Static
    }

    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Static => "image",
            MediaKind::Animated => "animation",
            MediaKind::Video => "video",
        }
    }
}

/// Walks PNG chunks looking for `acTL` before the first `IDAT`.
fn png_has_animation(bytes: &[u8]) -> bool {
    let mut pos = 8;
    while pos + 8 <= bytes.len() {
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        let tag = &bytes[pos + 4..pos + 8];
        match tag {
            b"acTL" => return true,
            b"IDAT" | b"IEND" => return false,
            _ => {}
        }
        pos = pos.saturating_add(12).saturating_add(len);
    }
    false
}

/// Raw media bytes plus their kind. Immutable once built.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    bytes: Arc<[u8]>,
    kind: MediaKind,
    origin: Option<PathBuf>,
}

impl MediaAsset {
    /// Wraps `bytes`, inferring the kind unless one is declared.
    pub fn new(bytes: impl Into<Arc<[u8]>>, declared: Option<MediaKind>) -> Self {
        let bytes = bytes.into();
        let kind = declared.unwrap_or_else(|| MediaKind::infer(&bytes));
        Self {
            bytes,
            kind,
            origin: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>, declared: Option<MediaKind>) -> Result<Self, MediaDecodeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let mut asset = Self::new(bytes, declared);
        asset.origin = Some(path.to_path_buf());
        Ok(asset)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// File the bytes were read from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

/// One decoded frame. `duration` is `None` for frames shown forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFrame {
    /// RGBA pixels, rows top to bottom.
    pub pixels: PixelFrame,
    pub duration: Option<Duration>,
}

const MIN_FRAME_DURATION: Duration = Duration::from_nanos(1);

/// Decoded frames of one asset. Never empty, never mutated after decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    frames: Vec<SequenceFrame>,
}

impl FrameSequence {
    /// Finite durations shorter than one nanosecond are raised to one.
    pub fn new(mut frames: Vec<SequenceFrame>) -> Result<Self, MediaDecodeError> {
        if frames.is_empty() {
            return Err(MediaDecodeError::Empty);
        }
        for frame in &mut frames {
            if let Some(duration) = &mut frame.duration {
                *duration = (*duration).max(MIN_FRAME_DURATION);
            }
        }
        Ok(Self { frames })
    }

    /// A single frame with infinite duration.
    pub fn still(pixels: PixelFrame) -> Self {
        Self {
            frames: vec![SequenceFrame { pixels, duration: None }],
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, index: usize) -> Option<&SequenceFrame> {
        self.frames.get(index)
    }

    pub fn duration(&self, index: usize) -> Option<Duration> {
        self.frames.get(index).and_then(|f| f.duration)
    }

    /// Loop length, `None` if any frame is infinite.
    pub fn total_duration(&self) -> Option<Duration> {
        self.frames.iter().map(|f| f.duration).sum()
    }

    /// Start offset of frame `index`.
    pub fn offset_of(&self, index: usize) -> Duration {
        self.frames
            .iter()
            .take(index)
            .filter_map(|f| f.duration)
            .sum()
    }
}

/// Shared cancellation flag for one decode.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<(), MediaDecodeError> {
        if self.is_cancelled() {
            Err(MediaDecodeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Turns an asset into a frame sequence. Called off the render thread for
/// background loads, so it must not touch the host.
pub trait MediaDecoder: Send + Sync {
    fn decode(&self, asset: &MediaAsset, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError>;
}

const DEFAULT_VIDEO_FPS: f32 = 24.0;

/// Decoder limits, from the `decode` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeSettings {
    /// Decode videos on a background thread.
    pub background_video: bool,
    pub max_video_frames: usize,
    pub default_video_fps: f32,
    /// Frames larger than this on either side are scaled down.
    pub max_dimension: u32,
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            background_video: true,
            max_video_frames: 600,
            default_video_fps: DEFAULT_VIDEO_FPS,
            max_dimension: 2048,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl DecodeSettings {
    /// The configured fallback frame rate, or 24 fps if it is not a positive
    /// finite number.
    pub fn video_fps(&self) -> f32 {
        if self.default_video_fps.is_finite() && self.default_video_fps > 0.0 {
            self.default_video_fps
        } else {
            DEFAULT_VIDEO_FPS
        }
    }
}

/// Images through the `image` crate, video through ffmpeg.
pub struct StandardDecoder {
    settings: DecodeSettings,
    video: VideoDecoder,
}

impl StandardDecoder {
    pub fn new(settings: DecodeSettings) -> Self {
        let video = VideoDecoder::new(&settings);
        Self { settings, video }
    }
}

impl MediaDecoder for StandardDecoder {
    fn decode(&self, asset: &MediaAsset, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
        match asset.kind() {
            MediaKind::Static | MediaKind::Animated => decode_image(asset, self.settings.max_dimension, cancel),
            MediaKind::Video => self.video.decode(asset, cancel),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infers_kind_from_magic_bytes() {
        assert_eq!(MediaKind::infer(&fixtures::png(2, 2, [0; 4])), MediaKind::Static);
        assert_eq!(MediaKind::infer(&fixtures::gif(&[100, 100])), MediaKind::Animated);
        assert_eq!(MediaKind::infer(b"\0\0\0\x18ftypmp42\0\0\0\0"), MediaKind::Video);
        assert_eq!(MediaKind::infer(&[0x1a, 0x45, 0xdf, 0xa3, 0, 0]), MediaKind::Video);
        assert_eq!(MediaKind::infer(b"RIFF\0\0\0\0AVI LIST"), MediaKind::Video);
        assert_eq!(MediaKind::infer(b"plain"), MediaKind::Static);
    }

    #[test]
    fn test_detects_apng_chunk() {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&[0; 13 + 4]);
        bytes.extend_from_slice(&8u32.to_be_bytes());
        bytes.extend_from_slice(b"acTL");
        bytes.extend_from_slice(&[0; 8 + 4]);
        assert_eq!(MediaKind::infer(&bytes), MediaKind::Animated);
    }

    #[test]
    fn test_declared_kind_wins() {
        let asset = MediaAsset::new(fixtures::png(1, 1, [0; 4]), Some(MediaKind::Video));
        assert_eq!(asset.kind(), MediaKind::Video);
        assert!(asset.origin().is_none());
    }

    #[test]
    fn test_sequence_durations() {
        let frame = |ms| SequenceFrame {
            pixels: PixelFrame::placeholder(),
            duration: Some(Duration::from_millis(ms)),
        };
        let seq = FrameSequence::new(vec![frame(100), frame(50), frame(25)]).unwrap();
        assert_eq!(seq.total_duration(), Some(Duration::from_millis(175)));
        assert_eq!(seq.offset_of(2), Duration::from_millis(150));
        assert!(FrameSequence::new(Vec::new()).is_err());
        assert_eq!(FrameSequence::still(PixelFrame::placeholder()).total_duration(), None);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(MediaDecodeError::Cancelled)));
    }
}
