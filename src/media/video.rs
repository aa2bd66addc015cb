//! Video decoding through the `ffprobe` and `ffmpeg` command-line tools.

use super::{CancelToken, DecodeSettings, FrameSequence, MediaAsset, SequenceFrame};
use crate::error::MediaDecodeError;
use crate::frame::{PixelFormat, PixelFrame};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Decodes a whole video into memory, up to a frame limit.
pub struct VideoDecoder {
    ffmpeg: String,
    ffprobe: String,
    default_fps: f32,
    max_frames: usize,
    max_dimension: u32,
}

struct ProbeInfo {
    width: u32,
    height: u32,
    fps: f32,
}

/// Temporary copy of in-memory video bytes, removed on drop.
struct SpilledFile(PathBuf);

impl Drop for SpilledFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

impl VideoDecoder {
    pub fn new(settings: &DecodeSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg.clone(),
            ffprobe: settings.ffprobe.clone(),
            default_fps: settings.video_fps(),
            max_frames: settings.max_video_frames.max(1),
            max_dimension: settings.max_dimension,
        }
    }

    pub fn decode(&self, asset: &MediaAsset, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
        let mut _spilled = None;
        let path = match asset.origin() {
            Some(path) => path.to_path_buf(),
            None => {
                let path = std::env::temp_dir().join(format!(
                    "canvas-glsl-{}-{:p}.video",
                    std::process::id(),
                    asset.bytes().as_ptr()
                ));
                std::fs::write(&path, asset.bytes())?;
                _spilled = Some(SpilledFile(path.clone()));
                path
            }
        };

        let probe = self.probe(&path)?;
        info!("Video: {}x{}, {:.2} fps", probe.width, probe.height, probe.fps);
        cancel.check()?;
        self.read_frames(&path, &probe, cancel)
    }

    fn probe(&self, path: &Path) -> Result<ProbeInfo, MediaDecodeError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height,r_frame_rate", "-of", "csv=p=0"])
            .arg(path)
            .output()
            .map_err(|e| subprocess(&self.ffprobe, e.to_string()))?;
        if !output.status.success() {
            return Err(subprocess(&self.ffprobe, String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parts: Vec<&str> = stdout.trim().split(',').collect();
        if parts.len() < 2 {
            return Err(subprocess(&self.ffprobe, format!("unexpected output {:?}", stdout.trim())));
        }
        let dimension = |s: &str| {
            s.trim()
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| subprocess(&self.ffprobe, format!("invalid dimension {:?}", s)))
        };
        let width = dimension(parts[0])?;
        let height = dimension(parts[1])?;
        let fps = parts
            .get(2)
            .map(|s| parse_fps(s.trim()))
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.default_fps);
        Ok(ProbeInfo { width, height, fps })
    }

    fn read_frames(&self, path: &Path, probe: &ProbeInfo, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
        // ffmpeg -i <file> -f image2pipe -pix_fmt rgba -vcodec rawvideo -
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-i"])
            .arg(path)
            .arg("-frames:v")
            .arg(self.max_frames.to_string())
            .args(["-f", "image2pipe", "-pix_fmt", "rgba", "-vcodec", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| subprocess(&self.ffmpeg, e.to_string()))?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(subprocess(&self.ffmpeg, "stdout was not captured".to_string()));
        };

        let frame_size = probe.width as usize * probe.height as usize * 4;
        let mut buffer = vec![0u8; frame_size];
        let mut frames = Vec::new();
        while frames.len() < self.max_frames {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaDecodeError::Cancelled);
            }
            match stdout.read_exact(&mut buffer) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    warn!("Error reading from ffmpeg: {}", e);
                    break;
                }
            }
            let index = frames.len() as u64;
            let pixels = PixelFrame::from_data(probe.width, probe.height, PixelFormat::Rgba, buffer.clone())
                .scale_to_fit(self.max_dimension);
            frames.push(SequenceFrame {
                pixels,
                duration: Some(frame_duration(index, probe.fps)),
            });
        }
        drop(stdout);
        let _ = child.kill();
        let status = child.wait()?;
        let stderr = stderr_reader.and_then(|h| h.join().ok()).unwrap_or_default();

        if frames.is_empty() {
            let message = if stderr.trim().is_empty() {
                format!("no frames decoded ({})", status)
            } else {
                stderr.trim().to_string()
            };
            return Err(subprocess(&self.ffmpeg, message));
        }
        info!("Decoded {} video frames", frames.len());
        FrameSequence::new(frames)
    }
}

/// Duration of frame `index` at `fps`, from rounded cumulative boundaries so
/// that durations never drift from the stream clock.
fn frame_duration(index: u64, fps: f32) -> Duration {
    let boundary = |i: u64| (i as f64 * 1e9 / f64::from(fps)).round() as u64;
    Duration::from_nanos(boundary(index + 1) - boundary(index))
}

fn subprocess(tool: &str, message: String) -> MediaDecodeError {
    MediaDecodeError::Subprocess {
        tool: tool.to_string(),
        message,
    }
}

/// Parses ffprobe frame rates such as `30000/1001` or `25`.
pub fn parse_fps(s: &str) -> f32 {
    if let Some((num, den)) = s.split_once('/') {
        let n: f32 = num.parse().unwrap_or(0.0);
        let d: f32 = den.parse().unwrap_or(1.0);
        if d == 0.0 {
            0.0
        } else {
            n / d
        }
    } else {
        s.parse().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fps() {
        assert_eq!(parse_fps("25/1"), 25.0);
        assert!((parse_fps("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_fps("0/0"), 0.0);
        assert_eq!(parse_fps("N/A"), 0.0);
        assert_eq!(parse_fps("24"), 24.0);
    }

    #[test]
    fn test_frame_durations_sum_to_exact_boundaries() {
        let total: Duration = (0..30).map(|i| frame_duration(i, 30.0)).sum();
        assert_eq!(total, Duration::from_secs(1));
        assert_eq!(frame_duration(0, 30.0), Duration::from_nanos(33_333_333));
        assert_eq!(frame_duration(1, 30.0), Duration::from_nanos(33_333_334));
    }

    #[test]
    fn test_decoder_ignores_non_positive_default_fps() {
        let settings = DecodeSettings {
            default_video_fps: -1.0,
            ..Default::default()
        };
        let decoder = VideoDecoder::new(&settings);
        assert_eq!(decoder.default_fps, 24.0);
        assert!(frame_duration(0, decoder.default_fps) > Duration::ZERO);
    }

    #[test]
    fn test_missing_tool_is_a_subprocess_error() {
        let settings = DecodeSettings {
            ffprobe: "canvas-glsl-no-such-ffprobe".to_string(),
            ..Default::default()
        };
        let decoder = VideoDecoder::new(&settings);
        let asset = MediaAsset::new(b"\0\0\0\x18ftypmp42".to_vec(), None);
        match decoder.decode(&asset, &CancelToken::new()) {
            Err(MediaDecodeError::Subprocess { tool, .. }) => assert_eq!(tool, "canvas-glsl-no-such-ffprobe"),
            other => panic!("unexpected result {:?}", other.map(|s| s.len())),
        }
    }
}
