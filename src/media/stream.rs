//! Texture stream: playback of a decoded frame sequence as host textures.
//!
//! Decoding can run on a worker thread. The worker publishes its finished
//! sequence into a single slot tagged with the load generation; the render
//! thread picks it up on the next tick. Only the latest load can publish, so
//! rapid asset swaps never queue stale decodes.

use super::{CancelToken, FrameSequence, MediaAsset, MediaDecoder, MediaKind};
use crate::adapter::{TextureHandle, VersionAdapter};
use crate::error::{HostError, MediaDecodeError};
use crate::frame::PixelFrame;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Index into a sequence plus time spent on that frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    index: usize,
    carry: Duration,
}

impl PlaybackCursor {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Time accumulated on the current frame.
    pub fn carry(&self) -> Duration {
        self.carry
    }

    /// Advances by `delta`, possibly across several frames.
    pub fn advance(&mut self, sequence: &FrameSequence, delta: Duration, looping: bool) {
        if sequence.len() <= 1 {
            return;
        }
        let total = sequence.total_duration();
        // A loop of zero length can never be stepped through.
        let looping = looping && total != Some(Duration::ZERO);
        let delta = match total {
            Some(total) if looping && delta >= total => {
                Duration::from_nanos((delta.as_nanos() % total.as_nanos()) as u64)
            }
            _ => delta,
        };
        self.carry += delta;

        let last = sequence.len() - 1;
        while let Some(duration) = sequence.duration(self.index) {
            if self.carry < duration {
                break;
            }
            if self.index == last && !looping {
                self.carry = Duration::ZERO;
                break;
            }
            self.carry -= duration;
            self.index = if self.index == last { 0 } else { self.index + 1 };
        }
    }

    fn seek(&mut self, index: usize) {
        self.index = index;
        self.carry = Duration::ZERO;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Empty,
    Loading,
    Ready,
    Error(String),
}

/// Playback snapshot for the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub kind: Option<MediaKind>,
    pub state: StreamState,
    pub index: usize,
    pub frame_count: usize,
    pub playing: bool,
    pub looping: bool,
    pub position: Duration,
    pub duration: Option<Duration>,
}

type DecodeSlot = Arc<Mutex<Option<(u64, MediaKind, Result<FrameSequence, MediaDecodeError>)>>>;

struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

pub struct TextureStream {
    decoder: Arc<dyn MediaDecoder>,
    background_video: bool,
    kind: Option<MediaKind>,
    sequence: Option<FrameSequence>,
    cursor: PlaybackCursor,
    playing: bool,
    looping: bool,
    state: StreamState,
    cache: HashMap<usize, TextureHandle>,
    retired: Vec<TextureHandle>,
    blank: Option<TextureHandle>,
    placeholder: Option<TextureHandle>,
    generation: u64,
    in_flight: Option<InFlight>,
    slot: DecodeSlot,
}

impl TextureStream {
    pub fn new(decoder: Arc<dyn MediaDecoder>, background_video: bool) -> Self {
        Self {
            decoder,
            background_video,
            kind: None,
            sequence: None,
            cursor: PlaybackCursor::default(),
            playing: true,
            looping: true,
            state: StreamState::Empty,
            cache: HashMap::new(),
            retired: Vec::new(),
            blank: None,
            placeholder: None,
            generation: 0,
            in_flight: None,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts decoding `asset`. Videos decode on a worker when background
    /// decoding is enabled; everything else decodes before returning.
    pub fn load(&mut self, asset: MediaAsset) {
        self.abandon_in_flight();
        self.generation += 1;
        let generation = self.generation;
        let kind = asset.kind();

        if self.background_video && kind == MediaKind::Video {
            let cancel = CancelToken::new();
            let decoder = self.decoder.clone();
            let slot = self.slot.clone();
            let token = cancel.clone();
            thread::spawn(move || {
                let result = decoder.decode(&asset, &token);
                if token.is_cancelled() {
                    return;
                }
                if let Ok(mut slot) = slot.lock() {
                    if slot.as_ref().map_or(true, |(published, ..)| *published < generation) {
                        *slot = Some((generation, kind, result));
                    }
                }
            });
            self.in_flight = Some(InFlight { generation, cancel });
            self.state = StreamState::Loading;
            info!("Decoding {} in the background", kind.label());
            return;
        }

        let result = self.decoder.decode(&asset, &CancelToken::new());
        self.install(kind, result);
    }

    /// Drops an in-flight decode and keeps the current asset.
    pub fn cancel_load(&mut self) {
        if self.in_flight.is_some() {
            self.abandon_in_flight();
            self.generation += 1;
            self.state = if self.sequence.is_some() {
                StreamState::Ready
            } else {
                StreamState::Empty
            };
            info!("Media load cancelled");
        }
    }

    fn abandon_in_flight(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
        }
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }

    /// Takes a finished background decode, if the latest one has published.
    fn poll_decode(&mut self) {
        let Some(expected) = self.in_flight.as_ref().map(|f| f.generation) else {
            return;
        };
        let published = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        match published {
            Some((generation, kind, result)) if generation == expected => {
                self.in_flight = None;
                self.install(kind, result);
            }
            Some((generation, ..)) => debug!("Discarding stale decode {}", generation),
            None => {}
        }
    }

    fn install(&mut self, kind: MediaKind, result: Result<FrameSequence, MediaDecodeError>) {
        match result {
            Ok(sequence) => {
                info!("Loaded {} with {} frame(s)", kind.label(), sequence.len());
                self.retire_frames();
                self.sequence = Some(sequence);
                self.kind = Some(kind);
                self.cursor = PlaybackCursor::default();
                self.state = StreamState::Ready;
            }
            Err(MediaDecodeError::Cancelled) => {
                self.state = if self.sequence.is_some() {
                    StreamState::Ready
                } else {
                    StreamState::Empty
                };
            }
            Err(err) => {
                warn!("Media decode failed: {}", err);
                self.retire_frames();
                self.sequence = None;
                self.kind = Some(kind);
                self.cursor = PlaybackCursor::default();
                self.state = StreamState::Error(err.to_string());
            }
        }
    }

    fn retire_frames(&mut self) {
        self.retired.extend(self.cache.drain().map(|(_, texture)| texture));
    }

    /// Advances playback. A no-op while paused.
    pub fn tick(&mut self, delta: Duration) {
        self.poll_decode();
        if !self.playing {
            return;
        }
        if let Some(sequence) = &self.sequence {
            self.cursor.advance(sequence, delta, self.looping);
        }
    }

    /// Texture of the current frame. Each frame index is uploaded once.
    pub fn current_frame(&mut self, adapter: &mut VersionAdapter) -> Result<TextureHandle, HostError> {
        for texture in self.retired.drain(..) {
            adapter.release_texture(texture);
        }

        let Some(sequence) = &self.sequence else {
            let is_error = matches!(self.state, StreamState::Error(_));
            let (cached, frame) = if is_error {
                (&mut self.placeholder, PixelFrame::placeholder())
            } else {
                (&mut self.blank, PixelFrame::solid(1, 1, [0, 0, 0, 255]))
            };
            if let Some(texture) = *cached {
                return Ok(texture);
            }
            let texture = adapter.upload_texture(&frame.data, 1, 1)?;
            *cached = Some(texture);
            return Ok(texture);
        };

        let index = self.cursor.index;
        if let Some(texture) = self.cache.get(&index) {
            return Ok(*texture);
        }
        let frame = sequence.frame(index).ok_or_else(|| HostError {
            call: "current_frame",
            reason: format!("frame {} out of range", index),
        })?;
        let upright = frame.pixels.to_rgba().flipped_rows();
        let texture = adapter.upload_texture(&upright.data, upright.width, upright.height)?;
        self.cache.insert(index, texture);
        Ok(texture)
    }

    /// Jumps to `index`, clamped to the sequence.
    pub fn seek(&mut self, index: usize) {
        let last = self.frame_count().saturating_sub(1);
        self.cursor.seek(index.min(last));
    }

    pub fn restart(&mut self) {
        self.seek(0);
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn index(&self) -> usize {
        self.cursor.index
    }

    pub fn frame_count(&self) -> usize {
        self.sequence.as_ref().map_or(0, FrameSequence::len)
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Playback time within the sequence.
    pub fn position(&self) -> Duration {
        self.sequence
            .as_ref()
            .map_or(Duration::ZERO, |s| s.offset_of(self.cursor.index) + self.cursor.carry)
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            kind: self.kind,
            state: self.state.clone(),
            index: self.cursor.index,
            frame_count: self.frame_count(),
            playing: self.playing,
            looping: self.looping,
            position: self.position(),
            duration: self.sequence.as_ref().and_then(FrameSequence::total_duration),
        }
    }

    /// Releases every texture and abandons any decode.
    pub fn release(&mut self, adapter: &mut VersionAdapter) {
        self.abandon_in_flight();
        self.retire_frames();
        self.retired.extend(self.blank.take());
        self.retired.extend(self.placeholder.take());
        for texture in self.retired.drain(..) {
            adapter.release_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{fixtures, SequenceFrame};
    use super::*;
    use crate::adapter::headless::{HeadlessHost, HeadlessProbe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn frames(count: usize, ms: u64) -> FrameSequence {
        let frames = (0..count)
            .map(|i| SequenceFrame {
                pixels: PixelFrame::solid(2, 2, [i as u8, 0, 0, 255]),
                duration: Some(Duration::from_millis(ms)),
            })
            .collect();
        FrameSequence::new(frames).unwrap()
    }

    /// Decoder returning a fixed sequence after an optional delay.
    struct FixedDecoder {
        sequence: Result<FrameSequence, String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedDecoder {
        fn new(sequence: FrameSequence) -> Arc<Self> {
            Arc::new(Self {
                sequence: Ok(sequence),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl MediaDecoder for FixedDecoder {
        fn decode(&self, asset: &MediaAsset, cancel: &CancelToken) -> Result<FrameSequence, MediaDecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = Instant::now();
            while start.elapsed() < self.delay {
                cancel.check()?;
                thread::sleep(Duration::from_millis(1));
            }
            match &self.sequence {
                Ok(seq) if asset.bytes() == b"short" => FrameSequence::new(vec![seq.frame(0).cloned().unwrap()]),
                Ok(seq) => Ok(seq.clone()),
                Err(message) => Err(MediaDecodeError::Unsupported(message.clone())),
            }
        }
    }

    fn adapter() -> (VersionAdapter, HeadlessProbe) {
        let (host, probe) = HeadlessHost::command_encoder(32, 32);
        (VersionAdapter::select("1.21.7", host).unwrap(), probe)
    }

    fn video_asset(bytes: &[u8]) -> MediaAsset {
        MediaAsset::new(bytes.to_vec(), Some(MediaKind::Video))
    }

    fn wait_until(stream: &mut TextureStream, done: impl Fn(&TextureStream) -> bool) {
        let start = Instant::now();
        while !done(stream) {
            assert!(start.elapsed() < Duration::from_secs(5), "timed out waiting for decode");
            thread::sleep(Duration::from_millis(2));
            stream.tick(Duration::ZERO);
        }
    }

    #[test]
    fn test_tick_carries_remainder() {
        let seq = frames(10, 100);
        let mut cursor = PlaybackCursor::default();
        cursor.advance(&seq, Duration::from_millis(250), true);
        assert_eq!(cursor.index(), 2);
        assert_eq!(cursor.carry(), Duration::from_millis(50));
    }

    #[test]
    fn test_looping_index_is_elapsed_mod_frames() {
        let seq = frames(4, 100);
        for k in 0..13u64 {
            for r in [0u64, 1, 99] {
                let mut single = PlaybackCursor::default();
                single.advance(&seq, Duration::from_millis(k * 100 + r), true);
                assert_eq!(single.index(), (k % 4) as usize, "k={} r={}", k, r);
                assert_eq!(single.carry(), Duration::from_millis(r));

                let mut stepped = PlaybackCursor::default();
                for _ in 0..k {
                    stepped.advance(&seq, Duration::from_millis(100), true);
                }
                stepped.advance(&seq, Duration::from_millis(r), true);
                assert_eq!(stepped, single);
            }
        }
    }

    #[test]
    fn test_zero_length_frames_still_advance() {
        let zero = |shade: u8| SequenceFrame {
            pixels: PixelFrame::solid(2, 2, [shade, 0, 0, 255]),
            duration: Some(Duration::ZERO),
        };
        let seq = FrameSequence::new(vec![zero(0), zero(1)]).unwrap();
        assert_eq!(seq.duration(0), Some(Duration::from_nanos(1)));

        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let mut cursor = PlaybackCursor::default();
            for _ in 0..3 {
                cursor.advance(&seq, Duration::from_millis(16), true);
            }
            let _ = tx.send(cursor.index());
        });
        let index = rx.recv_timeout(Duration::from_secs(3)).expect("advance returned");
        assert!(index < 2);
    }

    #[test]
    fn test_non_looping_holds_last_frame() {
        let seq = frames(3, 100);
        let mut cursor = PlaybackCursor::default();
        cursor.advance(&seq, Duration::from_secs(10), false);
        assert_eq!(cursor.index(), 2);
        cursor.advance(&seq, Duration::from_millis(150), false);
        assert_eq!(cursor.index(), 2);
    }

    #[test]
    fn test_static_image_never_advances() {
        let (mut adapter, _) = adapter();
        let decoder = Arc::new(super::super::StandardDecoder::new(Default::default()));
        let mut stream = TextureStream::new(decoder, true);
        stream.load(MediaAsset::new(fixtures::png(4, 4, [0, 255, 0, 255]), None));
        assert_eq!(stream.frame_count(), 1);
        assert_eq!(stream.status().duration, None);
        for _ in 0..5 {
            stream.tick(Duration::from_secs(3600));
            assert_eq!(stream.index(), 0);
        }
        assert!(stream.current_frame(&mut adapter).is_ok());
    }

    #[test]
    fn test_animated_gif_plays_through_stream() {
        let decoder = Arc::new(super::super::StandardDecoder::new(Default::default()));
        let mut stream = TextureStream::new(decoder, true);
        let delays = [100u32; 10];
        stream.load(MediaAsset::new(fixtures::gif(&delays), None));
        assert_eq!(stream.frame_count(), 10);
        stream.tick(Duration::from_millis(250));
        assert_eq!(stream.index(), 2);
        assert_eq!(stream.cursor().carry(), Duration::from_millis(50));
        assert_eq!(stream.position(), Duration::from_millis(250));
    }

    #[test]
    fn test_paused_tick_is_a_no_op() {
        let mut stream = TextureStream::new(FixedDecoder::new(frames(5, 100)), false);
        stream.load(video_asset(b"clip"));
        stream.set_playing(false);
        stream.tick(Duration::from_millis(350));
        assert_eq!(stream.index(), 0);
        stream.set_playing(true);
        stream.tick(Duration::from_millis(350));
        assert_eq!(stream.index(), 3);
        stream.seek(99);
        assert_eq!(stream.index(), 4);
        stream.restart();
        assert_eq!(stream.cursor(), PlaybackCursor::default());
    }

    #[test]
    fn test_frames_upload_once_per_index() {
        let (mut adapter, probe) = adapter();
        let mut stream = TextureStream::new(FixedDecoder::new(frames(3, 100)), false);
        stream.load(video_asset(b"clip"));
        let first = stream.current_frame(&mut adapter).unwrap();
        assert_eq!(stream.current_frame(&mut adapter).unwrap(), first);
        assert_eq!(probe.texture_uploads(), 1);
        stream.tick(Duration::from_millis(100));
        let second = stream.current_frame(&mut adapter).unwrap();
        assert_ne!(first, second);
        stream.tick(Duration::from_millis(200));
        assert_eq!(stream.current_frame(&mut adapter).unwrap(), first);
        assert_eq!(probe.texture_uploads(), 2);
    }

    #[test]
    fn test_uploads_are_bottom_row_first() {
        let (mut adapter, probe) = adapter();
        let mut top_red = vec![255, 0, 0, 255];
        top_red.extend_from_slice(&[0, 0, 255, 255]);
        let seq = FrameSequence::still(PixelFrame::from_data(1, 2, crate::frame::PixelFormat::Rgba, top_red));
        let mut stream = TextureStream::new(FixedDecoder::new(seq), false);
        stream.load(video_asset(b"still"));
        let texture = stream.current_frame(&mut adapter).unwrap();
        let pixels = probe.texture_pixels(texture.id()).unwrap();
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_decode_failure_shows_placeholder() {
        let (mut adapter, probe) = adapter();
        let decoder = Arc::new(super::super::StandardDecoder::new(Default::default()));
        let mut stream = TextureStream::new(decoder, true);
        stream.load(MediaAsset::new(b"not an image".to_vec(), Some(MediaKind::Static)));
        assert!(matches!(stream.state(), StreamState::Error(_)));
        let texture = stream.current_frame(&mut adapter).unwrap();
        assert_eq!((texture.width(), texture.height()), (1, 1));
        assert_eq!(probe.texture_pixels(texture.id()).unwrap(), vec![255, 0, 255, 255]);
        stream.tick(Duration::from_secs(1));
        assert_eq!(stream.index(), 0);
    }

    #[test]
    fn test_swapping_assets_releases_old_frames_next_tick() {
        let (mut adapter, probe) = adapter();
        let mut stream = TextureStream::new(FixedDecoder::new(frames(3, 100)), false);
        stream.load(video_asset(b"clip"));
        stream.current_frame(&mut adapter).unwrap();
        stream.tick(Duration::from_millis(100));
        stream.current_frame(&mut adapter).unwrap();
        assert_eq!(probe.live_textures(), 2);
        stream.load(video_asset(b"short"));
        assert_eq!(stream.frame_count(), 1);
        stream.current_frame(&mut adapter).unwrap();
        assert_eq!(probe.live_textures(), 1);
        stream.release(&mut adapter);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_background_decode_publishes_whole_sequence() {
        let (mut adapter, _) = adapter();
        let decoder = Arc::new(FixedDecoder {
            sequence: Ok(frames(4, 100)),
            delay: Duration::from_millis(20),
            calls: AtomicUsize::new(0),
        });
        let mut stream = TextureStream::new(decoder, true);
        stream.load(video_asset(b"clip"));
        assert_eq!(stream.state(), &StreamState::Loading);
        assert_eq!(stream.frame_count(), 0);
        assert!(stream.current_frame(&mut adapter).is_ok());
        wait_until(&mut stream, |s| !s.is_loading());
        assert_eq!(stream.frame_count(), 4);
        assert_eq!(stream.state(), &StreamState::Ready);
    }

    #[test]
    fn test_cancel_keeps_previous_asset() {
        let decoder = Arc::new(FixedDecoder {
            sequence: Ok(frames(4, 100)),
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        });
        let mut stream = TextureStream::new(decoder, true);
        stream.background_video = false;
        stream.load(video_asset(b"short"));
        assert_eq!(stream.frame_count(), 1);
        stream.background_video = true;
        stream.load(video_asset(b"clip"));
        stream.cancel_load();
        assert_eq!(stream.state(), &StreamState::Ready);
        thread::sleep(Duration::from_millis(250));
        stream.tick(Duration::ZERO);
        assert_eq!(stream.frame_count(), 1);
        assert!(!stream.is_loading());
    }

    #[test]
    fn test_newer_load_supersedes_in_flight_decode() {
        let decoder = Arc::new(FixedDecoder {
            sequence: Ok(frames(4, 100)),
            delay: Duration::from_millis(30),
            calls: AtomicUsize::new(0),
        });
        let mut stream = TextureStream::new(decoder.clone(), true);
        stream.load(video_asset(b"clip"));
        stream.load(video_asset(b"short"));
        wait_until(&mut stream, |s| !s.is_loading());
        assert_eq!(stream.frame_count(), 1);
        assert!(decoder.calls.load(Ordering::SeqCst) >= 1);
    }
}
