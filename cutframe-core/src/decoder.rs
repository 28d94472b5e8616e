// VIDEO DECODERS
//
// A decoder session owns one file (or one synthetic source) and hands out
// RGBA frames in presentation order. Exactly one worker drives it at a time;
// the trait is Send so the session can move between the player and its
// prefetch worker.
//
//   open_decoder(path) ──┬── .mp4 / .m4v / .mov ──► Mp4Decoder (demux + OpenH264)
//                        └── anything else ────────► DecoderOpenError
//
//   TestPatternDecoder: color bars, no file, used headless and in tests

use image::{Rgba, RgbaImage};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::demux::{Codec, DemuxError, Mp4Demuxer};
use crate::frame::{Frame, Rotation};

#[cfg(feature = "software-decode")]
use crate::h264::{H264Decoder, H264Error};

/// Fallback when the container doesn't give a usable frame rate.
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

// ============================================================================
// Errors
// ============================================================================

/// Failure to open a video. Fatal for that session.
#[derive(Debug, Error)]
pub enum DecoderOpenError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),
    #[error("No video track")]
    NoVideoTrack,
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("Codec init failed: {0}")]
    CodecInit(String),
    #[error("Container error: {0}")]
    Demux(#[from] DemuxError),
}

/// Failure to produce one frame. The prefetch worker recovers from these.
#[derive(Debug, Error)]
pub enum DecodeFrameError {
    #[error("Container error: {0}")]
    Demux(#[from] DemuxError),
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Decoder is closed")]
    Closed,
}

// ============================================================================
// Trait
// ============================================================================

/// Stream properties probed at open time.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub duration_ms: i64,
    pub frame_rate: f64,
    pub rotation: Rotation,
    pub width: u32,
    pub height: u32,
    /// `None` for synthetic sources
    pub codec: Option<Codec>,
}

impl VideoInfo {
    /// Display time of one frame, at least 1 ms.
    pub fn frame_interval_ms(&self) -> i64 {
        let rate = if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            self.frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        ((1000.0 / rate).round() as i64).max(1)
    }
}

/// Result of pulling from a decoder.
#[derive(Debug, Clone)]
pub enum Grab {
    Frame(Frame),
    EndOfStream,
}

pub trait VideoDecoder: Send {
    fn info(&self) -> &VideoInfo;

    /// Next frame in presentation order.
    fn grab(&mut self) -> Result<Grab, DecodeFrameError>;

    /// Reposition so the next grabbed frame is the one on screen at
    /// `timestamp_ms` (clamped into the stream).
    fn seek(&mut self, timestamp_ms: i64) -> Result<(), DecodeFrameError>;

    fn restart(&mut self) -> Result<(), DecodeFrameError> {
        self.seek(0)
    }

    /// Release the underlying file. Later grabs fail with `Closed`.
    fn close(&mut self);

    /// Backend name for logs
    fn name(&self) -> &str;
}

impl std::fmt::Debug for dyn VideoDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoDecoder")
            .field("name", &self.name())
            .field("info", self.info())
            .finish()
    }
}

// ============================================================================
// Opening
// ============================================================================

/// Open `path` with the backend matching its container.
pub fn open_decoder(path: impl AsRef<Path>) -> Result<Box<dyn VideoDecoder>, DecoderOpenError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DecoderOpenError::NotFound(path.to_path_buf()));
    }

    let unreadable = |source| DecoderOpenError::Unreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut head = [0u8; 8];
    let head_len = File::open(path)
        .and_then(|mut file| file.read(&mut head))
        .map_err(unreadable)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let is_iso_bmff = head_len == 8 && &head[4..8] == b"ftyp";

    match extension.as_str() {
        "mp4" | "m4v" | "mov" => open_mp4(path),
        _ if is_iso_bmff => open_mp4(path),
        "" => Err(DecoderOpenError::UnsupportedContainer("(no extension)".into())),
        other => Err(DecoderOpenError::UnsupportedContainer(other.to_string())),
    }
}

#[cfg(feature = "software-decode")]
fn open_mp4(path: &Path) -> Result<Box<dyn VideoDecoder>, DecoderOpenError> {
    Ok(Box::new(Mp4Decoder::open(path)?))
}

#[cfg(not(feature = "software-decode"))]
fn open_mp4(_path: &Path) -> Result<Box<dyn VideoDecoder>, DecoderOpenError> {
    Err(DecoderOpenError::CodecInit(
        "built without the software-decode feature".into(),
    ))
}

// ============================================================================
// MP4 + H.264
// ============================================================================

/// Codec stage of [`Mp4Decoder`]: access units in, pictures out in
/// presentation order.
#[cfg(feature = "software-decode")]
pub(crate) trait PictureDecoder: Send {
    /// `Ok(None)` while the codec holds the picture back.
    fn decode(&mut self, data: &[u8]) -> Result<Option<RgbaImage>, H264Error>;

    /// Pictures still held back once the input is exhausted.
    fn flush(&mut self) -> Result<Vec<RgbaImage>, H264Error>;

    fn reset(&mut self) -> Result<(), H264Error>;
}

#[cfg(feature = "software-decode")]
impl PictureDecoder for H264Decoder {
    fn decode(&mut self, data: &[u8]) -> Result<Option<RgbaImage>, H264Error> {
        H264Decoder::decode(self, data)
    }

    fn flush(&mut self) -> Result<Vec<RgbaImage>, H264Error> {
        H264Decoder::flush(self)
    }

    fn reset(&mut self) -> Result<(), H264Error> {
        H264Decoder::reset(self)
    }
}

#[cfg(feature = "software-decode")]
pub struct Mp4Decoder {
    path: PathBuf,
    demuxer: Option<Mp4Demuxer<BufReader<File>>>,
    video_track: usize,
    codec: Box<dyn PictureDecoder>,
    info: VideoInfo,
    /// Presentation times of pictures the codec holds. It emits pictures in
    /// presentation order, so the smallest pending one belongs to the next
    /// picture. Packets the codec rejected never enter.
    pending_pts: BinaryHeap<Reverse<i64>>,
    /// After a seek, pictures that went off screen before this are dropped
    skip_before_ms: Option<i64>,
    /// Codec flushed at the end of the input
    flushed: bool,
    /// Flushed pictures not handed out yet
    drained: VecDeque<Frame>,
}

#[cfg(feature = "software-decode")]
impl Mp4Decoder {
    pub fn open(path: &Path) -> Result<Self, DecoderOpenError> {
        let file = File::open(path).map_err(|source| DecoderOpenError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let demuxer = Mp4Demuxer::new(BufReader::new(file))?;

        let video_track = demuxer
            .video_track_index()
            .ok_or(DecoderOpenError::NoVideoTrack)?;
        let track = &demuxer.tracks()[video_track];
        match track.codec() {
            Some(Codec::H264) => {}
            _ => {
                return Err(DecoderOpenError::UnsupportedCodec(
                    String::from_utf8_lossy(&track.fourcc).into_owned(),
                ))
            }
        }

        let codec = H264Decoder::new(&track.codec_config)
            .map_err(|e| DecoderOpenError::CodecInit(e.to_string()))?;
        Ok(Self::with_codec(path, demuxer, video_track, Box::new(codec)))
    }

    fn with_codec(
        path: &Path,
        demuxer: Mp4Demuxer<BufReader<File>>,
        video_track: usize,
        codec: Box<dyn PictureDecoder>,
    ) -> Self {
        let track = &demuxer.tracks()[video_track];

        let frame_rate = match track.frame_rate() {
            rate if rate.is_finite() && rate > 0.0 => rate,
            _ => DEFAULT_FRAME_RATE,
        };
        let duration_ms = match track.duration_ms() {
            0 => demuxer.movie_duration_ms(),
            ms => ms,
        };
        let info = VideoInfo {
            duration_ms,
            frame_rate,
            rotation: track.rotation,
            width: track.width,
            height: track.height,
            codec: Some(Codec::H264),
        };

        info!(
            "Opened {} ({}x{}, {:.2} fps, {} ms, rotation {}°)",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            info.duration_ms,
            info.rotation.degrees()
        );

        Self {
            path: path.to_path_buf(),
            demuxer: Some(demuxer),
            video_track,
            codec,
            info,
            pending_pts: BinaryHeap::new(),
            skip_before_ms: None,
            flushed: false,
            drained: VecDeque::new(),
        }
    }

    /// Timestamp for the picture the codec just produced.
    fn next_pts(&mut self) -> Option<i64> {
        self.pending_pts.pop().map(|Reverse(pts)| pts)
    }

    /// Flush the codec at the end of the input, queueing what it held back.
    fn drain_codec(&mut self) -> Result<(), DecodeFrameError> {
        self.flushed = true;
        let pictures = self
            .codec
            .flush()
            .map_err(|e| DecodeFrameError::Codec(e.to_string()))?;
        for picture in pictures {
            let Some(timestamp_ms) = self.next_pts() else {
                break;
            };
            if self.keep(timestamp_ms) {
                self.drained.push_back(Frame::new(picture, timestamp_ms));
            }
        }
        self.pending_pts.clear();
        Ok(())
    }

    fn keep(&mut self, timestamp_ms: i64) -> bool {
        match self.skip_before_ms {
            Some(target) if timestamp_ms + self.info.frame_interval_ms() <= target => false,
            Some(_) => {
                self.skip_before_ms = None;
                true
            }
            None => true,
        }
    }
}

#[cfg(feature = "software-decode")]
impl VideoDecoder for Mp4Decoder {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn grab(&mut self) -> Result<Grab, DecodeFrameError> {
        loop {
            let demuxer = self.demuxer.as_mut().ok_or(DecodeFrameError::Closed)?;
            if let Some(frame) = self.drained.pop_front() {
                return Ok(Grab::Frame(frame));
            }
            if self.flushed {
                return Ok(Grab::EndOfStream);
            }

            let Some(packet) = demuxer.read_packet()? else {
                self.drain_codec()?;
                continue;
            };
            if packet.track_index != self.video_track {
                continue;
            }

            let picture = self
                .codec
                .decode(&packet.data)
                .map_err(|e| DecodeFrameError::Codec(e.to_string()))?;
            self.pending_pts.push(Reverse(packet.pts_ms));
            let Some(picture) = picture else {
                continue;
            };

            let timestamp_ms = self.next_pts().unwrap_or(packet.pts_ms);
            if self.keep(timestamp_ms) {
                return Ok(Grab::Frame(Frame::new(picture, timestamp_ms)));
            }
        }
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<(), DecodeFrameError> {
        let target = timestamp_ms.clamp(0, self.info.duration_ms);
        let demuxer = self.demuxer.as_mut().ok_or(DecodeFrameError::Closed)?;
        let keyframe = demuxer.seek_to_keyframe(self.video_track, target);

        self.codec
            .reset()
            .map_err(|e| DecodeFrameError::Codec(e.to_string()))?;
        self.pending_pts.clear();
        self.drained.clear();
        self.flushed = false;
        self.skip_before_ms = Some(target);

        debug!("Seek to {} ms (keyframe at {:?} ms)", target, keyframe);
        Ok(())
    }

    fn close(&mut self) {
        self.drained.clear();
        if self.demuxer.take().is_some() {
            debug!("Closed {}", self.path.display());
        }
    }

    fn name(&self) -> &str {
        "mp4/openh264"
    }
}

// ============================================================================
// Test pattern
// ============================================================================

/// Synthetic source: color bars with a moving marker.
///
/// Frame `i` has timestamp `round(i * 1000 / frame_rate)`; frames run while
/// the timestamp is below the duration.
pub struct TestPatternDecoder {
    info: VideoInfo,
    next_index: u64,
    frame_count: u64,
    closed: bool,
}

impl TestPatternDecoder {
    pub fn new(duration_ms: i64, frame_rate: f64, width: u32, height: u32) -> Self {
        let frame_rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };
        let duration_ms = duration_ms.max(0);
        let frame_count = (duration_ms as f64 * frame_rate / 1000.0).ceil() as u64;

        Self {
            info: VideoInfo {
                duration_ms,
                frame_rate,
                rotation: Rotation::None,
                width: width.max(1),
                height: height.max(1),
                codec: None,
            },
            next_index: 0,
            frame_count,
            closed: false,
        }
    }

    /// Pretend the container asked for this display rotation.
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.info.rotation = rotation;
        self
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn timestamp_of(&self, index: u64) -> i64 {
        (index as f64 * 1000.0 / self.info.frame_rate).round() as i64
    }

    fn render(&self, index: u64) -> RgbaImage {
        let (width, height) = (self.info.width, self.info.height);
        let offset = (index % 256) as u8;

        let mut image = RgbaImage::from_fn(width, height, |x, _| {
            let bar = (x * 8 / width) as u8;
            Rgba([
                ((bar & 1) * 255).wrapping_add(offset),
                (((bar >> 1) & 1) * 255).wrapping_add(offset),
                (((bar >> 2) & 1) * 255).wrapping_add(offset),
                255,
            ])
        });

        // Marker sweeps left to right once per second of video
        let marker = (width / 8).clamp(1, 20);
        let travel = u64::from(width.saturating_sub(marker).max(1));
        let per_second = self.info.frame_rate.round().max(1.0) as u64;
        let marker_x = ((index % per_second) * travel / per_second) as u32;
        let shade = ((index * 3) % 256) as u8;
        for y in 0..marker.min(height) {
            for x in marker_x..(marker_x + marker).min(width) {
                image.put_pixel(x, y, Rgba([shade, 255 - shade, 128, 255]));
            }
        }
        image
    }
}

impl VideoDecoder for TestPatternDecoder {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn grab(&mut self) -> Result<Grab, DecodeFrameError> {
        if self.closed {
            return Err(DecodeFrameError::Closed);
        }
        if self.next_index >= self.frame_count {
            return Ok(Grab::EndOfStream);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Grab::Frame(Frame::new(self.render(index), self.timestamp_of(index))))
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<(), DecodeFrameError> {
        if self.closed {
            return Err(DecodeFrameError::Closed);
        }
        let target = timestamp_ms.clamp(0, self.info.duration_ms);
        let index = (target as f64 * self.info.frame_rate / 1000.0 + 1e-9).floor() as u64;
        self.next_index = index.min(self.frame_count);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn grab_frame(decoder: &mut dyn VideoDecoder) -> Frame {
        match decoder.grab().unwrap() {
            Grab::Frame(frame) => frame,
            Grab::EndOfStream => panic!("unexpected end of stream"),
        }
    }

    #[test]
    fn test_pattern_timestamps_and_end() {
        let mut decoder = TestPatternDecoder::new(200, 30.0, 32, 16);
        assert_eq!(decoder.frame_count(), 6);
        assert_eq!(decoder.info().frame_interval_ms(), 33);

        let mut timestamps = Vec::new();
        while let Grab::Frame(frame) = decoder.grab().unwrap() {
            assert_eq!((frame.width(), frame.height()), (32, 16));
            timestamps.push(frame.timestamp_ms());
        }
        assert_eq!(timestamps, vec![0, 33, 67, 100, 133, 167]);
        assert!(matches!(decoder.grab().unwrap(), Grab::EndOfStream));
    }

    #[test]
    fn test_pattern_seek() {
        let mut decoder = TestPatternDecoder::new(10_000, 30.0, 16, 16);
        decoder.seek(5000).unwrap();
        assert_eq!(grab_frame(&mut decoder).timestamp_ms(), 5000);

        // The frame on screen at 5020 started at 5000
        decoder.seek(5020).unwrap();
        assert_eq!(grab_frame(&mut decoder).timestamp_ms(), 5000);

        decoder.seek(-50).unwrap();
        assert_eq!(grab_frame(&mut decoder).timestamp_ms(), 0);

        decoder.seek(99_999).unwrap();
        assert!(matches!(decoder.grab().unwrap(), Grab::EndOfStream));

        decoder.restart().unwrap();
        assert_eq!(grab_frame(&mut decoder).timestamp_ms(), 0);
    }

    #[test]
    fn test_pattern_close() {
        let mut decoder = TestPatternDecoder::new(1000, 25.0, 8, 8);
        decoder.close();
        assert!(matches!(decoder.grab(), Err(DecodeFrameError::Closed)));
        assert!(matches!(decoder.seek(0), Err(DecodeFrameError::Closed)));
    }

    #[test]
    fn test_pattern_frames_differ() {
        let mut decoder = TestPatternDecoder::new(1000, 30.0, 64, 32);
        let first = grab_frame(&mut decoder);
        let second = grab_frame(&mut decoder);
        assert_ne!(first.image().as_raw(), second.image().as_raw());
    }

    #[test]
    fn test_frame_interval_fallback() {
        let info = VideoInfo {
            duration_ms: 0,
            frame_rate: 0.0,
            rotation: Rotation::None,
            width: 1,
            height: 1,
            codec: None,
        };
        assert_eq!(info.frame_interval_ms(), 33);
        let fast = VideoInfo {
            frame_rate: 5000.0,
            ..info
        };
        assert_eq!(fast.frame_interval_ms(), 1);
    }

    #[test]
    fn test_open_missing_file() {
        let err = open_decoder("/definitely/not/here.mp4").unwrap_err();
        assert!(matches!(err, DecoderOpenError::NotFound(_)));
    }

    #[test]
    fn test_open_unsupported_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        std::fs::write(&path, b"RIFF\0\0\0\0AVI LIST").unwrap();
        let err = open_decoder(&path).unwrap_err();
        assert!(matches!(err, DecoderOpenError::UnsupportedContainer(ext) if ext == "avi"));
    }

    #[test]
    fn test_open_garbage_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mp4");
        std::fs::write(&path, [0u8; 3]).unwrap();
        assert!(open_decoder(&path).is_err());
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn test_open_mp4_probes_stream() {
        use crate::demux::tests::sample_file;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.MOV");
        std::fs::write(&path, sample_file()).unwrap();

        let mut decoder = open_decoder(&path).unwrap();
        assert_eq!(decoder.name(), "mp4/openh264");
        let info = decoder.info().clone();
        assert_eq!(info.rotation, Rotation::Cw90);
        assert_eq!(info.duration_ms, 200);
        assert_eq!((info.width, info.height), (320, 240));
        assert!((info.frame_rate - 30.0).abs() < 1e-9);
        assert_eq!(info.codec, Some(Codec::H264));

        // Sample payloads aren't real H.264: every grab either errors or
        // skips ahead, and the stream still ends
        let mut ended = false;
        for _ in 0..16 {
            match decoder.grab() {
                Ok(Grab::EndOfStream) => {
                    ended = true;
                    break;
                }
                Ok(Grab::Frame(_)) => panic!("garbage decoded into a picture"),
                Err(_) => {}
            }
        }
        assert!(ended);

        decoder.seek(150).unwrap();
        decoder.close();
        assert!(matches!(decoder.grab(), Err(DecodeFrameError::Closed)));
    }

    /// Holds each picture back by one packet, like a reordering codec, and
    /// rejects packets whose payload starts with 2.
    #[cfg(feature = "software-decode")]
    struct DelayedCodec {
        held: Option<RgbaImage>,
    }

    #[cfg(feature = "software-decode")]
    impl PictureDecoder for DelayedCodec {
        fn decode(&mut self, data: &[u8]) -> Result<Option<RgbaImage>, H264Error> {
            if data[0] == 2 {
                return Err(H264Error::Decode("corrupt slice".into()));
            }
            let picture = RgbaImage::from_pixel(1, 1, Rgba([data[0], 0, 0, 255]));
            Ok(self.held.replace(picture))
        }

        fn flush(&mut self) -> Result<Vec<RgbaImage>, H264Error> {
            Ok(self.held.take().into_iter().collect())
        }

        fn reset(&mut self) -> Result<(), H264Error> {
            self.held = None;
            Ok(())
        }
    }

    #[cfg(feature = "software-decode")]
    fn delayed_mp4(dir: &tempfile::TempDir) -> Mp4Decoder {
        use crate::demux::tests::sample_file;

        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, sample_file()).unwrap();
        let demuxer = Mp4Demuxer::new(BufReader::new(File::open(&path).unwrap())).unwrap();
        Mp4Decoder::with_codec(&path, demuxer, 0, Box::new(DelayedCodec { held: None }))
    }

    #[cfg(feature = "software-decode")]
    fn drain(decoder: &mut Mp4Decoder) -> Vec<(i64, u8)> {
        let mut shown = Vec::new();
        while let Grab::Frame(frame) = decoder.grab().unwrap() {
            shown.push((frame.timestamp_ms(), frame.image().get_pixel(0, 0).0[0]));
        }
        shown
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn test_rejected_packet_keeps_timestamps_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let mut decoder = delayed_mp4(&dir);

        assert!(matches!(decoder.grab(), Err(DecodeFrameError::Codec(_))));
        // Each picture keeps its own packet's time; the held-back last one
        // comes out of the flush at the end
        assert_eq!(
            drain(&mut decoder),
            vec![(0, 1), (66, 3), (100, 4), (133, 5), (166, 6)]
        );
        assert!(matches!(decoder.grab().unwrap(), Grab::EndOfStream));
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn test_mp4_seek_drops_pictures_before_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut decoder = delayed_mp4(&dir);

        // Decoding restarts at the 100 ms keyframe; that picture is gone by 150
        decoder.seek(150).unwrap();
        assert_eq!(drain(&mut decoder), vec![(133, 5), (166, 6)]);

        decoder.restart().unwrap();
        assert!(matches!(decoder.grab(), Err(DecodeFrameError::Codec(_))));
        assert_eq!(drain(&mut decoder).first(), Some(&(0, 1)));
    }

    #[test]
    fn test_open_without_extension_sniffs_ftyp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip");
        std::fs::write(&path, b"\0\0\0\x10ftypisom\0\0\0\0").unwrap();
        // Recognized as ISO-BMFF, then rejected for having no moov
        let err = open_decoder(&path).unwrap_err();
        assert!(!matches!(err, DecoderOpenError::UnsupportedContainer(_)));
    }
}
