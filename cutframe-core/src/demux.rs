// MP4 / MOV DEMUXER
//
// Only what the preview pipeline needs from ISO-BMFF:
//
//   moov ─┬─ mvhd                     movie duration
//         └─ trak ─┬─ tkhd            track id, display matrix (rotation)
//                  └─ mdia ─┬─ mdhd   timescale, media duration
//                           ├─ hdlr   vide / soun / ...
//                           └─ minf ── stbl ─┬─ stsd  codec fourcc, size, avcC
//                                            ├─ stts  decode deltas
//                                            ├─ ctts  composition offsets
//                                            ├─ stsc  samples per chunk
//                                            ├─ stsz  sample sizes
//                                            ├─ stco / co64  chunk offsets
//                                            └─ stss  sync samples
//
// Samples of every track are flattened into one table at open time, so packet
// reads and keyframe seeks are lookups instead of table walks.

use std::io::{Read, Seek, SeekFrom};
use thiserror::Error;

use crate::frame::Rotation;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed container: {0}")]
    Malformed(String),
}

pub type DemuxResult<T> = Result<T, DemuxError>;

// ============================================================================
// Atom types
// ============================================================================

const MOOV: u32 = 0x6D6F6F76; // moov
const MVHD: u32 = 0x6D766864; // mvhd
const TRAK: u32 = 0x7472616B; // trak
const TKHD: u32 = 0x746B6864; // tkhd
const MDIA: u32 = 0x6D646961; // mdia
const MDHD: u32 = 0x6D646864; // mdhd
const HDLR: u32 = 0x68646C72; // hdlr
const MINF: u32 = 0x6D696E66; // minf
const STBL: u32 = 0x7374626C; // stbl
const STSD: u32 = 0x73747364; // stsd
const STTS: u32 = 0x73747473; // stts
const CTTS: u32 = 0x63747473; // ctts
const STSC: u32 = 0x73747363; // stsc
const STSZ: u32 = 0x7374737A; // stsz
const STCO: u32 = 0x7374636F; // stco
const CO64: u32 = 0x636F3634; // co64
const STSS: u32 = 0x73747373; // stss

const AVCC: u32 = 0x61766343; // avcC
const HVCC: u32 = 0x68766343; // hvcC

const HANDLER_VIDE: u32 = 0x76696465; // 'vide'
const HANDLER_SOUN: u32 = 0x736F756E; // 'soun'

/// Bytes between a visual sample entry header and its child boxes.
const VISUAL_SAMPLE_ENTRY_LEN: u64 = 78;

// ============================================================================
// Public types
// ============================================================================

/// Video codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
}

impl Codec {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"avc1" | b"avc3" | b"h264" | b"H264" => Some(Codec::H264),
            b"hvc1" | b"hev1" | b"h265" | b"H265" => Some(Codec::H265),
            b"vp08" | b"VP8 " => Some(Codec::Vp8),
            b"vp09" | b"VP9 " => Some(Codec::Vp9),
            b"av01" | b"AV1 " => Some(Codec::Av1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// One sample as laid out in the file. Times are in track timescale units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub dts: i64,
    pub pts: i64,
    pub keyframe: bool,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub fourcc: [u8; 4],
    pub timescale: u32,
    /// Media duration in timescale units (mdhd)
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    /// avcC / hvcC payload
    pub codec_config: Vec<u8>,
    pub samples: Vec<Sample>,
    /// Subtracted from every pts so the earliest presentation is 0
    pts_shift: i64,
}

impl Track {
    fn empty() -> Self {
        Self {
            id: 0,
            kind: TrackKind::Other,
            fourcc: [0; 4],
            timescale: 1000,
            duration: 0,
            width: 0,
            height: 0,
            rotation: Rotation::None,
            codec_config: Vec::new(),
            samples: Vec::new(),
            pts_shift: 0,
        }
    }

    pub fn codec(&self) -> Option<Codec> {
        Codec::from_fourcc(&self.fourcc)
    }

    fn to_ms(&self, ticks: i64) -> i64 {
        let timescale = i64::from(self.timescale.max(1));
        ticks.saturating_mul(1000) / timescale
    }

    pub fn pts_ms(&self, sample: &Sample) -> i64 {
        self.to_ms(sample.pts - self.pts_shift).max(0)
    }

    pub fn dts_ms(&self, sample: &Sample) -> i64 {
        self.to_ms(sample.dts)
    }

    pub fn duration_ms(&self) -> i64 {
        let media = if self.duration > 0 {
            self.duration as i64
        } else {
            self.samples.last().map(|s| s.dts).unwrap_or(0)
        };
        self.to_ms(media)
    }

    /// Average frames per second over the media duration.
    pub fn frame_rate(&self) -> f64 {
        let ticks = if self.duration > 0 {
            self.duration as f64
        } else {
            self.samples.last().map(|s| s.dts as f64).unwrap_or(0.0)
        };
        if ticks <= 0.0 || self.samples.is_empty() {
            return 0.0;
        }
        self.samples.len() as f64 * f64::from(self.timescale.max(1)) / ticks
    }
}

/// A packet of compressed data from the container
#[derive(Debug, Clone)]
pub struct Packet {
    pub track_index: usize,
    pub pts_ms: i64,
    pub dts_ms: i64,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

// ============================================================================
// Sample tables
// ============================================================================

#[derive(Debug, Clone, Default)]
struct SampleTable {
    sample_sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    sample_to_chunk: Vec<(u32, u32)>, // first_chunk (1-based), samples_per_chunk
    time_to_sample: Vec<(u32, u32)>,  // sample_count, sample_delta
    composition_offsets: Vec<(u32, i32)>,
    sync_samples: Vec<u32>, // 1-based; empty = every sample is a keyframe
}

impl SampleTable {
    fn build_samples(&self) -> DemuxResult<Vec<Sample>> {
        let count = self.sample_sizes.len();
        let mut samples = Vec::with_capacity(count);

        // Offsets from stsc + stco + stsz
        let mut stsc_idx = 0;
        'chunks: for (chunk_idx, &chunk_offset) in self.chunk_offsets.iter().enumerate() {
            let chunk_number = chunk_idx as u32 + 1;
            while stsc_idx + 1 < self.sample_to_chunk.len()
                && self.sample_to_chunk[stsc_idx + 1].0 <= chunk_number
            {
                stsc_idx += 1;
            }
            let per_chunk = match self.sample_to_chunk.get(stsc_idx) {
                Some(&(_, n)) => n,
                None => break,
            };

            let mut offset = chunk_offset;
            for _ in 0..per_chunk {
                let Some(&size) = self.sample_sizes.get(samples.len()) else {
                    break 'chunks;
                };
                samples.push(Sample {
                    offset,
                    size,
                    dts: 0,
                    pts: 0,
                    keyframe: true,
                });
                offset = offset.saturating_add(u64::from(size));
            }
        }

        if samples.len() < count {
            return Err(DemuxError::Malformed(format!(
                "chunk tables cover {} of {} samples",
                samples.len(),
                count
            )));
        }

        // Decode times
        let mut dts = 0i64;
        let mut deltas = self
            .time_to_sample
            .iter()
            .flat_map(|&(n, delta)| std::iter::repeat(delta).take(n as usize));
        for sample in samples.iter_mut() {
            sample.dts = dts;
            dts += i64::from(deltas.next().unwrap_or(0));
        }

        // Presentation times
        let mut offsets = self
            .composition_offsets
            .iter()
            .flat_map(|&(n, off)| std::iter::repeat(off).take(n as usize));
        for sample in samples.iter_mut() {
            sample.pts = sample.dts + i64::from(offsets.next().unwrap_or(0));
        }

        if !self.sync_samples.is_empty() {
            for (i, sample) in samples.iter_mut().enumerate() {
                sample.keyframe = self.sync_samples.binary_search(&(i as u32 + 1)).is_ok();
            }
        }

        Ok(samples)
    }
}

// ============================================================================
// Demuxer
// ============================================================================

pub struct Mp4Demuxer<R: Read + Seek> {
    reader: R,
    file_size: u64,
    timescale: u32,
    duration: u64,
    tracks: Vec<Track>,
    cursors: Vec<usize>,
}

impl<R: Read + Seek> Mp4Demuxer<R> {
    pub fn new(reader: R) -> DemuxResult<Self> {
        let mut demuxer = Self {
            reader,
            file_size: 0,
            timescale: 1000,
            duration: 0,
            tracks: Vec::new(),
            cursors: Vec::new(),
        };
        demuxer.parse_top_level()?;
        if demuxer.tracks.is_empty() {
            return Err(DemuxError::Malformed("no tracks (missing moov)".into()));
        }
        demuxer.cursors = vec![0; demuxer.tracks.len()];
        Ok(demuxer)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Index of the first video track.
    pub fn video_track_index(&self) -> Option<usize> {
        self.tracks
            .iter()
            .position(|t| t.kind == TrackKind::Video && !t.samples.is_empty())
    }

    /// Movie duration from mvhd.
    pub fn movie_duration_ms(&self) -> i64 {
        (self.duration as i64).saturating_mul(1000) / i64::from(self.timescale.max(1))
    }

    /// Read the next packet of any track, in decode-time order.
    /// `Ok(None)` once every track is exhausted.
    pub fn read_packet(&mut self) -> DemuxResult<Option<Packet>> {
        let mut best: Option<(usize, i64)> = None;
        for (idx, track) in self.tracks.iter().enumerate() {
            if let Some(sample) = track.samples.get(self.cursors[idx]) {
                let time = track.dts_ms(sample);
                if best.map_or(true, |(_, t)| time < t) {
                    best = Some((idx, time));
                }
            }
        }

        let Some((track_index, dts_ms)) = best else {
            return Ok(None);
        };
        let track = &self.tracks[track_index];
        let sample = track.samples[self.cursors[track_index]];
        let pts_ms = track.pts_ms(&sample);

        let in_file = sample
            .offset
            .checked_add(u64::from(sample.size))
            .is_some_and(|end| end <= self.file_size);
        if !in_file {
            return Err(DemuxError::Malformed(format!(
                "sample of {} bytes at {} lies outside the file",
                sample.size, sample.offset
            )));
        }

        self.reader.seek(SeekFrom::Start(sample.offset))?;
        let mut data = vec![0u8; sample.size as usize];
        self.reader.read_exact(&mut data)?;
        self.cursors[track_index] += 1;

        Ok(Some(Packet {
            track_index,
            pts_ms,
            dts_ms,
            keyframe: sample.keyframe,
            data,
        }))
    }

    /// Position every track so decoding restarts at the last keyframe whose
    /// presentation time is at or before `target_ms`. Returns that keyframe's pts.
    pub fn seek_to_keyframe(&mut self, track_index: usize, target_ms: i64) -> Option<i64> {
        let track = self.tracks.get(track_index)?;
        let mut chosen = None;
        for (i, sample) in track.samples.iter().enumerate() {
            if sample.keyframe {
                if track.pts_ms(sample) <= target_ms || chosen.is_none() {
                    chosen = Some(i);
                } else {
                    break;
                }
            }
        }
        let key_idx = chosen.unwrap_or(0);
        let key_sample = *track.samples.get(key_idx)?;
        let key_dts_ms = track.dts_ms(&key_sample);
        let key_pts_ms = track.pts_ms(&key_sample);

        for (idx, other) in self.tracks.iter().enumerate() {
            self.cursors[idx] = if idx == track_index {
                key_idx
            } else {
                other
                    .samples
                    .iter()
                    .position(|s| other.dts_ms(s) >= key_dts_ms)
                    .unwrap_or(other.samples.len())
            };
        }
        Some(key_pts_ms)
    }

    pub fn rewind(&mut self) {
        self.cursors.iter_mut().for_each(|c| *c = 0);
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    fn parse_top_level(&mut self) -> DemuxResult<()> {
        let file_size = self.reader.seek(SeekFrom::End(0))?;
        self.file_size = file_size;
        self.reader.seek(SeekFrom::Start(0))?;

        let mut pos = 0u64;
        while pos + 8 <= file_size {
            let (atom_type, body_end) = self.read_atom_header(file_size)?;
            if atom_type == MOOV {
                self.parse_moov(body_end)?;
            }
            self.reader.seek(SeekFrom::Start(body_end))?;
            pos = body_end;
        }
        Ok(())
    }

    /// Reads a box header, returning the type and the absolute end of the box.
    fn read_atom_header(&mut self, parent_end: u64) -> DemuxResult<(u32, u64)> {
        let start = self.reader.stream_position()?;
        let size = self.read_u32()? as u64;
        let atom_type = self.read_u32()?;

        let end = match size {
            0 => parent_end,
            1 => {
                let large = self.read_u64()?;
                if large < 16 {
                    return Err(DemuxError::Malformed(format!(
                        "box at {} declares large size {}",
                        start, large
                    )));
                }
                start.checked_add(large).ok_or_else(|| {
                    DemuxError::Malformed(format!("box size overflow at {}", start))
                })?
            }
            n if n < 8 => {
                return Err(DemuxError::Malformed(format!(
                    "box at {} declares size {}",
                    start, n
                )))
            }
            n => start + n,
        };

        let header_end = self.reader.stream_position()?;
        if end < header_end {
            return Err(DemuxError::Malformed(format!(
                "box {} at {} ends inside its own header",
                fourcc_string(atom_type),
                start
            )));
        }
        if end > parent_end {
            return Err(DemuxError::Malformed(format!(
                "box {} at {} overruns its parent",
                fourcc_string(atom_type),
                start
            )));
        }
        Ok((atom_type, end))
    }

    fn parse_moov(&mut self, end: u64) -> DemuxResult<()> {
        while self.reader.stream_position()? + 8 <= end {
            let (atom_type, body_end) = self.read_atom_header(end)?;
            match atom_type {
                MVHD => self.parse_mvhd()?,
                TRAK => {
                    let mut track = Track::empty();
                    let mut table = SampleTable::default();
                    self.parse_trak(&mut track, &mut table, body_end)?;
                    track.samples = table.build_samples()?;
                    track.pts_shift = track.samples.iter().map(|s| s.pts).min().unwrap_or(0);
                    self.tracks.push(track);
                }
                _ => {}
            }
            self.reader.seek(SeekFrom::Start(body_end))?;
        }
        Ok(())
    }

    fn parse_mvhd(&mut self) -> DemuxResult<()> {
        let version = self.read_u8()?;
        self.skip_bytes(3)?; // flags
        if version == 1 {
            self.skip_bytes(16)?; // creation + modification
            self.timescale = self.read_u32()?;
            self.duration = self.read_u64()?;
        } else {
            self.skip_bytes(8)?;
            self.timescale = self.read_u32()?;
            self.duration = u64::from(self.read_u32()?);
        }
        Ok(())
    }

    fn parse_trak(&mut self, track: &mut Track, table: &mut SampleTable, end: u64) -> DemuxResult<()> {
        while self.reader.stream_position()? + 8 <= end {
            let (atom_type, body_end) = self.read_atom_header(end)?;
            match atom_type {
                TKHD => self.parse_tkhd(track)?,
                MDIA | MINF | STBL => self.parse_trak(track, table, body_end)?,
                MDHD => self.parse_mdhd(track)?,
                HDLR => self.parse_hdlr(track)?,
                STSD => self.parse_stsd(track, body_end)?,
                STTS => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 8)?;
                    for _ in 0..count {
                        let n = self.read_u32()?;
                        let delta = self.read_u32()?;
                        table.time_to_sample.push((n, delta));
                    }
                }
                CTTS => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 8)?;
                    for _ in 0..count {
                        let n = self.read_u32()?;
                        let offset = self.read_u32()? as i32;
                        table.composition_offsets.push((n, offset));
                    }
                }
                STSC => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 12)?;
                    for _ in 0..count {
                        let first_chunk = self.read_u32()?;
                        let per_chunk = self.read_u32()?;
                        self.skip_bytes(4)?; // sample_description_index
                        table.sample_to_chunk.push((first_chunk, per_chunk));
                    }
                }
                STSZ => {
                    self.skip_bytes(4)?;
                    let uniform = self.read_u32()?;
                    table.sample_sizes = if uniform == 0 {
                        let count = self.read_entry_count(body_end, 4)?;
                        (0..count).map(|_| self.read_u32()).collect::<DemuxResult<_>>()?
                    } else {
                        let count = self.read_u32()?;
                        if u64::from(uniform) * u64::from(count) > self.file_size {
                            return Err(DemuxError::Malformed(format!(
                                "{} samples of {} bytes exceed the file",
                                count, uniform
                            )));
                        }
                        vec![uniform; count as usize]
                    };
                }
                STCO => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 4)?;
                    for _ in 0..count {
                        table.chunk_offsets.push(u64::from(self.read_u32()?));
                    }
                }
                CO64 => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 8)?;
                    for _ in 0..count {
                        table.chunk_offsets.push(self.read_u64()?);
                    }
                }
                STSS => {
                    self.skip_bytes(4)?;
                    let count = self.read_entry_count(body_end, 4)?;
                    for _ in 0..count {
                        table.sync_samples.push(self.read_u32()?);
                    }
                    table.sync_samples.sort_unstable();
                }
                _ => {}
            }
            self.reader.seek(SeekFrom::Start(body_end))?;
        }
        Ok(())
    }

    fn parse_tkhd(&mut self, track: &mut Track) -> DemuxResult<()> {
        let version = self.read_u8()?;
        self.skip_bytes(3)?;
        if version == 1 {
            self.skip_bytes(16)?;
            track.id = self.read_u32()?;
            self.skip_bytes(4 + 8)?; // reserved + duration
        } else {
            self.skip_bytes(8)?;
            track.id = self.read_u32()?;
            self.skip_bytes(4 + 4)?;
        }
        self.skip_bytes(8 + 2 + 2 + 2 + 2)?; // reserved, layer, alternate_group, volume, reserved

        // Display matrix [a b u; c d v; x y w], a/b/c/d in 16.16 fixed point
        let a = self.read_u32()? as i32;
        let b = self.read_u32()? as i32;
        track.rotation = rotation_from_matrix(a, b);
        Ok(())
    }

    fn parse_mdhd(&mut self, track: &mut Track) -> DemuxResult<()> {
        let version = self.read_u8()?;
        self.skip_bytes(3)?;
        if version == 1 {
            self.skip_bytes(16)?;
            track.timescale = self.read_u32()?;
            track.duration = self.read_u64()?;
        } else {
            self.skip_bytes(8)?;
            track.timescale = self.read_u32()?;
            track.duration = u64::from(self.read_u32()?);
        }
        Ok(())
    }

    fn parse_hdlr(&mut self, track: &mut Track) -> DemuxResult<()> {
        self.skip_bytes(4 + 4)?; // version/flags, pre_defined
        track.kind = match self.read_u32()? {
            HANDLER_VIDE => TrackKind::Video,
            HANDLER_SOUN => TrackKind::Audio,
            _ => TrackKind::Other,
        };
        Ok(())
    }

    fn parse_stsd(&mut self, track: &mut Track, end: u64) -> DemuxResult<()> {
        self.skip_bytes(4)?;
        let entry_count = self.read_u32()?;
        if entry_count == 0 {
            return Ok(());
        }

        let entry_start = self.reader.stream_position()?;
        let (fourcc, entry_end) = self.read_atom_header(end)?;
        track.fourcc = fourcc.to_be_bytes();

        if track.kind != TrackKind::Video {
            return Ok(());
        }

        self.skip_bytes(6 + 2 + 16)?; // reserved, data_reference_index, pre_defined
        track.width = u32::from(self.read_u16()?);
        track.height = u32::from(self.read_u16()?);

        // Codec configuration boxes follow the fixed visual sample entry
        let children = entry_start + 8 + VISUAL_SAMPLE_ENTRY_LEN;
        self.reader.seek(SeekFrom::Start(children))?;
        while self.reader.stream_position()? + 8 <= entry_end {
            let (child_type, child_end) = self.read_atom_header(entry_end)?;
            if child_type == AVCC || child_type == HVCC {
                let here = self.reader.stream_position()?;
                let len = child_end.checked_sub(here).ok_or_else(|| {
                    DemuxError::Malformed(format!("codec config box at {} is truncated", here))
                })?;
                let mut data = vec![0u8; len as usize];
                self.reader.read_exact(&mut data)?;
                track.codec_config = data;
            }
            self.reader.seek(SeekFrom::Start(child_end))?;
        }
        Ok(())
    }

    /// Table entry count, checked against the bytes left in the box.
    fn read_entry_count(&mut self, body_end: u64, entry_len: u64) -> DemuxResult<u32> {
        let count = self.read_u32()?;
        let left = body_end.saturating_sub(self.reader.stream_position()?);
        if u64::from(count) * entry_len > left {
            return Err(DemuxError::Malformed(format!(
                "table of {} entries does not fit in {} bytes",
                count, left
            )));
        }
        Ok(count)
    }

    fn skip_bytes(&mut self, n: i64) -> DemuxResult<()> {
        self.reader.seek(SeekFrom::Current(n))?;
        Ok(())
    }

    fn read_u8(&mut self) -> DemuxResult<u8> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> DemuxResult<u16> {
        let mut buf = [0u8; 2];
        self.reader.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_u32(&mut self) -> DemuxResult<u32> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64(&mut self) -> DemuxResult<u64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

/// Clockwise display rotation from the first row of a tkhd matrix.
fn rotation_from_matrix(a: i32, b: i32) -> Rotation {
    if a == 0 && b == 0 {
        return Rotation::None;
    }
    Rotation::from_degrees(f64::from(b).atan2(f64::from(a)).to_degrees())
}

fn fourcc_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&c| if c.is_ascii_graphic() { c as char } else { '?' })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
