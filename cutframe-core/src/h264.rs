//! H.264 software decoding through OpenH264.
//!
//! MP4 stores NAL units length-prefixed with SPS/PPS kept aside in the avcC
//! record; OpenH264 wants Annex B. This module bridges the two and converts
//! the decoded I420 picture to RGBA.

use image::RgbaImage;
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use thiserror::Error;
use tracing::warn;

use crate::pixel::{ColorSpace, I420Planes, YuvToRgba};

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Error)]
pub enum H264Error {
    #[error("OpenH264 init failed: {0}")]
    Init(String),
    #[error("OpenH264 decode error: {0}")]
    Decode(String),
    #[error("Decoded picture has inconsistent planes ({0}x{1})")]
    BadPicture(usize, usize),
}

pub struct H264Decoder {
    decoder: Decoder,
    /// SPS + PPS from avcC, already in Annex B
    parameter_sets: Vec<u8>,
    nal_length_size: usize,
    color_space: ColorSpace,
    converter: YuvToRgba,
}

impl H264Decoder {
    /// `avcc` is the AVCDecoderConfigurationRecord; empty for Annex B input.
    pub fn new(avcc: &[u8]) -> Result<Self, H264Error> {
        let (parameter_sets, nal_length_size) = parse_avcc(avcc);
        let mut decoder = Self {
            decoder: Decoder::new().map_err(|e| H264Error::Init(format!("{:?}", e)))?,
            parameter_sets,
            nal_length_size,
            color_space: ColorSpace::default(),
            converter: YuvToRgba::new(ColorSpace::default()),
        };
        decoder.prime();
        Ok(decoder)
    }

    fn prime(&mut self) {
        if !self.parameter_sets.is_empty() {
            // Headers alone never produce a picture
            if let Err(e) = self.decoder.decode(&self.parameter_sets) {
                warn!("OpenH264 rejected the avcC parameter sets: {:?}", e);
            }
        }
    }

    /// Decode one access unit. `Ok(None)` while the decoder needs more data.
    pub fn decode(&mut self, data: &[u8]) -> Result<Option<RgbaImage>, H264Error> {
        let annexb = to_annexb(data, self.nal_length_size);

        let yuv = match self.decoder.decode(&annexb) {
            Ok(Some(yuv)) => yuv,
            Ok(None) => return Ok(None),
            Err(e) => return Err(H264Error::Decode(format!("{:?}", e))),
        };
        to_rgba(&mut self.converter, &mut self.color_space, &yuv).map(Some)
    }

    /// Pictures the decoder still holds for reordering, once input has ended.
    pub fn flush(&mut self) -> Result<Vec<RgbaImage>, H264Error> {
        let remaining = self
            .decoder
            .flush_remaining()
            .map_err(|e| H264Error::Decode(format!("{:?}", e)))?;
        remaining
            .iter()
            .map(|yuv| to_rgba(&mut self.converter, &mut self.color_space, yuv))
            .collect()
    }

    /// Drop reference pictures (after a seek) and re-feed the parameter sets.
    pub fn reset(&mut self) -> Result<(), H264Error> {
        self.decoder = Decoder::new().map_err(|e| H264Error::Init(format!("{:?}", e)))?;
        self.prime();
        Ok(())
    }
}

fn to_rgba(
    converter: &mut YuvToRgba,
    color_space: &mut ColorSpace,
    yuv: &impl YUVSource,
) -> Result<RgbaImage, H264Error> {
    let (width, height) = yuv.dimensions();
    let (y_stride, uv_stride, _) = yuv.strides();
    let planes = I420Planes {
        width,
        height,
        y: yuv.y(),
        u: yuv.u(),
        v: yuv.v(),
        y_stride,
        uv_stride,
    };

    let wanted = ColorSpace::for_height(height);
    if wanted != *color_space {
        *converter = YuvToRgba::new(wanted);
        *color_space = wanted;
    }
    converter
        .convert(&planes)
        .ok_or(H264Error::BadPicture(width, height))
}

/// Extract SPS/PPS (as Annex B) and the NAL length size from an avcC record.
fn parse_avcc(data: &[u8]) -> (Vec<u8>, usize) {
    let mut annexb = Vec::new();
    if data.len() < 7 || data[0] != 1 {
        return (annexb, 4);
    }
    let nal_length_size = usize::from(data[4] & 0x03) + 1;

    let mut offset = 5;
    let mut copy_sets = |count: usize, offset: &mut usize| {
        for _ in 0..count {
            if *offset + 2 > data.len() {
                return;
            }
            let len = usize::from(u16::from_be_bytes([data[*offset], data[*offset + 1]]));
            *offset += 2;
            if *offset + len > data.len() {
                *offset = data.len();
                return;
            }
            annexb.extend_from_slice(&START_CODE);
            annexb.extend_from_slice(&data[*offset..*offset + len]);
            *offset += len;
        }
    };

    let num_sps = usize::from(data[offset] & 0x1F);
    offset += 1;
    copy_sets(num_sps, &mut offset);
    if offset < data.len() {
        let num_pps = usize::from(data[offset]);
        offset += 1;
        copy_sets(num_pps, &mut offset);
    }

    (annexb, nal_length_size)
}

/// Convert length-prefixed NAL units to Annex B. Input that already carries
/// start codes is passed through.
fn to_annexb(data: &[u8], nal_length_size: usize) -> Vec<u8> {
    if data.starts_with(&START_CODE) || data.starts_with(&START_CODE[1..]) {
        return data.to_vec();
    }

    let mut annexb = Vec::with_capacity(data.len() + 16);
    let mut offset = 0;
    while offset + nal_length_size <= data.len() {
        let len = data[offset..offset + nal_length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        offset += nal_length_size;
        if len == 0 || offset + len > data.len() {
            break;
        }
        annexb.extend_from_slice(&START_CODE);
        annexb.extend_from_slice(&data[offset..offset + len]);
        offset += len;
    }

    if annexb.is_empty() {
        data.to_vec()
    } else {
        annexb
    }
}
