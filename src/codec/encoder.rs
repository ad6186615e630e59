use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::frame::{EncodedPacket, Frame};
use super::Encoder;

/// Encoders shipped with the crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    Lz4,
    Raw,
}

impl EncoderKind {
    pub fn name(self) -> &'static str {
        match self {
            EncoderKind::Lz4 => "lz4",
            EncoderKind::Raw => "raw",
        }
    }

    pub fn build(self) -> Box<dyn Encoder> {
        match self {
            EncoderKind::Lz4 => Box::new(Lz4Encoder::new()),
            EncoderKind::Raw => Box::new(RawEncoder),
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncoderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lz4" => Ok(EncoderKind::Lz4),
            "raw" | "rawvideo" => Ok(EncoderKind::Raw),
            other => anyhow::bail!("Unknown encoder '{}' (known: lz4, raw)", other),
        }
    }
}

/// Intra-only encoder: every frame is one size-prefixed LZ4 block
pub struct Lz4Encoder {
    frames: u64,
}

impl Lz4Encoder {
    pub fn new() -> Self {
        Self { frames: 0 }
    }
}

impl Default for Lz4Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for Lz4Encoder {
    fn name(&self) -> &'static str {
        EncoderKind::Lz4.name()
    }

    fn encode(&mut self, frame: &Frame) -> Result<Vec<EncodedPacket>> {
        let data = lz4::block::compress(&frame.data, None, true)
            .with_context(|| format!("LZ4 compression failed for frame {}", self.frames))?;
        self.frames += 1;
        Ok(vec![EncodedPacket {
            data,
            pts: frame.pts,
            dts: frame.pts,
            keyframe: true,
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}

/// Copies frame bytes straight into packets
pub struct RawEncoder;

impl Encoder for RawEncoder {
    fn name(&self) -> &'static str {
        EncoderKind::Raw.name()
    }

    fn encode(&mut self, frame: &Frame) -> Result<Vec<EncodedPacket>> {
        Ok(vec![EncodedPacket {
            data: frame.data.clone(),
            pts: frame.pts,
            dts: frame.pts,
            keyframe: true,
        }])
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}

/// Undo [`Lz4Encoder`] for one packet
pub fn decode_lz4_packet(packet: &EncodedPacket) -> Result<Vec<u8>> {
    lz4::block::decompress(&packet.data, None).context("Failed to decompress LZ4 packet")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PixelLayout;

    #[test]
    fn lz4_packets_decompress_to_frame() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i / 64) as u8).collect();
        let frame = Frame::new(data.clone(), 64, 64, PixelLayout::Gray, 42);

        let mut encoder = Lz4Encoder::new();
        let packets = encoder.encode(&frame).unwrap();
        assert_eq!(packets.len(), 1);
        assert!(packets[0].keyframe);
        assert_eq!(packets[0].pts, 42);
        assert!(packets[0].data.len() < data.len());
        assert_eq!(decode_lz4_packet(&packets[0]).unwrap(), data);
        assert!(encoder.flush().unwrap().is_empty());
    }

    #[test]
    fn encoder_kind_parses() {
        assert_eq!("LZ4".parse::<EncoderKind>().unwrap(), EncoderKind::Lz4);
        assert_eq!("rawvideo".parse::<EncoderKind>().unwrap(), EncoderKind::Raw);
        assert!("h264".parse::<EncoderKind>().is_err());
        assert_eq!(EncoderKind::Raw.build().name(), "raw");
    }
}
