use serde::Serialize;

use super::pixel::PixelLayout;
use super::rational::Rational;

/// Decoded or filtered video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pts: i64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout, pts: i64) -> Self {
        Self { data, width, height, layout, pts }
    }

    /// Size the data must have for this geometry
    pub fn expected_size(&self) -> usize {
        self.layout.frame_size(self.width, self.height)
    }

    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.expected_size()
    }
}

/// Compressed unit produced by an encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub keyframe: bool,
}

/// What a muxer needs to know about the stream it is writing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub codec: String,
    pub fps: Rational,
    pub time_base: Rational,
}
