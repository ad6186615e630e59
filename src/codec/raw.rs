use anyhow::{bail, Result};

use super::frame::Frame;
use super::pixel::PixelLayout;
use super::Decoder;

/// "Decoder" for uncompressed video: cuts the byte stream into frames of
/// exactly one frame size, carrying partial frames across chunks.
pub struct RawVideoDecoder {
    width: u32,
    height: u32,
    layout: PixelLayout,
    frame_size: usize,
    pending: Vec<u8>,
    next_pts: i64,
}

impl RawVideoDecoder {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Invalid video size {}x{}", width, height);
        }
        let frame_size = layout.frame_size(width, height);
        Ok(Self {
            width,
            height,
            layout,
            frame_size,
            pending: Vec::with_capacity(frame_size),
            next_pts: 0,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    fn make_frame(&mut self, data: Vec<u8>) -> Frame {
        let frame = Frame::new(data, self.width, self.height, self.layout, self.next_pts);
        self.next_pts += 1;
        frame
    }
}

impl Decoder for RawVideoDecoder {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut input = chunk;

        if !self.pending.is_empty() {
            let needed = self.frame_size - self.pending.len();
            let take = needed.min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() == self.frame_size {
                let data = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(self.make_frame(data));
            }
        }

        while input.len() >= self.frame_size {
            let data = input[..self.frame_size].to_vec();
            frames.push(self.make_frame(data));
            input = &input[self.frame_size..];
        }

        self.pending.extend_from_slice(input);
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<Frame>> {
        if !self.pending.is_empty() {
            crate::utils::logger::info(&format!(
                "raw decoder dropped {} trailing bytes (incomplete frame)",
                self.pending.len()
            ));
            self.pending.clear();
        }
        Ok(Vec::new())
    }
}
