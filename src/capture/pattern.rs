use anyhow::{bail, Result};

use super::CaptureSource;
use crate::codec::{PixelLayout, Plane};
use crate::sync::Pacer;

/// Synthetic camera: every chunk is one complete frame of a moving test
/// pattern.
///
/// yuv420p and nv12 get a diagonal gradient drifting each frame. Every other
/// layout is filled with three cycling component values, one per channel.
pub struct PatternSource {
    width: u32,
    height: u32,
    layout: PixelLayout,
    frame_size: usize,
    index: u64,
    limit: Option<u64>,
    levels: [u8; 3],
    pacer: Option<Pacer>,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("Invalid pattern size {}x{}", width, height);
        }
        Ok(Self {
            width,
            height,
            layout,
            frame_size: layout.frame_size(width, height),
            index: 0,
            limit: None,
            levels: [0, 0, 255],
            pacer: None,
        })
    }

    /// Stop after `frames` frames
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Deliver frames no faster than the pacer allows
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frames_generated(&self) -> u64 {
        self.index
    }

    fn paint(&mut self, frame: &mut [u8]) {
        let planes = self.layout.planes(self.width, self.height);
        let i = self.index as usize;
        match self.layout {
            PixelLayout::Yuv420p => {
                gradient(frame, &planes[0], |x, y| x + y + i * 3);
                gradient(frame, &planes[1], |_, y| 128 + y + i * 2);
                gradient(frame, &planes[2], |x, _| 64 + x + i * 5);
            }
            PixelLayout::Nv12 => {
                gradient(frame, &planes[0], |x, y| x + y + i * 3);
                let uv = &planes[1];
                for y in 0..uv.height as usize {
                    let row = uv.offset + y * uv.row_bytes();
                    for x in 0..uv.width as usize {
                        frame[row + x * 2] = (128 + y + i * 2) as u8;
                        frame[row + x * 2 + 1] = (64 + x + i * 5) as u8;
                    }
                }
            }
            layout => {
                let alpha = layout.has_alpha();
                for plane in &planes {
                    let region = &mut frame[plane.offset..plane.offset + plane.size()];
                    for pixel in region.chunks_exact_mut(plane.bytes_per_pixel) {
                        for (c, byte) in pixel.iter_mut().enumerate() {
                            *byte = if alpha && c == 3 { 255 } else { self.levels[c % 3] };
                        }
                    }
                }
                self.step_levels();
            }
        }
    }

    fn step_levels(&mut self) {
        let [a, b, c] = &mut self.levels;
        *a = if *a == 254 { 0 } else { *a + 1 };
        *b = if *b == 254 { 0 } else { *b + 1 };
        *c = if *c == 1 { 255 } else { *c - 1 };
    }
}

fn gradient(frame: &mut [u8], plane: &Plane, value: impl Fn(usize, usize) -> usize) {
    for y in 0..plane.height as usize {
        let row = plane.offset + y * plane.row_bytes();
        for x in 0..plane.width as usize {
            frame[row + x] = value(x, y) as u8;
        }
    }
}

impl CaptureSource for PatternSource {
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<usize> {
        if self.limit.is_some_and(|limit| self.index >= limit) {
            return Ok(0);
        }
        if dst.len() < self.frame_size {
            bail!(
                "Buffer of {} bytes cannot hold a {} byte frame",
                dst.len(),
                self.frame_size
            );
        }
        if let Some(pacer) = self.pacer.as_mut() {
            pacer.wait_for_next_frame();
        }

        let size = self.frame_size;
        self.paint(&mut dst[..size]);
        self.index += 1;
        Ok(size)
    }

    fn describe(&self) -> String {
        format!("pattern {}x{} {}", self.width, self.height, self.layout)
    }
}
