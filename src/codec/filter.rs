use anyhow::{anyhow, bail, Context, Result};
use fast_image_resize as fr;
use fr::images::Image;
use rayon::prelude::*;

use super::frame::Frame;
use super::pixel::{PixelLayout, Plane};
use super::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Null,
    Negate,
    Vflip,
    Scale { width: u32, height: u32 },
}

/// Linear chain of simple video filters parsed from a description such as
/// `"scale=320x240,negate"`.
pub struct FilterChain {
    ops: Vec<FilterOp>,
    layout: PixelLayout,
    input: (u32, u32),
    output: (u32, u32),
    resizer: fr::Resizer,
}

impl FilterChain {
    pub fn parse(description: &str, width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let mut ops = Vec::new();
        let mut geometry = (width, height);

        for item in description.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, args) = match item.split_once('=') {
                Some((name, args)) => (name.trim(), Some(args.trim())),
                None => (item, None),
            };
            let op = match (name, args) {
                ("null" | "copy", None) => FilterOp::Null,
                ("negate", None) => FilterOp::Negate,
                ("vflip", None) => FilterOp::Vflip,
                ("scale", Some(args)) => {
                    let (w, h) = parse_size(args)
                        .with_context(|| format!("Invalid scale arguments '{}'", args))?;
                    geometry = (w, h);
                    FilterOp::Scale { width: w, height: h }
                }
                ("scale", None) => bail!("Filter 'scale' needs a size, e.g. scale=320x240"),
                (_, Some(_)) => bail!("Filter '{}' does not take arguments or is unknown", name),
                _ => bail!("Unknown filter '{}'", name),
            };
            ops.push(op);
        }

        if ops.is_empty() {
            ops.push(FilterOp::Null);
        }

        Ok(Self {
            ops,
            layout,
            input: (width, height),
            output: geometry,
            resizer: fr::Resizer::new(),
        })
    }

    /// Frame size after every filter has run
    pub fn output_geometry(&self) -> (u32, u32) {
        self.output
    }

    pub fn is_passthrough(&self) -> bool {
        self.ops.iter().all(|op| *op == FilterOp::Null)
    }

    fn apply(&mut self, op: FilterOp, frame: &mut Frame) -> Result<()> {
        match op {
            FilterOp::Null => Ok(()),
            FilterOp::Negate => {
                negate(&mut frame.data, frame.layout);
                Ok(())
            }
            FilterOp::Vflip => {
                for plane in frame.layout.planes(frame.width, frame.height) {
                    flip_plane(&mut frame.data, &plane);
                }
                Ok(())
            }
            FilterOp::Scale { width, height } => {
                if (frame.width, frame.height) == (width, height) {
                    return Ok(());
                }
                frame.data = scale(&mut self.resizer, frame, width, height)?;
                frame.width = width;
                frame.height = height;
                Ok(())
            }
        }
    }
}

impl Filter for FilterChain {
    fn filter(&mut self, mut frame: Frame) -> Result<Vec<Frame>> {
        if (frame.width, frame.height) != self.input || frame.layout != self.layout {
            bail!(
                "Filter input mismatch: got {}x{} {}, expected {}x{} {}",
                frame.width,
                frame.height,
                frame.layout,
                self.input.0,
                self.input.1,
                self.layout
            );
        }
        if !frame.is_well_formed() {
            bail!(
                "Frame has {} bytes, expected {}",
                frame.data.len(),
                frame.expected_size()
            );
        }

        let ops = self.ops.clone();
        for op in ops {
            self.apply(op, &mut frame)?;
        }
        Ok(vec![frame])
    }
}

fn parse_size(args: &str) -> Result<(u32, u32)> {
    let (w, h) = args
        .split_once(|c| c == 'x' || c == ':')
        .ok_or_else(|| anyhow!("expected WxH"))?;
    let w: u32 = w.trim().parse()?;
    let h: u32 = h.trim().parse()?;
    if w == 0 || h == 0 {
        bail!("size must be non-zero");
    }
    Ok((w, h))
}

/// Invert every colour component; alpha is left alone
fn negate(data: &mut [u8], layout: PixelLayout) {
    if layout.has_alpha() {
        data.par_chunks_mut(4).for_each(|px| {
            for c in px.iter_mut().take(3) {
                *c = 255 - *c;
            }
        });
    } else {
        data.par_iter_mut().for_each(|c| *c = 255 - *c);
    }
}

fn flip_plane(data: &mut [u8], plane: &Plane) {
    let row = plane.row_bytes();
    let rows = plane.height as usize;
    let region = &mut data[plane.offset..plane.offset + plane.size()];
    for i in 0..rows / 2 {
        let (top, bottom) = region.split_at_mut((rows - 1 - i) * row);
        top[i * row..(i + 1) * row].swap_with_slice(&mut bottom[..row]);
    }
}

fn pixel_type(bytes_per_pixel: usize) -> Result<fr::PixelType> {
    Ok(match bytes_per_pixel {
        1 => fr::PixelType::U8,
        2 => fr::PixelType::U8x2,
        3 => fr::PixelType::U8x3,
        4 => fr::PixelType::U8x4,
        other => bail!("No resize support for {}-byte pixels", other),
    })
}

/// Resize plane by plane so planar layouts keep their chroma subsampling
fn scale(resizer: &mut fr::Resizer, frame: &Frame, width: u32, height: u32) -> Result<Vec<u8>> {
    let src_planes = frame.layout.planes(frame.width, frame.height);
    let dst_planes = frame.layout.planes(width, height);
    let mut out = Vec::with_capacity(frame.layout.frame_size(width, height));

    for (src, dst) in src_planes.iter().zip(dst_planes.iter()) {
        let pt = pixel_type(src.bytes_per_pixel)?;
        let bytes = frame.data[src.offset..src.offset + src.size()].to_vec();
        let src_image = Image::from_vec_u8(src.width, src.height, bytes, pt)?;
        let mut dst_image = Image::new(dst.width, dst.height, pt);
        resizer.resize(&src_image, &mut dst_image, None)?;
        out.extend_from_slice(dst_image.buffer());
    }

    Ok(out)
}
