use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pixel layouts understood by the raw video path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Gray,
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Yuv420p,
    Nv12,
    Yuyv422,
}

/// One plane of a frame: where it starts and how its samples are shaped.
/// `width` counts sample groups of `bytes_per_pixel` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
}

impl Plane {
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    pub fn size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }
}

impl PixelLayout {
    pub const ALL: &'static [PixelLayout] = &[
        PixelLayout::Gray,
        PixelLayout::Rgb24,
        PixelLayout::Bgr24,
        PixelLayout::Rgba,
        PixelLayout::Bgra,
        PixelLayout::Yuv420p,
        PixelLayout::Nv12,
        PixelLayout::Yuyv422,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelLayout::Gray => "gray",
            PixelLayout::Rgb24 => "rgb24",
            PixelLayout::Bgr24 => "bgr24",
            PixelLayout::Rgba => "rgba",
            PixelLayout::Bgra => "bgra",
            PixelLayout::Yuv420p => "yuv420p",
            PixelLayout::Nv12 => "nv12",
            PixelLayout::Yuyv422 => "yuyv422",
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelLayout::Rgba | PixelLayout::Bgra)
    }

    pub fn planes(self, width: u32, height: u32) -> Vec<Plane> {
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);
        let packed = |bytes_per_pixel| {
            vec![Plane {
                offset: 0,
                width,
                height,
                bytes_per_pixel,
            }]
        };

        match self {
            PixelLayout::Gray => packed(1),
            PixelLayout::Rgb24 | PixelLayout::Bgr24 => packed(3),
            PixelLayout::Rgba | PixelLayout::Bgra => packed(4),
            PixelLayout::Yuyv422 => vec![Plane {
                offset: 0,
                width: chroma_w,
                height,
                bytes_per_pixel: 4,
            }],
            PixelLayout::Yuv420p => {
                let luma = Plane {
                    offset: 0,
                    width,
                    height,
                    bytes_per_pixel: 1,
                };
                let cb = Plane {
                    offset: luma.size(),
                    width: chroma_w,
                    height: chroma_h,
                    bytes_per_pixel: 1,
                };
                let cr = Plane {
                    offset: cb.offset + cb.size(),
                    ..cb
                };
                vec![luma, cb, cr]
            }
            PixelLayout::Nv12 => {
                let luma = Plane {
                    offset: 0,
                    width,
                    height,
                    bytes_per_pixel: 1,
                };
                let chroma = Plane {
                    offset: luma.size(),
                    width: chroma_w,
                    height: chroma_h,
                    bytes_per_pixel: 2,
                };
                vec![luma, chroma]
            }
        }
    }

    /// Bytes in one frame of `width` x `height`
    pub fn frame_size(self, width: u32, height: u32) -> usize {
        self.planes(width, height).iter().map(Plane::size).sum()
    }
}

impl fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelLayout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let alias = match wanted.as_str() {
            "grey" | "gray8" => "gray",
            "rgb" => "rgb24",
            "bgr" => "bgr24",
            "i420" => "yuv420p",
            "yuy2" => "yuyv422",
            other => other,
        };
        PixelLayout::ALL
            .iter()
            .copied()
            .find(|layout| layout.name() == alias)
            .ok_or_else(|| {
                let known: Vec<&str> = PixelLayout::ALL.iter().map(|l| l.name()).collect();
                anyhow::anyhow!("Unknown pixel format '{}' (known: {})", s, known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes_match_common_formats() {
        assert_eq!(PixelLayout::Yuv420p.frame_size(640, 480), 460_800);
        assert_eq!(PixelLayout::Bgr24.frame_size(640, 480), 921_600);
        assert_eq!(PixelLayout::Nv12.frame_size(640, 480), 460_800);
        assert_eq!(PixelLayout::Yuyv422.frame_size(640, 480), 614_400);
        assert_eq!(PixelLayout::Gray.frame_size(3, 3), 9);
        // Odd sizes round chroma up
        assert_eq!(PixelLayout::Yuv420p.frame_size(3, 3), 9 + 4 + 4);
    }

    #[test]
    fn yuv420p_planes_are_contiguous() {
        let planes = PixelLayout::Yuv420p.planes(4, 2);
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[1].offset, 8);
        assert_eq!(planes[2].offset, 10);
        assert_eq!((planes[2].width, planes[2].height), (2, 1));
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!("yuv420p".parse::<PixelLayout>().unwrap(), PixelLayout::Yuv420p);
        assert_eq!("BGR".parse::<PixelLayout>().unwrap(), PixelLayout::Bgr24);
        assert_eq!("i420".parse::<PixelLayout>().unwrap(), PixelLayout::Yuv420p);
        let err = "p010".parse::<PixelLayout>().unwrap_err();
        assert!(err.to_string().contains("p010"));
    }
}
