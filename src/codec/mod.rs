//! Codec stages plugged into the transcoding pipeline.
//!
//! Each stage is a trait object owned by exactly one pipeline thread, so the
//! traits only require `Send`.

pub mod container;
pub mod encoder;
pub mod filter;
pub mod frame;
pub mod pixel;
pub mod rational;
pub mod raw;

use anyhow::Result;

pub use container::{open_muxer, read_container, Container, ContainerHeader, FileMuxer, NullMuxer};
pub use encoder::{decode_lz4_packet, EncoderKind, Lz4Encoder, RawEncoder};
pub use filter::FilterChain;
pub use frame::{EncodedPacket, Frame, StreamInfo};
pub use pixel::{PixelLayout, Plane};
pub use rational::{frame_pts, Rational};
pub use raw::RawVideoDecoder;

/// Turns raw input chunks into frames
pub trait Decoder: Send {
    fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Frame>>;

    /// Emit whatever is still buffered at end of input
    fn flush(&mut self) -> Result<Vec<Frame>>;
}

pub trait Filter: Send {
    fn filter(&mut self, frame: Frame) -> Result<Vec<Frame>>;

    fn flush(&mut self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }
}

pub trait Encoder: Send {
    fn name(&self) -> &'static str;

    fn encode(&mut self, frame: &Frame) -> Result<Vec<EncodedPacket>>;

    /// Drain delayed packets; called once after the last frame
    fn flush(&mut self) -> Result<Vec<EncodedPacket>>;
}

/// Writes encoded packets to the output target
pub trait Muxer: Send {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()>;

    fn write_packet(&mut self, packet: &EncodedPacket) -> Result<()>;

    /// Finish the output; calling it twice is harmless
    fn write_trailer(&mut self) -> Result<()>;

    fn bytes_written(&self) -> u64;
}
