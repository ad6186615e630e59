//! The three-thread transcoding pipeline and the pieces it is wired from.

pub mod events;
pub mod reader;
pub mod transcoder;
mod workers;

use crate::codec::Frame;
use crate::core::FramePool;

pub use events::{event_channel, EventSink, PipelineEvent, Stage};
pub use reader::ChunkReader;
pub use transcoder::{Collaborators, StopCause, TranscodeReport, Transcoder};

/// Frame hand-off between the filter stage and the encode stage
pub type CodecStage = FramePool<Frame>;
