pub mod buffer_pool;
pub mod frame_pool;
pub mod queue;
pub mod relay;
pub mod stop;

pub use buffer_pool::{Buffer, BufferId, BufferPool};
pub use frame_pool::{CodecRelay, FrameArena, FramePool, FrameSlot, SlotCounts, SlotState};
pub use queue::BlockingQueue;
pub use relay::{PacketRelay, Relay, RelayStats};
pub use stop::{ExitGuard, PipelineState, StateCell, StopToken};
