use std::sync::Arc;
use std::time::Duration;

use crate::core::{PacketRelay, StopToken};
use crate::utils::logger;

/// Pull-style input for the decode stage: each call hands over the bytes of
/// the next filled capture buffer and recycles the buffer.
pub struct ChunkReader {
    relay: Arc<PacketRelay>,
    stop: StopToken,
    wait: Duration,
}

impl ChunkReader {
    pub fn new(relay: Arc<PacketRelay>, stop: StopToken, wait: Duration) -> Self {
        Self { relay, stop, wait }
    }

    /// Copy the next filled buffer into `dst` and return the byte count.
    ///
    /// Waits in slices of `wait`, so a cancelled token is seen promptly.
    /// Returns 0 only once the token is cancelled and nothing is left queued.
    pub fn read_chunk(&self, dst: &mut [u8]) -> usize {
        loop {
            if let Some(mut buffer) = self.relay.pop_from_sink_timeout(self.wait) {
                let filled = buffer.as_slice();
                let n = dst.len().min(filled.len());
                dst[..n].copy_from_slice(&filled[..n]);
                if n < filled.len() {
                    logger::error(&format!(
                        "buffer #{} truncated: {} of {} bytes fit the read",
                        buffer.id().index(),
                        n,
                        filled.len()
                    ));
                }
                buffer.clear();
                self.relay.push_to_source(buffer);
                return n;
            }
            if self.stop.is_cancelled() && self.relay.sink_depth() == 0 {
                return 0;
            }
        }
    }
}
