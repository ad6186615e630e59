use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;

use super::relay::Relay;

/// Index of a frame slot in a [`FrameArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Ownership tag of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotState {
    /// Frame taken by the encode stage, slot not yet recycled
    Empty,
    /// Recycled; the decode stage may fill it
    AwaitingDecode,
    /// Holds a frame for the encode stage
    AwaitingEncode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SlotCounts {
    pub empty: usize,
    pub awaiting_decode: usize,
    pub awaiting_encode: usize,
}

struct SlotEntry<F> {
    state: SlotState,
    frame: Option<F>,
}

/// Preallocated slots resolving a [`FrameSlot`] to the frame it carries.
/// The relay moves indices; frames stay here.
pub struct FrameArena<F> {
    entries: Mutex<Vec<SlotEntry<F>>>,
}

impl<F> FrameArena<F> {
    pub fn new(count: usize) -> Self {
        let entries = (0..count)
            .map(|_| SlotEntry {
                state: SlotState::AwaitingDecode,
                frame: None,
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SlotEntry<F>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> Vec<FrameSlot> {
        (0..self.len()).map(FrameSlot).collect()
    }

    /// Put a frame into a slot for the encode stage.
    /// Hands the frame back if the slot is unknown or already holds one.
    pub fn store(&self, slot: FrameSlot, frame: F) -> Result<(), F> {
        let mut entries = self.lock();
        match entries.get_mut(slot.0) {
            Some(entry) if entry.state != SlotState::AwaitingEncode => {
                entry.state = SlotState::AwaitingEncode;
                entry.frame = Some(frame);
                Ok(())
            }
            _ => Err(frame),
        }
    }

    /// Remove the frame from an `AwaitingEncode` slot, leaving it `Empty`
    pub fn take(&self, slot: FrameSlot) -> Option<F> {
        let mut entries = self.lock();
        let entry = entries.get_mut(slot.0)?;
        if entry.state != SlotState::AwaitingEncode {
            return None;
        }
        entry.state = SlotState::Empty;
        entry.frame.take()
    }

    /// Mark a slot ready for the decode stage again, dropping any stale frame
    pub fn recycle(&self, slot: FrameSlot) {
        if let Some(entry) = self.lock().get_mut(slot.0) {
            entry.state = SlotState::AwaitingDecode;
            entry.frame = None;
        }
    }

    pub fn state(&self, slot: FrameSlot) -> Option<SlotState> {
        self.lock().get(slot.0).map(|entry| entry.state)
    }

    pub fn counts(&self) -> SlotCounts {
        let mut counts = SlotCounts::default();
        for entry in self.lock().iter() {
            match entry.state {
                SlotState::Empty => counts.empty += 1,
                SlotState::AwaitingDecode => counts.awaiting_decode += 1,
                SlotState::AwaitingEncode => counts.awaiting_encode += 1,
            }
        }
        counts
    }

    /// Take every frame still parked in the arena
    pub fn drain_frames(&self) -> Vec<F> {
        let mut entries = self.lock();
        entries
            .iter_mut()
            .filter_map(|entry| {
                entry.state = SlotState::AwaitingDecode;
                entry.frame.take()
            })
            .collect()
    }
}

/// Relay of frame slots between the filter stage and the encode stage
pub type CodecRelay = Relay<FrameSlot>;

/// Frame hand-off from the filter stage to the encode stage.
///
/// Both directions wait at most `wait`: frame production can stall (a decoder
/// waiting for more input) and the encode side must stay able to notice
/// shutdown instead of hanging in `pop`.
pub struct FramePool<F> {
    arena: FrameArena<F>,
    relay: CodecRelay,
    wait: Duration,
}

impl<F> FramePool<F> {
    pub fn new(count: usize, wait: Duration) -> Self {
        let arena = FrameArena::new(count);
        let relay = Relay::from_payloads(arena.slots());
        Self { arena, relay, wait }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn arena(&self) -> &FrameArena<F> {
        &self.arena
    }

    pub fn relay(&self) -> &CodecRelay {
        &self.relay
    }

    /// Filter stage: park a frame for encoding.
    /// Returns the frame if no recycled slot turned up within the wait.
    pub fn submit_frame_for_encode(&self, frame: F) -> Result<(), F> {
        let Some(slot) = self.relay.pop_from_source_timeout(self.wait) else {
            return Err(frame);
        };
        match self.arena.store(slot, frame) {
            Ok(()) => {
                self.relay.push_to_sink(slot);
                Ok(())
            }
            Err(frame) => {
                crate::utils::logger::error(&format!(
                    "frame slot #{} was still holding a frame; recycling it",
                    slot.index()
                ));
                self.arena.recycle(slot);
                self.relay.push_to_source(slot);
                Err(frame)
            }
        }
    }

    /// Encode stage: take the oldest parked frame and recycle its slot.
    /// None means nothing arrived within the wait.
    pub fn retrieve_frame_for_encode(&self) -> Option<F> {
        let Some(slot) = self.relay.pop_from_sink_timeout(self.wait) else {
            crate::utils::logger::debug(&format!(
                "no frame for encode within {}ms",
                self.wait.as_millis()
            ));
            return None;
        };
        let frame = self.arena.take(slot);
        self.arena.recycle(slot);
        self.relay.push_to_source(slot);
        frame
    }

    /// Frames parked and waiting for the encode stage
    pub fn queued(&self) -> usize {
        self.relay.sink_depth()
    }

    /// Slots ready for the filter stage
    pub fn available(&self) -> usize {
        self.relay.source_depth()
    }

    /// Drain both queues and return any frames never encoded
    pub fn release(&self) -> Vec<F> {
        let slots = self.relay.release();
        let frames = self.arena.drain_frames();
        if slots.len() != self.relay.total() {
            crate::utils::logger::error(&format!(
                "frame pool released {} of {} slots",
                slots.len(),
                self.relay.total()
            ));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn arena_tracks_slot_states() {
        let arena = FrameArena::new(3);
        let slot = arena.slots()[1];
        assert_eq!(arena.state(slot), Some(SlotState::AwaitingDecode));

        arena.store(slot, "frame").unwrap();
        assert_eq!(arena.state(slot), Some(SlotState::AwaitingEncode));
        assert_eq!(arena.store(slot, "again"), Err("again"));

        assert_eq!(arena.take(slot), Some("frame"));
        assert_eq!(arena.state(slot), Some(SlotState::Empty));
        assert_eq!(arena.take(slot), None);

        arena.recycle(slot);
        assert_eq!(
            arena.counts(),
            SlotCounts { empty: 0, awaiting_decode: 3, awaiting_encode: 0 }
        );
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let arena: FrameArena<u32> = FrameArena::new(1);
        assert_eq!(arena.store(FrameSlot(5), 1), Err(1));
        assert_eq!(arena.state(FrameSlot(5)), None);
    }

    #[test]
    fn frames_come_out_in_submit_order() {
        let pool = FramePool::new(4, Duration::from_millis(20));
        for i in 0..4 {
            pool.submit_frame_for_encode(i).unwrap();
        }
        assert_eq!(pool.queued(), 4);
        assert_eq!(pool.available(), 0);
        // Every slot is taken, so a fifth frame bounces back
        assert_eq!(pool.submit_frame_for_encode(99), Err(99));

        for i in 0..4 {
            assert_eq!(pool.retrieve_frame_for_encode(), Some(i));
        }
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn retrieve_times_out_without_frames() {
        let pool: FramePool<Vec<u8>> = FramePool::new(2, Duration::from_millis(40));
        let start = Instant::now();
        assert!(pool.retrieve_frame_for_encode().is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(40), "returned early: {:?}", waited);
        assert!(waited < Duration::from_millis(400), "blocked too long: {:?}", waited);
    }

    #[test]
    fn cross_thread_frames_arrive_intact() {
        let pool = Arc::new(FramePool::new(3, Duration::from_millis(50)));
        let producer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..50u32 {
                    let mut frame = vec![i as u8; 64];
                    loop {
                        match pool.submit_frame_for_encode(frame) {
                            Ok(()) => break,
                            Err(back) => frame = back,
                        }
                    }
                }
            })
        };

        let mut received = 0u32;
        while received < 50 {
            if let Some(frame) = pool.retrieve_frame_for_encode() {
                assert!(frame.iter().all(|b| *b == received as u8));
                received += 1;
            }
        }
        producer.join().unwrap();

        assert!(pool.release().is_empty());
        assert_eq!(pool.arena().counts().awaiting_decode, 3);
    }

    #[test]
    fn release_returns_unencoded_frames() {
        let pool = FramePool::new(2, Duration::from_millis(10));
        pool.submit_frame_for_encode('x').unwrap();
        assert_eq!(pool.release(), vec!['x']);
        assert_eq!(pool.queued(), 0);
    }
}
