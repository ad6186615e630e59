use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the orchestrator and a worker loop.
/// Cloning hands out another reference to the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Cancels its token when dropped, including during a panic unwind.
/// Workers hold one so their peers notice when they are gone.
pub struct ExitGuard {
    token: StopToken,
}

impl ExitGuard {
    pub fn new(token: StopToken) -> Self {
        Self { token }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Lifecycle of one pipeline run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[repr(u8)]
pub enum PipelineState {
    Running = 0,
    StopRequested = 1,
    Draining = 2,
    Closed = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Running,
            1 => PipelineState::StopRequested,
            2 => PipelineState::Draining,
            _ => PipelineState::Closed,
        }
    }
}

#[derive(Debug)]
pub struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    pub fn new(initial: PipelineState) -> Self {
        Self {
            value: AtomicU8::new(initial as u8),
        }
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.value.load(Ordering::SeqCst))
    }

    /// Move to `next` if it is later than the current state.
    /// Returns true when the state actually changed.
    pub fn advance(&self, next: PipelineState) -> bool {
        let previous = self.value.fetch_max(next as u8, Ordering::SeqCst);
        previous < next as u8
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(PipelineState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_flag() {
        let token = StopToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn exit_guard_cancels_on_panic() {
        let token = StopToken::new();
        let guarded = token.clone();
        let result = std::thread::spawn(move || {
            let _guard = ExitGuard::new(guarded);
            panic!("worker died");
        })
        .join();
        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[test]
    fn state_never_moves_backwards() {
        let state = StateCell::default();
        assert_eq!(state.get(), PipelineState::Running);
        assert!(state.advance(PipelineState::Draining));
        assert!(!state.advance(PipelineState::StopRequested));
        assert_eq!(state.get(), PipelineState::Draining);
        assert!(state.advance(PipelineState::Closed));
        assert!(!state.advance(PipelineState::Closed));
    }
}
