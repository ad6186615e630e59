use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;

use crate::core::PipelineState;
use crate::utils::logger;

/// Pipeline stage an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Capture,
    Decode,
    Filter,
    Encode,
    Mux,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Capture => "capture",
            Stage::Decode => "decode",
            Stage::Filter => "filter",
            Stage::Encode => "encode",
            Stage::Mux => "mux",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    FrameEncoded { index: u64, pts: i64, bytes: usize },
    StageError { stage: Stage, message: String },
}

/// Sending half of the event stream. Never blocks: when the observer falls
/// behind, new events are dropped.
#[derive(Clone)]
pub struct EventSink {
    sender: Sender<PipelineEvent>,
}

impl EventSink {
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.try_send(event);
    }

    /// Log a recoverable stage error and report it to observers
    pub fn stage_error(&self, stage: Stage, err: &anyhow::Error) {
        let message = format!("{:#}", err);
        logger::error(&format!("{} error: {}", stage, message));
        self.emit(PipelineEvent::StageError { stage, message });
    }
}

pub fn event_channel(capacity: usize) -> (EventSink, Receiver<PipelineEvent>) {
    let (sender, receiver) = bounded(capacity);
    (EventSink { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, events) = event_channel(2);
        for _ in 0..5 {
            sink.emit(PipelineEvent::StateChanged(PipelineState::Running));
        }
        sink.stage_error(Stage::Mux, &anyhow::anyhow!("disk full"));
        assert_eq!(events.try_iter().count(), 2);
    }

    #[test]
    fn stage_errors_carry_context_chain() {
        let (sink, events) = event_channel(4);
        let err = anyhow::anyhow!("short read").context("frame 3");
        sink.stage_error(Stage::Capture, &err);
        match events.try_recv().unwrap() {
            PipelineEvent::StageError { stage, message } => {
                assert_eq!(stage, Stage::Capture);
                assert_eq!(message, "frame 3: short read");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
