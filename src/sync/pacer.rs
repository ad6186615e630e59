use std::time::{Duration, Instant};

use serde::Serialize;

use crate::codec::Rational;

/// Frame pacing for sources that should behave like a live device.
///
/// Sleeps until the next frame deadline. When the caller falls more than
/// a few frames behind, the schedule is reset to "now" instead of bursting
/// to catch up.
pub struct Pacer {
    target_fps: f64,
    frame_duration: Duration,
    next_frame_time: Instant,
    frames_paced: u64,
    resyncs: u64,
}

const RESYNC_AFTER_FRAMES: u32 = 3;

impl Pacer {
    pub fn new(fps: Rational) -> Self {
        let frame_duration = Duration::from_secs_f64(fps.den as f64 / fps.num.max(1) as f64);
        Self {
            target_fps: fps.as_f64(),
            frame_duration,
            next_frame_time: Instant::now(),
            frames_paced: 0,
            resyncs: 0,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Block until the next frame is due
    pub fn wait_for_next_frame(&mut self) {
        let now = Instant::now();

        if now > self.next_frame_time + self.frame_duration * RESYNC_AFTER_FRAMES {
            self.next_frame_time = now + self.frame_duration;
            self.frames_paced += 1;
            self.resyncs += 1;
            return;
        }

        if now < self.next_frame_time {
            std::thread::sleep(self.next_frame_time - now);
        }

        self.next_frame_time += self.frame_duration;
        self.frames_paced += 1;
    }

    pub fn stats(&self) -> PacerStats {
        PacerStats {
            frames_paced: self.frames_paced,
            resyncs: self.resyncs,
            target_fps: self.target_fps,
        }
    }

    pub fn reset(&mut self) {
        self.next_frame_time = Instant::now();
        self.frames_paced = 0;
        self.resyncs = 0;
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PacerStats {
    pub frames_paced: u64,
    pub resyncs: u64,
    pub target_fps: f64,
}
