use std::sync::Arc;

use anyhow::{Context, Result};

use super::events::{EventSink, PipelineEvent, Stage};
use super::reader::ChunkReader;
use super::CodecStage;
use crate::codec::{frame_pts, Decoder, EncodedPacket, Encoder, Filter, Frame, Muxer, Rational};
use crate::core::StopToken;
use crate::utils::logger;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DecodeStats {
    pub chunks: u64,
    pub frames_decoded: u64,
    pub frames_filtered: u64,
    pub frames_dropped: u64,
    pub errors: u64,
}

/// Packet relay consumer and codec relay producer: decodes captured chunks,
/// runs the filter chain and parks the results for the encoder.
pub(crate) struct DecodeWorker {
    pub reader: ChunkReader,
    pub frames: Arc<CodecStage>,
    pub decoder: Box<dyn Decoder>,
    pub filter: Box<dyn Filter>,
    /// Cancelled when the encode worker has exited
    pub encoder_gone: StopToken,
    pub events: EventSink,
    pub scratch: Vec<u8>,
}

impl DecodeWorker {
    pub fn run(mut self) -> DecodeStats {
        let mut stats = DecodeStats::default();

        loop {
            let n = self.reader.read_chunk(&mut self.scratch);
            if n == 0 {
                break;
            }
            stats.chunks += 1;
            match self.decoder.decode(&self.scratch[..n]) {
                Ok(frames) => {
                    stats.frames_decoded += frames.len() as u64;
                    for frame in frames {
                        self.filter_frame(frame, &mut stats);
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    self.events.stage_error(Stage::Decode, &e);
                }
            }
        }

        // input is exhausted: flush the decoder, then the filter
        match self.decoder.flush() {
            Ok(frames) => {
                stats.frames_decoded += frames.len() as u64;
                for frame in frames {
                    self.filter_frame(frame, &mut stats);
                }
            }
            Err(e) => {
                stats.errors += 1;
                self.events.stage_error(Stage::Decode, &e.context("decoder flush"));
            }
        }
        match self.filter.flush() {
            Ok(frames) => {
                for frame in frames {
                    stats.frames_filtered += 1;
                    self.submit(frame, &mut stats);
                }
            }
            Err(e) => {
                stats.errors += 1;
                self.events.stage_error(Stage::Filter, &e.context("filter flush"));
            }
        }

        logger::info(&format!(
            "decode worker done: {} chunks, {} frames decoded, {} filtered, {} dropped",
            stats.chunks, stats.frames_decoded, stats.frames_filtered, stats.frames_dropped
        ));
        stats
    }

    fn filter_frame(&mut self, frame: Frame, stats: &mut DecodeStats) {
        match self.filter.filter(frame) {
            Ok(frames) => {
                for frame in frames {
                    stats.frames_filtered += 1;
                    self.submit(frame, stats);
                }
            }
            Err(e) => {
                stats.errors += 1;
                self.events.stage_error(Stage::Filter, &e);
            }
        }
    }

    /// Park a frame for encoding, waiting for a free slot as long as the
    /// encoder is still around
    fn submit(&self, frame: Frame, stats: &mut DecodeStats) {
        let mut frame = frame;
        loop {
            match self.frames.submit_frame_for_encode(frame) {
                Ok(()) => return,
                Err(returned) => {
                    if self.encoder_gone.is_cancelled() {
                        stats.frames_dropped += 1;
                        logger::error(&format!(
                            "encoder exited; dropping frame pts {}",
                            returned.pts
                        ));
                        return;
                    }
                    frame = returned;
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct EncodeStats {
    pub frames_encoded: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub errors: u64,
}

/// Codec relay consumer: encodes parked frames and writes packets
pub(crate) struct EncodeWorker {
    pub frames: Arc<CodecStage>,
    /// Cancelled by the orchestrator once no more frames can arrive
    pub stop: StopToken,
    pub encoder: Box<dyn Encoder>,
    pub muxer: Box<dyn Muxer>,
    pub fps: Rational,
    pub time_base: Rational,
    pub events: EventSink,
}

impl EncodeWorker {
    pub fn run(mut self) -> Result<EncodeStats> {
        let mut stats = EncodeStats::default();

        loop {
            match self.frames.retrieve_frame_for_encode() {
                Some(frame) => self.encode(frame, &mut stats),
                None => {
                    if self.stop.is_cancelled() && self.frames.queued() == 0 {
                        break;
                    }
                }
            }
        }

        match self.encoder.flush() {
            Ok(packets) => self.write(packets, &mut stats),
            Err(e) => {
                stats.errors += 1;
                self.events.stage_error(Stage::Encode, &e.context("encoder flush"));
            }
        }
        self.muxer
            .write_trailer()
            .context("Failed to write container trailer")?;
        stats.bytes_written = self.muxer.bytes_written();

        logger::info(&format!(
            "encode worker done: {} frames, {} packets, {} bytes",
            stats.frames_encoded, stats.packets_written, stats.bytes_written
        ));
        Ok(stats)
    }

    fn encode(&mut self, mut frame: Frame, stats: &mut EncodeStats) {
        // output timestamps are the gapless index of frames reaching the encoder
        let index = stats.frames_encoded;
        frame.pts = frame_pts(index as i64, self.fps, self.time_base);

        match self.encoder.encode(&frame) {
            Ok(packets) => {
                stats.frames_encoded += 1;
                let bytes = packets.iter().map(|p| p.data.len()).sum::<usize>();
                self.write(packets, stats);
                self.events.emit(PipelineEvent::FrameEncoded {
                    index,
                    pts: frame.pts,
                    bytes,
                });
            }
            Err(e) => {
                stats.errors += 1;
                self.events
                    .stage_error(Stage::Encode, &e.context(format!("frame {}", index)));
            }
        }
    }

    fn write(&mut self, packets: Vec<EncodedPacket>, stats: &mut EncodeStats) {
        for packet in packets {
            match self.muxer.write_packet(&packet) {
                Ok(()) => stats.packets_written += 1,
                Err(e) => {
                    stats.errors += 1;
                    self.events.stage_error(Stage::Mux, &e);
                }
            }
        }
    }
}
