use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::Receiver;
use serde::Serialize;

use super::events::{event_channel, EventSink, PipelineEvent, Stage};
use super::reader::ChunkReader;
use super::workers::{DecodeStats, DecodeWorker, EncodeStats, EncodeWorker};
use super::CodecStage;
use crate::capture::CaptureSource;
use crate::codec::{open_muxer, Decoder, Encoder, Filter, FilterChain, Muxer, RawVideoDecoder, StreamInfo};
use crate::config::PipelineConfig;
use crate::core::{ExitGuard, PacketRelay, PipelineState, StateCell, StopToken};
use crate::shared::constants;
use crate::utils::logger;
use crate::utils::time_utils::Timer;

/// The codec stages a transcoder drives, plus what the output stream looks like
pub struct Collaborators {
    pub decoder: Box<dyn Decoder>,
    pub filter: Box<dyn Filter>,
    pub encoder: Box<dyn Encoder>,
    pub muxer: Box<dyn Muxer>,
    pub stream: StreamInfo,
}

impl Collaborators {
    /// Built-in stages for `config`: raw video in, filter chain, encoder,
    /// container file (or nothing for "-") out
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (width, height, layout) = (config.width, config.height, config.pixel_format);

        let decoder = RawVideoDecoder::new(width, height, layout)?;
        let filter = FilterChain::parse(&config.filter, width, height, layout)
            .with_context(|| format!("Invalid filter description '{}'", config.filter))?;
        let (out_width, out_height) = filter.output_geometry();
        let encoder = config.encoder.build();
        let muxer = open_muxer(&config.output)?;

        let stream = StreamInfo {
            width: out_width,
            height: out_height,
            layout,
            codec: encoder.name().to_string(),
            fps: config.fps,
            time_base: config.time_base(),
        };

        Ok(Self {
            decoder: Box::new(decoder),
            filter: Box::new(filter),
            encoder,
            muxer,
            stream,
        })
    }
}

/// Why the capture loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCause {
    EndOfInput,
    Cancelled,
    FrameLimit,
    CaptureFailed,
    WorkerExited,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopCause::EndOfInput => "end of input",
            StopCause::Cancelled => "stop requested",
            StopCause::FrameLimit => "frame limit reached",
            StopCause::CaptureFailed => "too many capture errors",
            StopCause::WorkerExited => "a worker exited early",
        };
        f.write_str(text)
    }
}

/// Counters for one finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscodeReport {
    pub stop_cause: StopCause,
    pub chunks_captured: u64,
    pub bytes_captured: u64,
    pub capture_errors: u64,
    pub chunks_decoded: u64,
    pub frames_decoded: u64,
    pub frames_filtered: u64,
    pub frames_dropped: u64,
    pub frames_encoded: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub stage_errors: u64,
    pub buffers_recovered: usize,
    pub buffers_total: usize,
    pub slots_recovered: usize,
    pub slots_total: usize,
    pub unencoded_frames: usize,
    pub elapsed_ms: u64,
}

impl TranscodeReport {
    /// Every buffer and frame slot made it back to its pool
    pub fn fully_recovered(&self) -> bool {
        self.buffers_recovered == self.buffers_total && self.slots_recovered == self.slots_total
    }
}

#[derive(Debug, Default)]
struct CaptureStats {
    chunks: u64,
    bytes: u64,
    errors: u64,
}

/// Capture → decode/filter → encode pipeline.
///
/// The calling thread runs capture; decode and encode each get a worker
/// thread. Capture hands buffers to decode through the packet relay, decode
/// hands frames to encode through the frame pool. Shutdown drains the
/// pipeline front to back: capture stops, decode empties the packet relay and
/// flushes, then encode empties the frame pool, flushes and writes the trailer.
pub struct Transcoder {
    config: PipelineConfig,
    collaborators: Option<Collaborators>,
    packets: Arc<PacketRelay>,
    frames: Arc<CodecStage>,
    state: StateCell,
    stop: StopToken,
    events: EventSink,
    receiver: Receiver<PipelineEvent>,
}

impl Transcoder {
    /// Validate `config` and allocate both relays up front
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let packets = PacketRelay::with_buffers(config.queue_depth, config.buffer_bytes())
            .context("Failed to allocate capture buffers")?;
        let frames = CodecStage::new(config.frame_slots, config.frame_wait());
        let (events, receiver) = event_channel(constants::EVENT_CHANNEL_CAPACITY);

        logger::info(&format!(
            "transcoder ready: {} buffers x {} bytes, {} frame slots, output {}x{} {} via {}",
            config.queue_depth,
            config.buffer_bytes(),
            config.frame_slots,
            collaborators.stream.width,
            collaborators.stream.height,
            collaborators.stream.layout,
            collaborators.stream.codec
        ));

        Ok(Self {
            config,
            collaborators: Some(collaborators),
            packets: Arc::new(packets),
            frames: Arc::new(frames),
            state: StateCell::default(),
            stop: StopToken::new(),
            events,
            receiver,
        })
    }

    /// Cancelling this token makes `run` stop capturing and drain
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.receiver.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state.get()
    }

    fn set_state(&self, next: PipelineState) {
        if self.state.advance(next) {
            logger::debug(&format!("pipeline state -> {:?}", next));
            self.events.emit(PipelineEvent::StateChanged(next));
        }
    }

    /// Run until the source ends, the stop token is cancelled or the frame
    /// limit is reached, then drain and close. Can only run once.
    pub fn run(&mut self, source: &mut dyn CaptureSource) -> Result<TranscodeReport> {
        let Some(collaborators) = self.collaborators.take() else {
            bail!("Transcoder has already run");
        };
        let Collaborators {
            decoder,
            filter,
            encoder,
            mut muxer,
            stream,
        } = collaborators;

        let timer = Timer::new();
        muxer
            .write_header(&stream)
            .context("Failed to write container header")?;
        logger::info(&format!("transcoding from {}", source.describe()));
        self.events.emit(PipelineEvent::StateChanged(PipelineState::Running));

        let decode_stop = StopToken::new();
        let encode_stop = StopToken::new();
        let decoder_gone = StopToken::new();
        let encoder_gone = StopToken::new();

        let encode_worker = EncodeWorker {
            frames: self.frames.clone(),
            stop: encode_stop.clone(),
            encoder,
            muxer,
            fps: stream.fps,
            time_base: stream.time_base,
            events: self.events.clone(),
        };
        let encode_handle = {
            let gone = encoder_gone.clone();
            thread::Builder::new()
                .name("encode".to_string())
                .spawn(move || {
                    let _exit = ExitGuard::new(gone);
                    encode_worker.run()
                })
                .context("Failed to spawn encode thread")?
        };

        let decode_worker = DecodeWorker {
            reader: ChunkReader::new(
                self.packets.clone(),
                decode_stop.clone(),
                self.config.buffer_wait(),
            ),
            frames: self.frames.clone(),
            decoder,
            filter,
            encoder_gone: encoder_gone.clone(),
            events: self.events.clone(),
            scratch: vec![0u8; self.config.buffer_bytes()],
        };
        let spawned = {
            let gone = decoder_gone.clone();
            thread::Builder::new()
                .name("decode".to_string())
                .spawn(move || {
                    let _exit = ExitGuard::new(gone);
                    decode_worker.run()
                })
        };
        let decode_handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                encode_stop.cancel();
                let _ = encode_handle.join();
                self.close();
                return Err(e).context("Failed to spawn decode thread");
            }
        };

        let (stop_cause, capture) = self.capture(source, &decoder_gone, &encoder_gone);
        logger::info(&format!(
            "capture stopped ({}): {} chunks, {} bytes",
            stop_cause, capture.chunks, capture.bytes
        ));
        self.set_state(PipelineState::StopRequested);

        // drain front to back
        decode_stop.cancel();
        self.set_state(PipelineState::Draining);
        let decoded = join_worker(decode_handle, "decode");
        encode_stop.cancel();
        let encoded = join_worker(encode_handle, "encode").and_then(|result| result);

        let slot_stats = self.frames.relay().stats();
        let buffers_recovered = self.packets.release().len();
        let unencoded_frames = self.frames.release().len();
        self.set_state(PipelineState::Closed);

        let decoded: DecodeStats = decoded?;
        let encoded: EncodeStats = encoded?;

        let report = TranscodeReport {
            stop_cause,
            chunks_captured: capture.chunks,
            bytes_captured: capture.bytes,
            capture_errors: capture.errors,
            chunks_decoded: decoded.chunks,
            frames_decoded: decoded.frames_decoded,
            frames_filtered: decoded.frames_filtered,
            frames_dropped: decoded.frames_dropped,
            frames_encoded: encoded.frames_encoded,
            packets_written: encoded.packets_written,
            bytes_written: encoded.bytes_written,
            stage_errors: decoded.errors + encoded.errors,
            buffers_recovered,
            buffers_total: self.packets.total(),
            slots_recovered: slot_stats.source + slot_stats.sink,
            slots_total: slot_stats.total,
            unencoded_frames,
            elapsed_ms: timer.elapsed_ms(),
        };
        if !report.fully_recovered() {
            logger::error(&format!(
                "pool leak: {}/{} buffers, {}/{} slots recovered",
                report.buffers_recovered,
                report.buffers_total,
                report.slots_recovered,
                report.slots_total
            ));
        }
        logger::info(&format!(
            "transcode finished in {}ms: {} frames encoded, {} bytes written",
            report.elapsed_ms, report.frames_encoded, report.bytes_written
        ));
        Ok(report)
    }

    /// Capture loop on the calling thread: fill empty buffers and queue them
    /// for decode until something asks to stop
    fn capture(
        &self,
        source: &mut dyn CaptureSource,
        decoder_gone: &StopToken,
        encoder_gone: &StopToken,
    ) -> (StopCause, CaptureStats) {
        let mut stats = CaptureStats::default();
        let mut consecutive_errors = 0u32;
        let wait = self.config.buffer_wait();

        let cause = loop {
            if self.stop.is_cancelled() {
                break StopCause::Cancelled;
            }
            if decoder_gone.is_cancelled() || encoder_gone.is_cancelled() {
                break StopCause::WorkerExited;
            }
            if self.config.frame_limit.is_some_and(|limit| stats.chunks >= limit) {
                break StopCause::FrameLimit;
            }

            let Some(mut buffer) = self.packets.pop_from_source_timeout(wait) else {
                continue;
            };
            match source.read_chunk(buffer.as_mut_slice()) {
                Ok(0) => {
                    self.packets.push_to_source(buffer);
                    break StopCause::EndOfInput;
                }
                Ok(n) => {
                    buffer.set_len(n);
                    self.packets.push_to_sink(buffer);
                    stats.chunks += 1;
                    stats.bytes += n as u64;
                    consecutive_errors = 0;
                }
                Err(e) => {
                    buffer.clear();
                    self.packets.push_to_source(buffer);
                    stats.errors += 1;
                    consecutive_errors += 1;
                    self.events.stage_error(Stage::Capture, &e);
                    if consecutive_errors >= self.config.max_capture_errors.max(1) {
                        logger::error(&format!(
                            "{} capture errors in a row; treating as end of input",
                            consecutive_errors
                        ));
                        break StopCause::CaptureFailed;
                    }
                }
            }
        };

        (cause, stats)
    }

    fn close(&self) {
        self.packets.release();
        self.frames.release();
        self.set_state(PipelineState::Closed);
    }
}

fn join_worker<T>(handle: JoinHandle<T>, name: &str) -> Result<T> {
    handle.join().map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        logger::error(&format!("{} thread panicked: {}", name, message));
        anyhow!("{} thread panicked: {}", name, message)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PatternSource;
    use crate::codec::{decode_lz4_packet, read_container, EncodedPacket, Frame, PixelLayout};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            width: 32,
            height: 24,
            pixel_format: PixelLayout::Yuv420p,
            queue_depth: 4,
            frame_slots: 3,
            frame_wait_ms: 10,
            buffer_wait_ms: 10,
            ..PipelineConfig::default()
        }
    }

    fn pattern(config: &PipelineConfig) -> PatternSource {
        PatternSource::new(config.width, config.height, config.pixel_format).unwrap()
    }

    fn transcoder(config: &PipelineConfig) -> Transcoder {
        let collaborators = Collaborators::from_config(config).unwrap();
        Transcoder::new(config.clone(), collaborators).unwrap()
    }

    #[test]
    fn encodes_every_captured_frame() {
        let config = small_config();
        let mut transcoder = transcoder(&config);
        let events = transcoder.events();
        let mut source = pattern(&config).with_limit(20);

        let report = transcoder.run(&mut source).unwrap();

        assert_eq!(report.stop_cause, StopCause::EndOfInput);
        assert_eq!(report.chunks_captured, 20);
        assert_eq!(report.chunks_decoded, 20);
        assert_eq!(report.frames_encoded, 20);
        assert_eq!(report.packets_written, 20);
        assert_eq!(report.stage_errors, 0);
        assert!(report.fully_recovered());
        assert_eq!(report.unencoded_frames, 0);
        assert_eq!(transcoder.state(), PipelineState::Closed);

        let states: Vec<PipelineState> = events
            .try_iter()
            .filter_map(|e| match e {
                PipelineEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PipelineState::Running,
                PipelineState::StopRequested,
                PipelineState::Draining,
                PipelineState::Closed
            ]
        );
    }

    #[test]
    fn runs_only_once() {
        let config = small_config();
        let mut transcoder = transcoder(&config);
        transcoder.run(&mut pattern(&config).with_limit(1)).unwrap();
        assert!(transcoder.run(&mut pattern(&config)).is_err());
    }

    #[test]
    fn writes_readable_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcode.frly");
        let config = PipelineConfig {
            output: path.to_string_lossy().to_string(),
            filter: "scale=16x12,vflip".to_string(),
            ..small_config()
        };
        let report = transcoder(&config)
            .run(&mut pattern(&config).with_limit(12))
            .unwrap();
        assert_eq!(report.frames_encoded, 12);

        let container = read_container(&path).unwrap();
        assert!(container.is_complete());
        assert_eq!((container.header.width, container.header.height), (16, 12));
        assert_eq!(container.header.codec, "lz4");
        assert_eq!(container.packets.len(), 12);
        for (i, packet) in container.packets.iter().enumerate() {
            assert_eq!(packet.pts, i as i64);
            let frame = decode_lz4_packet(packet).unwrap();
            assert_eq!(frame.len(), PixelLayout::Yuv420p.frame_size(16, 12));
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), report.bytes_written);
    }

    #[test]
    fn frame_limit_stops_capture() {
        let config = PipelineConfig {
            frame_limit: Some(7),
            ..small_config()
        };
        let report = transcoder(&config).run(&mut pattern(&config)).unwrap();
        assert_eq!(report.stop_cause, StopCause::FrameLimit);
        assert_eq!(report.chunks_captured, 7);
        assert_eq!(report.frames_encoded, 7);
    }

    #[test]
    fn stop_token_drains_everything_in_flight() {
        let config = small_config();
        let mut transcoder = transcoder(&config);
        let stop = transcoder.stop_token();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            stop.cancel();
        });

        let report = transcoder.run(&mut pattern(&config)).unwrap();
        stopper.join().unwrap();

        assert_eq!(report.stop_cause, StopCause::Cancelled);
        assert!(report.chunks_captured > 0);
        assert_eq!(report.frames_encoded, report.chunks_captured);
        assert!(report.fully_recovered());
    }

    /// Fails every call
    struct BrokenCamera;

    impl CaptureSource for BrokenCamera {
        fn read_chunk(&mut self, _dst: &mut [u8]) -> Result<usize> {
            bail!("device unplugged")
        }

        fn describe(&self) -> String {
            "broken camera".to_string()
        }
    }

    #[test]
    fn repeated_capture_errors_end_input() {
        let config = PipelineConfig {
            max_capture_errors: 3,
            ..small_config()
        };
        let mut transcoder = transcoder(&config);
        let events = transcoder.events();
        let report = transcoder.run(&mut BrokenCamera).unwrap();

        assert_eq!(report.stop_cause, StopCause::CaptureFailed);
        assert_eq!(report.capture_errors, 3);
        assert_eq!(report.frames_encoded, 0);
        let errors = events
            .try_iter()
            .filter(|e| matches!(e, PipelineEvent::StageError { stage: Stage::Capture, .. }))
            .count();
        assert_eq!(errors, 3);
    }

    /// Pattern source that fails every third read
    struct FlakyCamera {
        inner: PatternSource,
        calls: u32,
    }

    impl CaptureSource for FlakyCamera {
        fn read_chunk(&mut self, dst: &mut [u8]) -> Result<usize> {
            self.calls += 1;
            if self.calls % 3 == 0 {
                bail!("dropped frame");
            }
            self.inner.read_chunk(dst)
        }

        fn describe(&self) -> String {
            "flaky camera".to_string()
        }
    }

    #[test]
    fn transient_capture_errors_are_skipped() {
        let config = small_config();
        let mut source = FlakyCamera {
            inner: pattern(&config).with_limit(10),
            calls: 0,
        };
        let report = transcoder(&config).run(&mut source).unwrap();
        assert_eq!(report.stop_cause, StopCause::EndOfInput);
        assert_eq!(report.frames_encoded, 10);
        assert!(report.capture_errors >= 4);
    }

    /// Encoder slower than capture, counting what it sees
    struct SlowEncoder {
        delay: Duration,
        seen: Arc<AtomicUsize>,
    }

    impl Encoder for SlowEncoder {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn encode(&mut self, frame: &Frame) -> Result<Vec<EncodedPacket>> {
            thread::sleep(self.delay);
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(vec![EncodedPacket {
                data: vec![0; 4],
                pts: frame.pts,
                dts: frame.pts,
                keyframe: true,
            }])
        }

        fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn slow_encoder_applies_back_pressure_without_loss() {
        let config = PipelineConfig {
            queue_depth: 2,
            frame_slots: 2,
            ..small_config()
        };
        let seen = Arc::new(AtomicUsize::new(0));
        let mut collaborators = Collaborators::from_config(&config).unwrap();
        collaborators.encoder = Box::new(SlowEncoder {
            delay: Duration::from_millis(5),
            seen: seen.clone(),
        });
        let mut transcoder = Transcoder::new(config.clone(), collaborators).unwrap();

        let report = transcoder.run(&mut pattern(&config).with_limit(30)).unwrap();
        assert_eq!(report.frames_encoded, 30);
        assert_eq!(seen.load(Ordering::SeqCst), 30);
        assert!(report.fully_recovered());
    }

    /// Rejects every other frame
    struct PickyEncoder {
        calls: u64,
    }

    impl Encoder for PickyEncoder {
        fn name(&self) -> &'static str {
            "picky"
        }

        fn encode(&mut self, frame: &Frame) -> Result<Vec<EncodedPacket>> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                bail!("bitrate exceeded");
            }
            Ok(vec![EncodedPacket {
                data: frame.data.clone(),
                pts: frame.pts,
                dts: frame.pts,
                keyframe: true,
            }])
        }

        fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn encode_errors_are_counted_and_skipped() {
        let config = small_config();
        let mut collaborators = Collaborators::from_config(&config).unwrap();
        collaborators.encoder = Box::new(PickyEncoder { calls: 0 });
        let mut transcoder = Transcoder::new(config.clone(), collaborators).unwrap();

        let report = transcoder.run(&mut pattern(&config).with_limit(10)).unwrap();
        assert_eq!(report.frames_encoded, 5);
        assert_eq!(report.stage_errors, 5);
        assert!(report.fully_recovered());
    }

    /// Panics on the third frame
    struct CrashingEncoder {
        calls: u32,
    }

    impl Encoder for CrashingEncoder {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn encode(&mut self, _frame: &Frame) -> Result<Vec<EncodedPacket>> {
            self.calls += 1;
            if self.calls == 3 {
                panic!("encoder state corrupted");
            }
            Ok(Vec::new())
        }

        fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn worker_panic_fails_the_run_without_hanging() {
        let config = small_config();
        let mut collaborators = Collaborators::from_config(&config).unwrap();
        collaborators.encoder = Box::new(CrashingEncoder { calls: 0 });
        let mut transcoder = Transcoder::new(config.clone(), collaborators).unwrap();

        let err = transcoder.run(&mut pattern(&config)).unwrap_err();
        assert!(err.to_string().contains("encode thread panicked"));
        assert_eq!(transcoder.state(), PipelineState::Closed);
    }

    #[test]
    fn setup_errors_fail_fast() {
        let config = PipelineConfig {
            filter: "sharpen".to_string(),
            ..small_config()
        };
        assert!(Collaborators::from_config(&config).is_err());

        let bad = PipelineConfig {
            queue_depth: 0,
            ..small_config()
        };
        let collaborators = Collaborators::from_config(&small_config()).unwrap();
        assert!(Transcoder::new(bad, collaborators).is_err());
    }
}
