//! Capture sources feeding raw frames into the packet relay.

pub mod file;
pub mod pattern;

use std::path::Path;

use anyhow::Result;

use crate::config::PipelineConfig;
use crate::shared::constants;
use crate::sync::Pacer;

pub use file::RawFileSource;
pub use pattern::PatternSource;

/// Anything that can fill a buffer with raw input bytes
pub trait CaptureSource {
    /// Fill `dst` and return the number of bytes written; 0 means end of input
    fn read_chunk(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Short human-readable name used in logs
    fn describe(&self) -> String;
}

/// Source named by `config.input`: the test pattern or a raw video file
pub fn open_source(config: &PipelineConfig) -> Result<Box<dyn CaptureSource>> {
    let pacer = config.realtime.then(|| Pacer::new(config.fps));

    if config.input == constants::INPUT_PATTERN {
        let mut source = PatternSource::new(config.width, config.height, config.pixel_format)?;
        if let Some(pacer) = pacer {
            source = source.with_pacer(pacer);
        }
        Ok(Box::new(source))
    } else {
        let mut source = RawFileSource::open(Path::new(&config.input), config.frame_bytes())?;
        if let Some(pacer) = pacer {
            source = source.with_pacer(pacer);
        }
        Ok(Box::new(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_pattern_by_default() {
        let config = PipelineConfig {
            width: 8,
            height: 8,
            ..PipelineConfig::default()
        };
        let mut source = open_source(&config).unwrap();
        assert!(source.describe().starts_with("pattern 8x8"));
        let mut buf = vec![0u8; config.frame_bytes()];
        assert_eq!(source.read_chunk(&mut buf).unwrap(), 96);
    }

    #[test]
    fn missing_input_file_is_a_setup_error() {
        let config = PipelineConfig {
            input: "/nonexistent/capture.yuv".to_string(),
            ..PipelineConfig::default()
        };
        assert!(open_source(&config).is_err());
    }
}
