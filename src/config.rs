use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::codec::{EncoderKind, PixelLayout, Rational};
use crate::shared::constants;

/// Everything a transcode run needs, loaded from `framerelay.config`
/// (`key = value` lines) and then overridden from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// `pattern` for the built-in test source, otherwise a raw video file
    pub input: String,
    /// Container path, or `-` to discard the encoded stream
    pub output: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelLayout,
    pub filter: String,
    pub encoder: EncoderKind,
    pub fps: Rational,
    pub queue_depth: usize,
    /// Bytes per capture buffer; 0 sizes buffers to one frame
    pub buffer_size: usize,
    pub frame_slots: usize,
    pub frame_wait_ms: u64,
    pub buffer_wait_ms: u64,
    /// Stop after this many captured frames
    pub frame_limit: Option<u64>,
    pub max_capture_errors: u32,
    /// Pace capture to `fps` like a live device
    pub realtime: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: constants::INPUT_PATTERN.to_string(),
            output: constants::DEFAULT_OUTPUT.to_string(),
            width: constants::DEFAULT_WIDTH,
            height: constants::DEFAULT_HEIGHT,
            pixel_format: PixelLayout::Yuv420p,
            filter: constants::DEFAULT_FILTER.to_string(),
            encoder: EncoderKind::Lz4,
            fps: Rational::new(30, 1),
            queue_depth: constants::DEFAULT_QUEUE_DEPTH,
            buffer_size: 0,
            frame_slots: constants::DEFAULT_FRAME_SLOTS,
            frame_wait_ms: constants::DEFAULT_FRAME_WAIT_MS,
            buffer_wait_ms: constants::DEFAULT_BUFFER_WAIT_MS,
            frame_limit: None,
            max_capture_errors: constants::DEFAULT_MAX_CAPTURE_ERRORS,
            realtime: false,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}

fn parse_number<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(value.parse::<T>()?)
}

impl PipelineConfig {
    /// Parse config text on top of the defaults
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();
        for (number, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let (key, value) = trimmed
                .split_once('=')
                .with_context(|| format!("line {}: expected 'key = value'", number + 1))?;
            config
                .set(key, value)
                .with_context(|| format!("line {}", number + 1))?;
        }
        Ok(config)
    }

    /// Set one key; `-` and `_` are interchangeable in key names
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key = key.trim().replace('-', "_");
        let value = value.trim();
        let parsed = match key.as_str() {
            "input" => {
                self.input = value.to_string();
                Ok(())
            }
            "output" => {
                self.output = value.to_string();
                Ok(())
            }
            "width" => parse_number(value).map(|v| self.width = v),
            "height" => parse_number(value).map(|v| self.height = v),
            "pixel_format" => value.parse().map(|v| self.pixel_format = v),
            "filter" => {
                self.filter = value.to_string();
                Ok(())
            }
            "encoder" => value.parse().map(|v| self.encoder = v),
            "fps" => value.parse().map(|v| self.fps = v),
            "queue_depth" => parse_number(value).map(|v| self.queue_depth = v),
            "buffer_size" => parse_number(value).map(|v| self.buffer_size = v),
            "frame_slots" => parse_number(value).map(|v| self.frame_slots = v),
            "frame_wait_ms" => parse_number(value).map(|v| self.frame_wait_ms = v),
            "buffer_wait_ms" => parse_number(value).map(|v| self.buffer_wait_ms = v),
            "frame_limit" => parse_number::<u64>(value)
                .map(|v| self.frame_limit = if v == 0 { None } else { Some(v) }),
            "max_capture_errors" => parse_number(value).map(|v| self.max_capture_errors = v),
            "realtime" => parse_bool(value).map(|v| self.realtime = v),
            _ => bail!("Unknown config key '{}'", key),
        };
        parsed.with_context(|| format!("Invalid value '{}' for '{}'", value, key))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// `framerelay.config` in the working directory, then in the user config dir
    pub fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(constants::CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join(constants::APP_NAME).join(constants::CONFIG_FILE))
            .filter(|path| path.is_file())
    }

    /// Load from `path`, or from the first config file found, or defaults
    pub fn resolve(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::locate(),
        };
        match path {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Invalid video size {}x{}", self.width, self.height);
        }
        if self.width > u16::MAX as u32 || self.height > u16::MAX as u32 {
            bail!("Video size {}x{} is too large", self.width, self.height);
        }
        if !self.fps.is_valid() {
            bail!("Invalid frame rate {}", self.fps);
        }
        if self.queue_depth == 0 {
            bail!("queue_depth must be at least 1");
        }
        if self.frame_slots == 0 {
            bail!("frame_slots must be at least 1");
        }
        if self.frame_wait_ms == 0 || self.buffer_wait_ms == 0 {
            bail!("frame_wait_ms and buffer_wait_ms must be non-zero");
        }
        if self.buffer_size != 0 && self.buffer_size < self.frame_bytes() {
            bail!(
                "buffer_size {} is smaller than one {}x{} {} frame ({} bytes)",
                self.buffer_size,
                self.width,
                self.height,
                self.pixel_format,
                self.frame_bytes()
            );
        }
        if self.output.trim().is_empty() {
            bail!("output must be a path or '-'");
        }
        Ok(())
    }

    pub fn frame_bytes(&self) -> usize {
        self.pixel_format.frame_size(self.width, self.height)
    }

    pub fn buffer_bytes(&self) -> usize {
        if self.buffer_size == 0 {
            self.frame_bytes()
        } else {
            self.buffer_size
        }
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn buffer_wait(&self) -> Duration {
        Duration::from_millis(self.buffer_wait_ms)
    }

    /// Output time base: one tick per frame
    pub fn time_base(&self) -> Rational {
        self.fps.inverse()
    }

    pub fn to_config_string(&self) -> String {
        let lines = [
            format!("input = {}", self.input),
            format!("output = {}", self.output),
            format!("width = {}", self.width),
            format!("height = {}", self.height),
            format!("pixel-format = {}", self.pixel_format),
            format!("filter = {}", self.filter),
            format!("encoder = {}", self.encoder),
            format!("fps = {}", self.fps),
            format!("queue-depth = {}", self.queue_depth),
            format!("buffer-size = {}", self.buffer_size),
            format!("frame-slots = {}", self.frame_slots),
            format!("frame-wait-ms = {}", self.frame_wait_ms),
            format!("buffer-wait-ms = {}", self.buffer_wait_ms),
            format!("frame-limit = {}", self.frame_limit.unwrap_or(0)),
            format!("max-capture-errors = {}", self.max_capture_errors),
            format!("realtime = {}", self.realtime),
        ];
        let mut content = lines.join("\n");
        content.push('\n');
        content
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_config_string())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Command-line overrides; anything left unset keeps the config file value
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Config file to load instead of the default search
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Input: "pattern" or a raw video file
    #[arg(short, long)]
    pub input: Option<String>,
    /// Output container path, "-" to discard
    #[arg(short, long)]
    pub output: Option<String>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    #[arg(long)]
    pub pixel_format: Option<String>,
    /// Filter chain, e.g. "scale=320x240,negate"
    #[arg(long)]
    pub filter: Option<String>,
    #[arg(long)]
    pub encoder: Option<String>,
    #[arg(long)]
    pub fps: Option<String>,
    #[arg(long)]
    pub queue_depth: Option<usize>,
    #[arg(long)]
    pub buffer_size: Option<usize>,
    #[arg(long)]
    pub frame_slots: Option<usize>,
    #[arg(long)]
    pub frame_wait_ms: Option<u64>,
    #[arg(long)]
    pub buffer_wait_ms: Option<u64>,
    /// Stop after N frames (0 = until end of input)
    #[arg(short = 'n', long)]
    pub frame_limit: Option<u64>,
    #[arg(long)]
    pub max_capture_errors: Option<u32>,
    /// Pace capture to the frame rate
    #[arg(long)]
    pub realtime: Option<bool>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        let text_overrides = [
            ("input", self.input.clone()),
            ("output", self.output.clone()),
            ("pixel_format", self.pixel_format.clone()),
            ("filter", self.filter.clone()),
            ("encoder", self.encoder.clone()),
            ("fps", self.fps.clone()),
        ];
        for (key, value) in text_overrides {
            if let Some(value) = value {
                config.set(key, &value)?;
            }
        }

        if let Some(v) = self.width {
            config.width = v;
        }
        if let Some(v) = self.height {
            config.height = v;
        }
        if let Some(v) = self.queue_depth {
            config.queue_depth = v;
        }
        if let Some(v) = self.buffer_size {
            config.buffer_size = v;
        }
        if let Some(v) = self.frame_slots {
            config.frame_slots = v;
        }
        if let Some(v) = self.frame_wait_ms {
            config.frame_wait_ms = v;
        }
        if let Some(v) = self.buffer_wait_ms {
            config.buffer_wait_ms = v;
        }
        if let Some(v) = self.frame_limit {
            config.frame_limit = if v == 0 { None } else { Some(v) };
        }
        if let Some(v) = self.max_capture_errors {
            config.max_capture_errors = v;
        }
        if let Some(v) = self.realtime {
            config.realtime = v;
        }
        Ok(())
    }

    /// Config file (or defaults) with these overrides applied
    pub fn resolve(&self) -> Result<(PipelineConfig, Option<PathBuf>)> {
        let (mut config, path) = PipelineConfig::resolve(self.config.as_deref())?;
        self.apply(&mut config)?;
        Ok((config, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_file() {
        let config = PipelineConfig::parse(
            "# capture settings\n\
             width = 320\n\
             height=240\n\
             pixel-format = bgr24\n\
             fps = 30000/1001\n\
             \n\
             filter = scale=160x120, negate\n\
             frame_limit = 25\n\
             realtime = yes\n",
        )
        .unwrap();

        assert_eq!(config.width, 320);
        assert_eq!(config.height, 240);
        assert_eq!(config.pixel_format, PixelLayout::Bgr24);
        assert_eq!(config.fps, Rational::new(30000, 1001));
        assert_eq!(config.filter, "scale=160x120, negate");
        assert_eq!(config.frame_limit, Some(25));
        assert!(config.realtime);
        assert_eq!(config.queue_depth, constants::DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(PipelineConfig::parse("font-size = 2.5").is_err());
        assert!(PipelineConfig::parse("width = wide").is_err());
        assert!(PipelineConfig::parse("pixel_format = rgb565").is_err());
        assert!(PipelineConfig::parse("just a line").is_err());
    }

    #[test]
    fn buffer_size_defaults_to_one_frame() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.buffer_bytes(), 460_800);
        config.buffer_size = 1_000_000;
        assert_eq!(config.buffer_bytes(), 1_000_000);
        config.buffer_size = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_pools() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        config.frame_slots = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut config = PipelineConfig::parse("width = 320\nfps = 25").unwrap();
        let overrides = ConfigOverrides {
            width: Some(64),
            fps: Some("60".to_string()),
            frame_limit: Some(0),
            ..Default::default()
        };
        overrides.apply(&mut config).unwrap();
        assert_eq!(config.width, 64);
        assert_eq!(config.fps, Rational::new(60, 1));
        assert_eq!(config.frame_limit, None);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framerelay.config");
        let mut config = PipelineConfig::default();
        config.filter = "vflip".to_string();
        config.frame_limit = Some(7);
        config.save(&path).unwrap();

        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
