pub const APP_NAME: &str = "framerelay";

pub const CONFIG_FILE: &str = "framerelay.config";
pub const ERROR_LOG_FILE: &str = "error.log";
pub const DEBUG_LOG_FILE: &str = "debug.log";

pub const DEFAULT_OUTPUT: &str = "-";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
pub const DEFAULT_FILTER: &str = "null";
pub const DEFAULT_ENCODER: &str = "lz4";
pub const DEFAULT_FPS: &str = "30";

/// Filled-buffer queue depth between capture and decode
pub const DEFAULT_QUEUE_DEPTH: usize = 10;
/// Frame slots between filter and encode
pub const DEFAULT_FRAME_SLOTS: usize = 10;
pub const DEFAULT_FRAME_WAIT_MS: u64 = 40;
pub const DEFAULT_BUFFER_WAIT_MS: u64 = 40;
pub const DEFAULT_MAX_CAPTURE_ERRORS: u32 = 5;

/// Events kept for a slow observer before new ones are dropped
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub const INPUT_PATTERN: &str = "pattern";
