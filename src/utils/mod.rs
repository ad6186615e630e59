pub mod file_utils;
pub mod logger;
pub mod platform;
pub mod time_utils;
