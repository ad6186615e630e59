pub mod capture;
pub mod codec;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod shared;
pub mod sync;
pub mod utils;
