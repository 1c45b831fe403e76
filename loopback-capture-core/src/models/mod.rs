pub mod chunk;
pub mod config;
pub mod diagnostics;
pub mod endpoint;
pub mod error;
pub mod format;
pub mod recording_result;
pub mod state;
