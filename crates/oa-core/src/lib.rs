//! Core types for oxide-audio
//!
//! Sample-format descriptors, the error taxonomy, configuration and logging
//! shared by the buffer and device crates.

pub mod config;
pub mod error;
pub mod format;
pub mod logging;

pub use config::{AudioConfig, Config, DebugConfig, LogLevel};
pub use error::{AudioError, ConfigError, ErrorKind, Result};
pub use format::{SampleEncoding, SampleFormat, StreamFormat};
