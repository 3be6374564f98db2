//! Error types for oxide-audio

use std::path::PathBuf;

use thiserror::Error;

use crate::format::SampleFormat;

/// Broad class of an [`AudioError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or unsupported parameters, rejected with no state change
    Configuration,
    /// Operation issued in a state that does not allow it
    Sequencing,
    /// The platform failed; the session is no longer usable
    Backend,
}

/// Main error type
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat { format: SampleFormat },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {operation} while device is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("sample format mismatch: device uses {expected}, callback uses {actual}")]
    FormatMismatch {
        expected: SampleFormat,
        actual: SampleFormat,
    },

    #[error("audio backend failed to {operation} '{device}': {detail}")]
    Backend {
        operation: &'static str,
        device: String,
        detail: String,
    },

    #[error("audio unavailable: {0}")]
    Unavailable(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("session faulted by an earlier backend failure; reopen the device")]
    SessionFaulted,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AudioError {
    /// Create a backend error carrying platform diagnostic detail
    pub fn backend(
        operation: &'static str,
        device: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Self::Backend {
            operation,
            device: device.into(),
            detail: detail.to_string(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } | Self::InvalidConfig(_) | Self::Config(_) => {
                ErrorKind::Configuration
            }
            Self::InvalidState { .. } | Self::FormatMismatch { .. } | Self::SessionFaulted => {
                ErrorKind::Sequencing
            }
            Self::Backend { .. } | Self::Unavailable(_) | Self::DeviceNotFound(_) => {
                ErrorKind::Backend
            }
        }
    }
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = AudioError::backend("open", "USB Mic", "device busy");
        assert_eq!(
            err.to_string(),
            "audio backend failed to open 'USB Mic': device busy"
        );
        assert_eq!(err.kind(), ErrorKind::Backend);
    }

    #[test]
    fn test_error_kinds() {
        let err = AudioError::UnsupportedFormat {
            format: SampleFormat::F32,
        };
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = AudioError::InvalidState {
            operation: "connect",
            state: "running",
        };
        assert_eq!(err.kind(), ErrorKind::Sequencing);
        assert_eq!(err.to_string(), "cannot connect while device is running");
    }

    #[test]
    fn test_config_error_converts() {
        let err: AudioError = ConfigError::Invalid {
            field: "sample_rate",
            reason: "must be non-zero".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
