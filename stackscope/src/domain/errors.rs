//! Structured error types for stackscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Failure of a single stack capture.
///
/// Never propagated out of the sampler loop: an interrupted capture abandons
/// the tick, an exhausted source ends the loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Stack capture interrupted: {0}")]
    Interrupted(String),

    #[error("Stack source exhausted")]
    Exhausted,
}

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Failed to spawn sampler thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Sampler thread panicked")]
    WorkerPanicked,

    #[error("Failed to install capture signal handler: {0}")]
    SignalSetup(#[source] std::io::Error),
}

/// Fatal trace decoding failures.
///
/// The container framing must be self-consistent for any later record to be
/// interpretable, so none of these yield a partial result.
#[derive(Error, Debug)]
pub enum TraceParseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("magic number mismatch: expected {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("Unsupported trace version {0}")]
    UnsupportedVersion(u16),

    #[error("malformed trace: record at offset {offset} needs {needed} bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("malformed trace: record #{index} at offset {offset}: {source}")]
    Malformed {
        index: usize,
        offset: usize,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Unable to detect trace format")]
    UnknownFormat,
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid stack dump on line {line}: {source}")]
    InvalidLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_magic_display() {
        let err = TraceParseError::BadMagic {
            expected: "SIMPLEPERF".to_string(),
            found: "NOTPERFXXX".to_string(),
        };
        assert!(err.to_string().contains("magic number mismatch"));
        assert!(err.to_string().contains("NOTPERFXXX"));
    }

    #[test]
    fn test_truncated_display() {
        let err = TraceParseError::Truncated {
            offset: 12,
            needed: 40,
            available: 3,
        };
        assert!(err.to_string().starts_with("malformed trace"));
        assert!(err.to_string().contains("offset 12"));
    }

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::Interrupted("signal".to_string());
        assert_eq!(err.to_string(), "Stack capture interrupted: signal");
    }
}
