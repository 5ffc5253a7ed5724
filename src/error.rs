// Core error taxonomy
// Shared by every analysis, slicing and rendering stage

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Buffer too short or too quiet to estimate tempo/key
    #[error("Insufficient signal: {0}")]
    InsufficientSignal(String),

    #[error("Invalid time signature {numerator}/{denominator}")]
    InvalidTimeSignature { numerator: u32, denominator: u32 },

    /// Wrong channel count, empty buffer, NaN/Inf samples, zero-length segments
    #[error("Malformed audio: {0}")]
    MalformedAudio(String),

    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Audio file error: {0}")]
    Audio(#[from] crate::audio::AudioError),

    #[error("Stem separation error: {0}")]
    Separation(#[from] crate::pipeline::backend::SeparationError),

    #[error("Trace file error: {0}")]
    Trace(#[from] crate::pipeline::trace::TraceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Only a lack of signal is recovered locally (caller-supplied fallback)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::InsufficientSignal(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_insufficient_signal_is_recoverable() {
        assert!(CoreError::InsufficientSignal("silent".into()).is_recoverable());
        assert!(!CoreError::MalformedAudio("nan".into()).is_recoverable());
        assert!(!CoreError::InvalidTimeSignature { numerator: 0, denominator: 4 }.is_recoverable());
        assert!(!CoreError::InvalidTempo(0.0).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidTimeSignature { numerator: 0, denominator: 4 };
        assert_eq!(err.to_string(), "Invalid time signature 0/4");
    }

    #[test]
    fn test_separation_and_trace_errors_keep_their_kind() {
        use crate::pipeline::backend::{SeparationBackend, SeparationError};
        use crate::pipeline::trace::TraceError;

        let err: CoreError = SeparationError::BackendNotImplemented(SeparationBackend::Demucs).into();
        assert!(matches!(err, CoreError::Separation(_)));
        assert!(err.to_string().starts_with("Stem separation error: "));
        assert!(!err.is_recoverable());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: CoreError = TraceError::from(io).into();
        assert!(matches!(err, CoreError::Trace(_)));
        assert!(err.to_string().starts_with("Trace file error: "));
    }
}
