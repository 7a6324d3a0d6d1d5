use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error kinds across the pipeline. Variants are machine-readable;
/// the payload strings carry context for logs, never vendor or I/O specifics
/// that callers would be tempted to match on.
#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("failed to decode audio: {0}")]
    Decode(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("index/query configuration mismatch: {0}")]
    ConfigMismatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("numeric overflow: {0}")]
    NumericOverflow(String),

    #[error("failed to open key-value store: {0}")]
    KvOpen(String),

    #[error("key-value read failed: {0}")]
    KvRead(String),

    #[error("key-value write failed: {0}")]
    KvWrite(String),

    #[error("key-value merge failed: {0}")]
    KvMerge(String),

    #[error("input contained no audio samples")]
    EmptyAudio,

    #[error("not enough samples to form a single frame")]
    NoFrames,

    #[error("no peaks survived filtering")]
    NoPeaks,

    #[error("operation exceeded its deadline")]
    Timeout,

    #[error("malformed bytes: {0}")]
    Integrity(String),
}

impl IntoResponse for LandmarkError {
    fn into_response(self) -> Response {
        let status = match &self {
            LandmarkError::Decode(_)
            | LandmarkError::EmptyAudio
            | LandmarkError::NoFrames
            | LandmarkError::NoPeaks
            | LandmarkError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LandmarkError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            LandmarkError::ConfigMismatch(_) => StatusCode::CONFLICT,
            LandmarkError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            LandmarkError::Resample(_)
            | LandmarkError::NumericOverflow(_)
            | LandmarkError::KvOpen(_)
            | LandmarkError::KvRead(_)
            | LandmarkError::KvWrite(_)
            | LandmarkError::KvMerge(_)
            | LandmarkError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

impl LandmarkError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LandmarkError::Decode(_) => "decode_error",
            LandmarkError::UnsupportedFormat(_) => "unsupported_format",
            LandmarkError::Resample(_) => "resample_error",
            LandmarkError::ConfigMismatch(_) => "config_mismatch",
            LandmarkError::InvalidArgument(_) => "invalid_argument",
            LandmarkError::NumericOverflow(_) => "numeric_overflow",
            LandmarkError::KvOpen(_) => "kv_open_error",
            LandmarkError::KvRead(_) => "kv_read_error",
            LandmarkError::KvWrite(_) => "kv_write_error",
            LandmarkError::KvMerge(_) => "kv_merge_error",
            LandmarkError::EmptyAudio => "empty_audio",
            LandmarkError::NoFrames => "no_frames",
            LandmarkError::NoPeaks => "no_peaks",
            LandmarkError::Timeout => "timeout",
            LandmarkError::Integrity(_) => "integrity_error",
        }
    }

    /// Whether a per-track build failure of this kind is tolerated (the
    /// track is skipped with a warning) rather than aborting the build.
    pub fn is_build_tolerable(&self) -> bool {
        matches!(
            self,
            LandmarkError::Decode(_)
                | LandmarkError::EmptyAudio
                | LandmarkError::NoFrames
                | LandmarkError::NoPeaks
                | LandmarkError::Integrity(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LandmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(LandmarkError::EmptyAudio.kind(), "empty_audio");
        assert_eq!(
            LandmarkError::ConfigMismatch("x".into()).kind(),
            "config_mismatch"
        );
        assert_eq!(LandmarkError::Timeout.kind(), "timeout");
    }

    #[test]
    fn build_tolerance_policy() {
        assert!(LandmarkError::NoPeaks.is_build_tolerable());
        assert!(LandmarkError::Decode("bad stream".into()).is_build_tolerable());
        assert!(!LandmarkError::UnsupportedFormat("container".into()).is_build_tolerable());
        assert!(!LandmarkError::KvWrite("disk full".into()).is_build_tolerable());
        assert!(!LandmarkError::ConfigMismatch("layout".into()).is_build_tolerable());
    }
}
