use thiserror::Error;

use crate::catalog::{Stage, VariantTag};

/// Errors that can occur while selecting, building, persisting or
/// reconstructing a stage model.
///
/// Every variant is terminal for the current run: a misconfigured or
/// mismatched model is reported, never patched up.
#[derive(Debug, Error)]
pub enum TwpipeError {
    /// The configured variant name is not in the stage's catalog.
    #[error("[{stage}] unknown model variant: {name:?}")]
    UnknownVariant {
        /// Stage whose catalog was consulted.
        stage: Stage,
        /// The offending name.
        name: String,
    },

    /// A dimension required by the selected variant is zero.
    #[error("[{stage}] variant {variant:?} requires a non-zero {field}")]
    InvalidHyperparameter {
        stage: Stage,
        variant: &'static str,
        field: &'static str,
    },

    /// A recorded vocabulary size disagrees with the current vocabulary.
    #[error("[{stage}] {field} mismatch: expected {expected}, artifact records {recorded}")]
    VocabularyMismatch {
        stage: Stage,
        field: &'static str,
        expected: u32,
        recorded: u32,
    },

    /// The artifact is missing a field, holds a malformed value, or carries
    /// a parameter blob that does not fit the rebuilt network.
    #[error("[{stage}] corrupt model artifact: {reason}")]
    CorruptModelArtifact {
        /// Namespace the failure was found in.
        stage: String,
        /// What was wrong.
        reason: String,
    },

    /// A catalog tag has no entry in the constructor dispatch table.
    #[error("[{stage}] no constructor registered for variant tag {tag:?}")]
    UnreachableVariant { stage: Stage, tag: VariantTag },

    /// The artifact holds no model for the requested stage.
    #[error("model artifact has no {stage} model")]
    StageNotRecorded { stage: Stage },

    /// The store was loaded for inference and cannot be written.
    #[error("model store is read-only, cannot write {stage}/{field}")]
    ReadOnlyStore { stage: String, field: String },

    /// A configuration file names a hyperparameter that does not exist.
    #[error("unknown hyperparameter: {0:?}")]
    UnknownHyperparameter(String),

    /// Filesystem failure while flushing or loading the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Safetensors container error.
    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),
}

impl TwpipeError {
    /// Shorthand for [`TwpipeError::CorruptModelArtifact`].
    pub fn corrupt(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        TwpipeError::CorruptModelArtifact {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for twpipe operations.
pub type Result<T> = std::result::Result<T, TwpipeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TwpipeError::UnknownVariant {
            stage: Stage::Postagger,
            name: "char-transformer".into(),
        };
        assert_eq!(
            err.to_string(),
            "[postagger] unknown model variant: \"char-transformer\""
        );

        let err = TwpipeError::VocabularyMismatch {
            stage: Stage::Postagger,
            field: "n-chars",
            expected: 51,
            recorded: 50,
        };
        let msg = err.to_string();
        assert!(msg.contains("n-chars"));
        assert!(msg.contains("51"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TwpipeError>();
    }
}
