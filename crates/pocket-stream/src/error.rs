//! Error taxonomy for the synthesis pipeline
//!
//! Input errors are reported to the caller before any audio is produced.
//! Model contract and tensor errors abort the current utterance. Overflow
//! and underrun are not errors at all; they travel as playback events.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no text to synthesize")]
    EmptyInput,

    #[error("unknown voice '{0}'")]
    UnknownVoice(String),

    #[error("no voice embedding available, select a voice or encode reference audio")]
    MissingVoice,

    #[error("invalid voice data: {0}")]
    InvalidVoiceData(String),

    #[error("{port} returned an unexpected response: {detail}")]
    ModelContract { port: &'static str, detail: String },

    #[error("{port} failed to run: {detail}")]
    Backend { port: &'static str, detail: String },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("a generation is already in progress")]
    Busy,

    #[error("generation cancelled")]
    Cancelled,
}

impl SynthesisError {
    pub fn contract(port: &'static str, detail: impl Into<String>) -> Self {
        Self::ModelContract {
            port,
            detail: detail.into(),
        }
    }

    pub fn backend(port: &'static str, detail: impl std::fmt::Display) -> Self {
        Self::Backend {
            port,
            detail: detail.to_string(),
        }
    }

    /// Errors that invalidate the whole utterance.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ModelContract { .. } | Self::Backend { .. } | Self::Tensor(_)
        )
    }

    /// Errors caused by the request itself rather than the models.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::UnknownVoice(_)
                | Self::MissingVoice
                | Self::InvalidVoiceData(_)
        )
    }
}

impl From<hound::Error> for SynthesisError {
    fn from(e: hound::Error) -> Self {
        Self::Audio(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SynthesisError>;
