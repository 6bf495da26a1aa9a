use thiserror::Error;

use crate::engine::Key;

/// Every failure surfaced by the library.
///
/// Builder errors (`StageAlreadyExists`, `UnknownStage`) are returned
/// synchronously and leave the pipeline untouched. The remaining kinds are
/// produced by [`Pipeline::run`](crate::Pipeline::run); the first stage
/// failure wins and secondary failures from concurrent workers are dropped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("stage '{0}' is already registered")]
    StageAlreadyExists(Key),

    #[error("unknown stage '{0}'")]
    UnknownStage(Key),

    #[error("stage '{key}' does not hold a value of type {expected}")]
    TypeMismatch { key: Key, expected: &'static str },

    #[error("expected {expected} stages to run, but only {ran} did")]
    StageCountMismatch { expected: usize, ran: usize },

    #[error("invalid worker count {requested}")]
    InvalidThreadCount {
        requested: usize,
        available: Option<usize>,
    },

    #[error("stage '{stage}' failed:\n{cause}")]
    Runtime { stage: Key, cause: anyhow::Error },

    #[error("stage '{stage}' I/O failure:\n{cause}")]
    Io { stage: Key, cause: anyhow::Error },
}

impl Error {
    /// Stable, human-readable name of the error kind, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Error::StageAlreadyExists(_) => "StageAlreadyExists",
            Error::UnknownStage(_) => "UnknownStage",
            Error::TypeMismatch { .. } => "TypeMismatch",
            Error::StageCountMismatch { .. } => "StageCountMismatch",
            Error::InvalidThreadCount { .. } => "InvalidThreadCount",
            Error::Runtime { .. } => "RuntimeError",
            Error::Io { .. } => "IoError",
        }
    }

    /// Classifies a failed user computation. Failures rooted in an
    /// [`std::io::Error`] come from the I/O helper stages and keep their
    /// own kind; everything else is a plain runtime failure.
    pub(crate) fn from_userland(stage: Key, cause: anyhow::Error) -> Self {
        if cause.root_cause().is::<std::io::Error>() {
            Error::Io { stage, cause }
        } else {
            Error::Runtime { stage, cause }
        }
    }
}
