// src/errors.rs

//! Crate-wide error taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("experiment '{0}' not found")]
    ExperimentNotFound(String),

    #[error("participant '{0}' not found")]
    ParticipantNotFound(String),

    #[error("invalid participant name '{0}': must match ^[a-zA-Z0-9-]+$")]
    InvalidParticipantName(String),

    #[error("invalid session number '{0}': must be an integer >= 1")]
    InvalidSession(String),

    #[error("experiment '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no experiment is running")]
    NotRunning,

    #[error("window is not open")]
    WindowNotOpen,

    #[error("missing required parameter(s) {0:?}")]
    MissingParameters(Vec<String>),

    #[error("unknown experiment parameter(s) {0:?}")]
    UnknownParameters(Vec<String>),

    #[error("experiment '{key}' is missing the resource(s) {missing:?}")]
    ResourcesMissing { key: String, missing: Vec<String> },

    #[error("experiment '{0}' has load-time errors and cannot be run")]
    ExperimentBroken(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("session is closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`SessionError`].
///
/// The transport layer maps these onto HTTP status codes; the core only
/// guarantees the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Resource,
    Load,
    Internal,
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        use SessionError::*;
        match self {
            InvalidParticipantName(_) | InvalidSession(_) | MissingParameters(_)
            | UnknownParameters(_) => ErrorClass::Validation,
            ExperimentNotFound(_) | ParticipantNotFound(_) => ErrorClass::NotFound,
            AlreadyRunning(_) | NotRunning | WindowNotOpen | Closed => ErrorClass::Conflict,
            ResourcesMissing { .. } => ErrorClass::Resource,
            ExperimentBroken(_) => ErrorClass::Load,
            Engine(_) | IoError(_) | Other(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
