//! Engine error taxonomy

use std::path::PathBuf;

use super::capability::CapabilityError;
use super::source::SourceError;
use super::types::SessionId;

/// Errors surfaced by the session layer.
///
/// Only `load` returns these to callers. Render, search, select and outline
/// degrade to no visible effect or empty results and merely log them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown session {0}")]
    NotFound(SessionId),

    #[error("failed to load {}: {source}", .path.display())]
    LoadFailed {
        path: PathBuf,
        #[source]
        source: CapabilityError,
    },

    #[error("accelerated text capability unavailable")]
    Unavailable,

    #[error("native call failed: {0}")]
    Transient(#[source] CapabilityError),

    #[error(transparent)]
    Source(SourceError),

    #[error("background worker stopped")]
    WorkerGone,

    #[error("failed to start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl EngineError {
    pub(crate) fn load_failed(path: impl Into<PathBuf>, source: impl Into<CapabilityError>) -> Self {
        Self::LoadFailed {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Unreadable sources are load failures; only unsupported kinds of
    /// source stay [`EngineError::Source`]
    pub(crate) fn from_source(origin: impl Into<PathBuf>, err: SourceError) -> Self {
        match err {
            SourceError::Io(e) => Self::load_failed(origin, e),
            other => Self::Source(other),
        }
    }
}
