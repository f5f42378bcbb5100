use thiserror::Error;

use crate::actions::Action;

/// Errors raised while interpreting frames. None of them end a session.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("expected 21 landmarks per hand, got {got}")]
    InvalidLandmarkCount { got: usize },

    #[error("no hand detected in frame {frame}")]
    HandLost { frame: u64 },

    #[error("failed to deliver {action:?}: {source}")]
    ActionDeliveryFailed {
        action: Action,
        #[source]
        source: anyhow::Error,
    },

    #[error("tracking is not active")]
    NotTracking,
}
