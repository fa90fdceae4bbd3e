use std::time::Duration;

/// Errors raised while planning or flying a mission.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MissionError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid field spec: {0}")]
    InvalidFieldSpec(String),

    #[error("Vehicle link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("Command rejected: {0}")]
    CommandRejected(String),

    #[error("Timeout waiting for {what} after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Mission cancelled")]
    Cancelled,

    #[error("Link error: {0}")]
    Link(String),
}

impl MissionError {
    /// Planning errors are raised before any vehicle command is issued.
    pub fn is_planning(&self) -> bool {
        matches!(
            self,
            MissionError::InvalidCoordinate(_) | MissionError::InvalidFieldSpec(_)
        )
    }
}

pub type MissionResult<T> = std::result::Result<T, MissionError>;
