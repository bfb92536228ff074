//! Typed error taxonomy shared across DockerClient, StackIndex, TerminalHub
//! and SessionGateway. Library code returns `CoreError` at the seams that
//! need to distinguish failure kinds (e.g. `Busy` vs `NotFound`); everything
//! else keeps propagating plain `anyhow::Error` the way the rest of this
//! codebase already does.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("the Docker engine is unreachable")]
    UnreachableEngine,

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("another operation is already running for {0}")]
    Busy(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command exited with status {code}: {stderr}")]
    ChildFailed { code: i32, stderr: String },

    #[error("unauthorised")]
    Unauthorised,

    #[error("transient failure, retry advised: {0}")]
    Transient(String),

    #[error("{0} is gone")]
    Gone(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Short machine-readable tag rendered alongside `msg` in request
    /// callbacks, per §7 ("the gateway renders errors as
    /// `{ok:false, msg:<human text>, kind:<tag>}`").
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::UnreachableEngine => "UnreachableEngine",
            CoreError::NotFound(_) => "NotFound",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Busy(_) => "Busy",
            CoreError::InvalidArgument(_) => "InvalidArgument",
            CoreError::ChildFailed { .. } => "ChildFailed",
            CoreError::Unauthorised => "Unauthorised",
            CoreError::Transient(_) => "Transient",
            CoreError::Gone(_) => "Gone",
            CoreError::Other(_) => "Error",
        }
    }

    /// Whether the failure is worth an internal, bounded retry (registry
    /// probes and event-stream reconnects per §7's propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_) | CoreError::UnreachableEngine)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(CoreError::Busy("demo".into()).kind(), "Busy");
        assert_eq!(CoreError::NotFound("x".into()).kind(), "NotFound");
        assert_eq!(
            CoreError::ChildFailed { code: 1, stderr: String::new() }.kind(),
            "ChildFailed"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(CoreError::Transient("probe".into()).is_retryable());
        assert!(CoreError::UnreachableEngine.is_retryable());
        assert!(!CoreError::Busy("x".into()).is_retryable());
    }
}
