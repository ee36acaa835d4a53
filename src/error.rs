//! Error taxonomy for the perception pipeline.
//!
//! Library functions return `anyhow::Result`. Conditions that callers are expected to
//! branch on are raised as a `PerceptionError` so they survive `downcast_ref`.
//!
//! Recoverable degraded output (cold start, unexpected depth tensor shape) is NOT an
//! error: stages return a zero field and log a warning instead.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PerceptionError {
    /// A precondition was violated (bad size, bad kernel, wrong pixel format).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine has been disposed and no longer accepts frames.
    #[error("perception engine stopped")]
    EngineStopped,

    /// The inference backend failed to load or to run.
    #[error("inference backend failure: {0}")]
    Backend(String),
}

impl PerceptionError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Returns `InvalidArgument` wrapped in `anyhow::Error` when `cond` is false.
pub(crate) fn ensure_arg(cond: bool, msg: impl FnOnce() -> String) -> anyhow::Result<()> {
    if cond {
        Ok(())
    } else {
        Err(PerceptionError::InvalidArgument(msg()).into())
    }
}

/// True when `err` carries a `PerceptionError::InvalidArgument`.
pub fn is_invalid_argument(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PerceptionError>(),
        Some(PerceptionError::InvalidArgument(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_argument_survives_anyhow_round_trip() {
        let err: anyhow::Error = PerceptionError::invalid("grid width must be > 0").into();
        assert!(is_invalid_argument(&err));
        assert_eq!(err.to_string(), "invalid argument: grid width must be > 0");
    }

    #[test]
    fn ensure_arg_passes_through_when_condition_holds() {
        assert!(ensure_arg(true, || "unused".into()).is_ok());
        let err = ensure_arg(false, || "kernel must be odd".into()).unwrap_err();
        assert!(is_invalid_argument(&err));
    }
}
