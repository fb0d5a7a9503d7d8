//! Error taxonomy for the orchestration core.
//!
//! Every manager in this crate (registry, queue, supervisor, reconciler,
//! browser store, ingest, settings) returns `anyhow::Error` — infrastructure
//! plumbing and manager logic are both unrecoverable context for an
//! operator, not something an in-process caller branches on. [`CoreError`]
//! is the taxonomy an external API boundary (out of scope for this crate)
//! would classify those errors into before handing a caller a
//! `{code, message, data?}` response; nothing inside the core constructs
//! or returns it today.

use thiserror::Error;

/// A core-level failure, one variant per error kind the orchestration
/// surface can produce.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("failed to spawn worker for task {task_id}: {source}")]
    SpawnError {
        task_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for task {task_id} crashed (exit code {exit_code})")]
    Crash { task_id: String, exit_code: i32 },

    #[error("worker for task {task_id} timed out after {seconds}s")]
    Timeout { task_id: String, seconds: u64 },

    #[error("shutting down")]
    Shutdown,
}

impl CoreError {
    /// The HTTP status an out-of-core API layer should map this to.
    /// The core itself never returns this value to a caller; it is kept
    /// next to the enum so the mapping stays exhaustive as variants change.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Validation(_) => 422,
            Self::Transient(_) => 503,
            Self::SpawnError { .. } | Self::Crash { .. } | Self::Timeout { .. } => 500,
            Self::Shutdown => 503,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Result alias for the core's public API.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CoreError::NotFound("x".to_string()), 404)]
    #[case(CoreError::Conflict("x".to_string()), 409)]
    #[case(CoreError::Validation("x".to_string()), 422)]
    #[case(CoreError::Transient("x".to_string()), 503)]
    #[case(CoreError::SpawnError { task_id: "t1".to_string(), source: std::io::Error::from(std::io::ErrorKind::Other) }, 500)]
    #[case(CoreError::Crash { task_id: "t1".to_string(), exit_code: 1 }, 500)]
    #[case(CoreError::Timeout { task_id: "t1".to_string(), seconds: 30 }, 500)]
    #[case(CoreError::Shutdown, 503)]
    fn http_status_mapping_is_exhaustive(#[case] err: CoreError, #[case] expected: u16) {
        assert_eq!(err.http_status(), expected);
    }

    #[test]
    fn row_not_found_maps_to_not_found_variant() {
        let err = CoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
