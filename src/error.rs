use thiserror::Error;

/// Fatal errors that abort a run without producing a [`BatchResult`].
///
/// Individual task failures never surface here; they are captured as
/// [`OperationFailure`] entries in the result.
///
/// [`BatchResult`]: crate::BatchResult
/// [`OperationFailure`]: crate::OperationFailure
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(String),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Task handler panicked: {0}")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Error returned by a [`TaskHandler`](crate::TaskHandler) for a single attempt.
///
/// Errors are transient (retryable) unless built with
/// [`TaskError::permanent`]. A permanent error skips the retry policy and
/// settles the task as failed right away.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    /// Status code reported by the remote service, if any.
    pub status_code: Option<u16>,
    /// Free-form details carried into the final [`OperationFailure`](crate::OperationFailure).
    pub context: Option<serde_json::Value>,
    permanent: bool,
}

impl TaskError {
    /// A retryable failure (timeouts, 5xx responses, dropped connections).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            context: None,
            permanent: false,
        }
    }

    /// A terminal failure that no amount of retrying will fix
    /// (validation rejected, duplicate address, ...).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            permanent: true,
            ..Self::transient(message)
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::transient(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_by_default() {
        let err = TaskError::transient("connection reset");
        assert!(!err.is_permanent());
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_permanent_keeps_details() {
        let err = TaskError::permanent("address already taken")
            .with_status(409)
            .with_context(serde_json::json!({ "field": "address" }));
        assert!(err.is_permanent());
        assert_eq!(err.status_code, Some(409));
        assert_eq!(err.context.unwrap()["field"], "address");
    }

    #[test]
    fn test_from_anyhow_is_transient() {
        let err: TaskError = anyhow::anyhow!("upstream timeout").into();
        assert!(!err.is_permanent());
        assert!(err.message.contains("upstream timeout"));
    }
}
