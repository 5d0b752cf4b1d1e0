/// Backend call failure with retry classification.
///
/// Backends return this error to tell the pollers whether trying again can
/// help. Transient failures (throttling, connection resets, timeouts) are
/// retryable; malformed requests or unknown tokens are permanent.
///
/// ```rust
/// use duroflow::backend::BackendError;
///
/// let throttled = BackendError::retryable("poll_decision_task", "rate exceeded");
/// assert!(throttled.is_retryable());
///
/// let bad_token = BackendError::permanent("respond_decision", "unknown task token");
/// assert!(!bad_token.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Backend operation that failed (e.g. "poll_decision_task_page")
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl BackendError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Plain string errors count as transient.
impl From<String> for BackendError {
    fn from(s: String) -> Self {
        Self {
            operation: "unknown".to_string(),
            message: s,
            retryable: true,
        }
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_display() {
        let retryable = BackendError::retryable("poll_decision_task", "throttled");
        assert!(retryable.is_retryable());
        assert_eq!(retryable.to_string(), "poll_decision_task: throttled");

        let permanent = BackendError::permanent("respond_decision", "unknown task token");
        assert!(!permanent.is_retryable());
        assert_ne!(retryable, permanent);

        let _err: Box<dyn std::error::Error> = Box::new(permanent);
    }

    #[test]
    fn string_errors_are_retryable() {
        let from_str: BackendError = "connection reset".into();
        assert!(from_str.is_retryable());
        assert_eq!(from_str.operation, "unknown");
        assert_eq!(from_str.message, "connection reset");
    }
}
