//! Values handed to workflow code in place of a call's real result.
//!
//! A call made through a proxy never blocks. It returns an [`AsyncOutcome`]
//! describing what the history says about that call so far. Reading the
//! value of a `Pending` outcome yields [`TaskError::Suspend`], which user
//! code propagates with `?` back to the task runtime.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Four-state result of a scheduled call as seen during one replay pass.
///
/// `order` is the id of the history event that settled the call. Lower means
/// earlier, which makes it possible to name "the" cause when several
/// dependencies fail in the same pass.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncOutcome {
    /// No outcome yet; using the value suspends the pass.
    Pending,
    Completed { value: Value, order: u64 },
    Failed { reason: String, order: u64 },
    TimedOut { message: String, order: u64 },
}

impl AsyncOutcome {
    /// Sort key of the outcome. `Pending` sorts after everything else.
    pub fn priority(&self) -> u64 {
        match self {
            AsyncOutcome::Pending => u64::MAX,
            AsyncOutcome::Completed { order, .. }
            | AsyncOutcome::Failed { order, .. }
            | AsyncOutcome::TimedOut { order, .. } => *order,
        }
    }

    /// Total order over outcomes by the history position that settled them.
    pub fn cmp_priority(&self, other: &AsyncOutcome) -> Ordering {
        self.priority().cmp(&other.priority())
    }

    pub fn order(&self) -> Option<u64> {
        match self {
            AsyncOutcome::Pending => None,
            other => Some(other.priority()),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AsyncOutcome::Pending)
    }

    /// True for `Failed` and `TimedOut`.
    pub fn is_error(&self) -> bool {
        matches!(self, AsyncOutcome::Failed { .. } | AsyncOutcome::TimedOut { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            AsyncOutcome::Failed { reason, .. } => Some(reason),
            AsyncOutcome::TimedOut { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Borrow the completed value.
    ///
    /// # Errors
    ///
    /// `Suspend` when pending, `Failed`/`TimedOut` carrying the message otherwise.
    pub fn result(&self) -> Result<&Value, TaskError> {
        match self {
            AsyncOutcome::Pending => Err(TaskError::Suspend),
            AsyncOutcome::Completed { value, .. } => Ok(value),
            AsyncOutcome::Failed { reason, .. } => Err(TaskError::Failed(reason.clone())),
            AsyncOutcome::TimedOut { message, .. } => Err(TaskError::TimedOut(message.clone())),
        }
    }

    pub fn into_result(self) -> Result<Value, TaskError> {
        match self {
            AsyncOutcome::Pending => Err(TaskError::Suspend),
            AsyncOutcome::Completed { value, .. } => Ok(value),
            AsyncOutcome::Failed { reason, .. } => Err(TaskError::Failed(reason)),
            AsyncOutcome::TimedOut { message, .. } => Err(TaskError::TimedOut(message)),
        }
    }

    /// Decode the completed value into a concrete type.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        let value = self.result()?;
        Ok(T::deserialize(value)?)
    }
}

/// Fold the failed and timed-out outcomes of `outcomes` into one.
///
/// The earliest error (smallest `order`) decides the variant and order of the
/// result; the messages of all errors are joined with newlines in iteration
/// order. Returns `None` when nothing failed.
pub fn aggregate_errors<'a, I>(outcomes: I) -> Option<AsyncOutcome>
where
    I: IntoIterator<Item = &'a AsyncOutcome>,
{
    let errors: Vec<&AsyncOutcome> = outcomes.into_iter().filter(|o| o.is_error()).collect();
    let earliest = errors.iter().copied().min_by(|a, b| a.cmp_priority(b))?;
    let message = errors
        .iter()
        .filter_map(|e| e.error_message())
        .collect::<Vec<_>>()
        .join("\n");
    let order = earliest.priority();
    Some(match earliest {
        AsyncOutcome::TimedOut { .. } => AsyncOutcome::TimedOut { message, order },
        _ => AsyncOutcome::Failed { reason: message, order },
    })
}

/// Error type flowing out of workflow and activity code.
///
/// `Suspend` and `Restart` are control signals, not failures: the task
/// runtime turns them into a suspend verdict and a restart decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A needed outcome is not known yet.
    Suspend,
    /// A call failed and error handling was enabled for it.
    Failed(String),
    /// A call timed out and error handling was enabled for it.
    TimedOut(String),
    /// The workflow asked to start over with the given serialized input.
    Restart(String),
    /// Any other failure raised by user code.
    Other(String),
}

impl TaskError {
    pub fn is_suspend(&self) -> bool {
        matches!(self, TaskError::Suspend)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Suspend => write!(f, "task suspended"),
            TaskError::Failed(reason) => write!(f, "{reason}"),
            TaskError::TimedOut(message) => write!(f, "{message}"),
            TaskError::Restart(_) => write!(f, "workflow restart requested"),
            TaskError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::Other(e.to_string())
    }
}

impl From<String> for TaskError {
    fn from(s: String) -> Self {
        TaskError::Other(s)
    }
}

impl From<&str> for TaskError {
    fn from(s: &str) -> Self {
        TaskError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed(reason: &str, order: u64) -> AsyncOutcome {
        AsyncOutcome::Failed {
            reason: reason.to_string(),
            order,
        }
    }

    #[test]
    fn earliest_error_wins_regardless_of_position() {
        let outcomes = [failed("five", 5), failed("two", 2), failed("nine", 9)];
        let agg = aggregate_errors(&outcomes).unwrap();
        assert_eq!(agg.order(), Some(2));
        assert_eq!(agg.error_message(), Some("five\ntwo\nnine"));
    }

    #[test]
    fn timeout_as_earliest_cause_keeps_its_kind() {
        let outcomes = [
            failed("boom", 7),
            AsyncOutcome::TimedOut {
                message: "A task has timed-out".to_string(),
                order: 3,
            },
        ];
        match aggregate_errors(&outcomes).unwrap() {
            AsyncOutcome::TimedOut { order, message } => {
                assert_eq!(order, 3);
                assert_eq!(message, "boom\nA task has timed-out");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn no_errors_means_no_aggregate() {
        let outcomes = [
            AsyncOutcome::Pending,
            AsyncOutcome::Completed {
                value: json!(1),
                order: 1,
            },
        ];
        assert!(aggregate_errors(&outcomes).is_none());
    }

    #[test]
    fn pending_sorts_last() {
        let done = AsyncOutcome::Completed {
            value: json!(null),
            order: 1_000_000,
        };
        assert_eq!(done.cmp_priority(&AsyncOutcome::Pending), Ordering::Less);
        assert_eq!(AsyncOutcome::Pending.order(), None);
    }

    #[test]
    fn result_maps_each_state() {
        assert_eq!(AsyncOutcome::Pending.result(), Err(TaskError::Suspend));
        assert_eq!(failed("x", 1).result(), Err(TaskError::Failed("x".into())));
        let done = AsyncOutcome::Completed {
            value: json!([1, 2]),
            order: 4,
        };
        let v: Vec<u32> = done.result_as().unwrap();
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn decode_failure_is_an_ordinary_error() {
        let done = AsyncOutcome::Completed {
            value: json!("text"),
            order: 4,
        };
        let err = done.result_as::<u32>().unwrap_err();
        assert!(matches!(err, TaskError::Other(_)));
    }
}
