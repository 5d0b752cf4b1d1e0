//! Decision and activity pollers.
//!
//! The decision poller blocks until the backend hands out a decision task,
//! follows the page tokens of its history, and reduces the events into a
//! [`CallState`]. A continuation page that keeps failing abandons the whole
//! task and starts over from the first-page poll, so the reducer never sees
//! a truncated history.

use super::RuntimeOptions;
use super::observability::Metrics;
use crate::TaskType;
use crate::backend::{Backend, BackendError, DecisionPage};
use crate::history::{CallState, EventKind, HistoryEvent, Reducer};
use crate::spec::{WorkflowOptions, WorkflowSpec};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Everything needed to replay one workflow pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionTask {
    pub task_token: String,
    pub workflow_id: String,
    /// Identity and execution options from the start event.
    pub spec: WorkflowSpec,
    pub input: String,
    pub tags: Vec<String>,
    pub call_state: CallState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityTask {
    pub task_token: String,
    pub activity_id: String,
    pub task_type: TaskType,
    pub input: String,
}

/// Poll failure that is not retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The backend broke its contract, e.g. a history that does not begin
    /// with the execution start event.
    ContractViolation(String),
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::ContractViolation(msg) => write!(f, "backend contract violation: {msg}"),
        }
    }
}

impl std::error::Error for PollError {}

/// A continuation page could not be fetched within the retry budget.
#[derive(Debug)]
struct PaginationFailure {
    page_token: String,
    attempts: u32,
    last_error: BackendError,
}

enum AssembleError {
    Pagination(PaginationFailure),
    Contract(String),
}

impl From<PaginationFailure> for AssembleError {
    fn from(failure: PaginationFailure) -> Self {
        AssembleError::Pagination(failure)
    }
}

async fn backoff(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

pub struct DecisionPoller {
    backend: Arc<dyn Backend>,
    task_list: String,
    page_retry_budget: u32,
    poll_error_backoff: Duration,
    metrics: Arc<Metrics>,
}

impl DecisionPoller {
    pub fn new(backend: Arc<dyn Backend>, options: &RuntimeOptions) -> Self {
        Self {
            backend,
            task_list: options.task_list.clone(),
            page_retry_budget: options.page_retry_budget.max(1),
            poll_error_backoff: options.poll_error_backoff,
            metrics: Arc::new(Metrics::default()),
        }
    }

    pub(crate) fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Times a poll was abandoned and restarted because of a page failure.
    pub fn pagination_restarts(&self) -> u64 {
        self.metrics.snapshot().pagination_restarts
    }

    /// Next decision task with its complete history reduced.
    ///
    /// # Errors
    ///
    /// Only [`PollError::ContractViolation`]. Transient backend errors and
    /// pagination failures are retried internally.
    pub async fn poll_next(&self) -> Result<DecisionTask, PollError> {
        loop {
            let first = self.poll_first_page().await;
            let task_token = first.task_token.clone();
            match self.assemble(first).await {
                Ok(task) => return Ok(task),
                Err(AssembleError::Pagination(failure)) => {
                    warn!(
                        target: "duroflow::poller",
                        task_token = %task_token,
                        page_token = %failure.page_token,
                        attempts = failure.attempts,
                        error = %failure.last_error,
                        "history pagination failed, restarting poll"
                    );
                    self.metrics.record_pagination_restart();
                }
                Err(AssembleError::Contract(msg)) => {
                    error!(target: "duroflow::poller", task_token = %task_token, error = %msg, "backend contract violation");
                    self.metrics.record_contract_violation();
                    return Err(PollError::ContractViolation(msg));
                }
            }
        }
    }

    /// Never gives up: an empty task or a failed call just means "try again".
    async fn poll_first_page(&self) -> DecisionPage {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.backend.poll_decision_task(&self.task_list).await {
                Ok(page) if page.has_task() => return page,
                Ok(_) => {
                    trace!(target: "duroflow::poller", task_list = %self.task_list, "no decision task");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(target: "duroflow::poller", task_list = %self.task_list, attempt, error = %e, "decision poll failed");
                    backoff(self.poll_error_backoff).await;
                }
            }
        }
    }

    async fn fetch_page(&self, page_token: &str) -> Result<DecisionPage, PaginationFailure> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.backend.poll_decision_task_page(&self.task_list, page_token).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    debug!(target: "duroflow::poller", page_token = %page_token, attempt = attempts, error = %e, "history page fetch failed");
                    if !e.is_retryable() || attempts >= self.page_retry_budget {
                        return Err(PaginationFailure {
                            page_token: page_token.to_string(),
                            attempts,
                            last_error: e,
                        });
                    }
                    backoff(self.poll_error_backoff).await;
                }
            }
        }
    }

    async fn assemble(&self, first: DecisionPage) -> Result<DecisionTask, AssembleError> {
        let DecisionPage {
            task_token,
            workflow_id,
            events,
            next_page_token,
            ..
        } = first;
        let mut history = HistoryPages {
            poller: self,
            current: events.into_iter(),
            next_page_token,
        };

        let start = history
            .next_event()
            .await?
            .ok_or_else(|| AssembleError::Contract(format!("decision task {task_token} has an empty history")))?;
        let (start_id, start_name) = (start.event_id, start.kind.name());
        let EventKind::WorkflowExecutionStarted {
            workflow_type,
            input,
            tag_list,
            task_list,
            task_start_to_close_timeout,
            execution_start_to_close_timeout,
        } = start.kind
        else {
            return Err(AssembleError::Contract(format!(
                "first event {start_id} is {start_name}, expected WorkflowExecutionStarted"
            )));
        };

        let mut reducer = Reducer::new();
        let mut count = 1usize;
        while let Some(event) = history.next_event().await? {
            reducer
                .apply(&event)
                .map_err(|e| AssembleError::Contract(e.to_string()))?;
            count += 1;
        }
        debug!(target: "duroflow::poller", workflow_id = %workflow_id, workflow_type = %workflow_type, events = count, "decision task assembled");

        let options = WorkflowOptions {
            task_list: (!task_list.is_empty()).then_some(task_list),
            decision_duration: task_start_to_close_timeout,
            workflow_duration: execution_start_to_close_timeout,
        };
        Ok(DecisionTask {
            task_token,
            workflow_id,
            spec: WorkflowSpec::from_parts(workflow_type, options),
            input,
            tags: tag_list,
            call_state: reducer.finish(),
        })
    }
}

/// History of one decision task as a single lazy event sequence. The next
/// page is only fetched once the current one is drained.
struct HistoryPages<'p> {
    poller: &'p DecisionPoller,
    current: std::vec::IntoIter<HistoryEvent>,
    next_page_token: Option<String>,
}

impl HistoryPages<'_> {
    async fn next_event(&mut self) -> Result<Option<HistoryEvent>, PaginationFailure> {
        loop {
            if let Some(event) = self.current.next() {
                return Ok(Some(event));
            }
            let Some(page_token) = self.next_page_token.take() else {
                return Ok(None);
            };
            let page = self.poller.fetch_page(&page_token).await?;
            self.current = page.events.into_iter();
            self.next_page_token = page.next_page_token;
        }
    }
}

pub struct ActivityPoller {
    backend: Arc<dyn Backend>,
    task_list: String,
    poll_error_backoff: Duration,
}

impl ActivityPoller {
    pub fn new(backend: Arc<dyn Backend>, options: &RuntimeOptions) -> Self {
        Self {
            backend,
            task_list: options.task_list.clone(),
            poll_error_backoff: options.poll_error_backoff,
        }
    }

    /// Next activity task. Retries until one arrives.
    pub async fn poll_next(&self) -> ActivityTask {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.backend.poll_activity_task(&self.task_list).await {
                Ok(poll) if poll.has_task() => {
                    return ActivityTask {
                        task_token: poll.task_token,
                        activity_id: poll.activity_id,
                        task_type: poll.activity_type,
                        input: poll.input,
                    };
                }
                Ok(_) => {
                    trace!(target: "duroflow::poller", task_list = %self.task_list, "no activity task");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(target: "duroflow::poller", task_list = %self.task_list, attempt, error = %e, "activity poll failed");
                    backoff(self.poll_error_backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_memory::InMemoryBackend;

    fn start_event() -> HistoryEvent {
        HistoryEvent::new(
            1,
            EventKind::WorkflowExecutionStarted {
                workflow_type: TaskType::new("Report", "2"),
                input: "[[1],{}]".to_string(),
                tag_list: vec!["nightly".to_string()],
                task_list: "reports".to_string(),
                task_start_to_close_timeout: Some(Duration::from_secs(10)),
                execution_start_to_close_timeout: None,
            },
        )
    }

    fn options() -> RuntimeOptions {
        RuntimeOptions {
            task_list: "reports".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_event_fills_in_the_task() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .push_decision_task("wf-1", TaskType::new("Report", "2"), vec![start_event()])
            .await;
        let poller = DecisionPoller::new(backend, &options());
        let task = poller.poll_next().await.unwrap();
        assert_eq!(task.workflow_id, "wf-1");
        assert_eq!(task.spec.to_string(), "Report@2");
        assert_eq!(task.spec.options().task_list.as_deref(), Some("reports"));
        assert_eq!(task.spec.options().decision_duration, Some(Duration::from_secs(10)));
        assert_eq!(task.tags, vec!["nightly".to_string()]);
        assert_eq!(task.input, "[[1],{}]");
        assert!(task.call_state.is_empty());
    }

    #[tokio::test]
    async fn wrong_first_event_is_a_contract_violation() {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .push_decision_task(
                "wf-1",
                TaskType::new("Report", "2"),
                vec![HistoryEvent::new(1, EventKind::DecisionTaskScheduled)],
            )
            .await;
        let poller = DecisionPoller::new(backend, &options());
        match poller.poll_next().await {
            Err(PollError::ContractViolation(msg)) => assert!(msg.contains("DecisionTaskScheduled")),
            other => panic!("expected contract violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn activity_poller_skips_empty_polls() {
        let backend = Arc::new(InMemoryBackend::new().with_idle_wait(Duration::ZERO));
        let poller = ActivityPoller::new(backend.clone(), &options());
        let pushed = tokio::spawn({
            let backend = backend.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                backend.push_activity_task("7", TaskType::new("Render", "1"), "[[],{}]").await
            }
        });
        let task = poller.poll_next().await;
        assert_eq!(task.task_token, pushed.await.unwrap());
        assert_eq!(task.activity_id, "7");
    }
}
