//! Interface to the workflow orchestration backend.
//!
//! The engine only consumes a backend: it polls for decision and activity
//! tasks, reads paginated history, and answers with decisions or activity
//! results. Queueing, durability and leasing live behind [`Backend`].

use crate::TaskType;
use crate::history::HistoryEvent;
use crate::spec::{ActivityOptions, RetryHints, WorkflowOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod error;
pub use error::BackendError;

/// In-memory backend for tests and local runs.
pub mod in_memory;

/// One page of a decision task as returned by a poll.
///
/// An empty `task_token` means there is nothing to do yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPage {
    pub task_token: String,
    pub workflow_id: String,
    pub workflow_type: TaskType,
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<String>,
}

impl DecisionPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_task(&self) -> bool {
        !self.task_token.is_empty()
    }
}

/// Result of an activity poll. An empty `task_token` means no work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPoll {
    pub task_token: String,
    pub activity_id: String,
    pub activity_type: TaskType,
    pub input: String,
}

impl ActivityPoll {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_task(&self) -> bool {
        !self.task_token.is_empty()
    }
}

/// Orchestration action sent back in answer to a decision task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    ScheduleActivity {
        call_id: String,
        activity_type: TaskType,
        input: String,
        options: ActivityOptions,
        retry: RetryHints,
    },
    ScheduleChildWorkflow {
        call_id: String,
        /// Backend id of the child, `{parent}-{call_id}`.
        workflow_id: String,
        workflow_type: TaskType,
        input: String,
        options: WorkflowOptions,
        retry: RetryHints,
    },
    StartTimer {
        timer_id: String,
        delay: Duration,
    },
    CompleteWorkflow {
        result: String,
    },
    FailWorkflow {
        reason: String,
    },
    /// Close this execution and start a new one with `input`.
    RestartWorkflow {
        input: String,
    },
}

impl Decision {
    /// Call id of a scheduling decision, `None` for terminal ones.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Decision::ScheduleActivity { call_id, .. } | Decision::ScheduleChildWorkflow { call_id, .. } => {
                Some(call_id)
            }
            Decision::StartTimer { timer_id, .. } => Some(timer_id),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Decision::CompleteWorkflow { .. } | Decision::FailWorkflow { .. } | Decision::RestartWorkflow { .. }
        )
    }
}

/// Operations the engine needs from an orchestration backend.
///
/// Poll calls may long-poll; returning an empty task is "nothing to do",
/// never an error.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// First page of the next decision task for `task_list`.
    async fn poll_decision_task(&self, task_list: &str) -> Result<DecisionPage, BackendError>;

    /// Continuation page of the current decision task.
    async fn poll_decision_task_page(&self, task_list: &str, page_token: &str) -> Result<DecisionPage, BackendError>;

    async fn poll_activity_task(&self, task_list: &str) -> Result<ActivityPoll, BackendError>;

    /// Answer a decision task. `execution_context` is stored verbatim and
    /// handed back in the next `DecisionTaskCompleted` event.
    async fn respond_decision(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    ) -> Result<(), BackendError>;

    async fn complete_activity(&self, task_token: &str, result: String) -> Result<(), BackendError>;

    async fn fail_activity(&self, task_token: &str, reason: String) -> Result<(), BackendError>;

    /// Signal that a long-running activity attempt is still alive.
    async fn heartbeat_activity(&self, task_token: &str) -> Result<(), BackendError>;
}
