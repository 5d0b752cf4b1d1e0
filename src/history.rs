//! Workflow history events and their reduction into a [`CallState`].
//!
//! History is the backend's ordered, append-only log for one workflow
//! execution. The [`Reducer`] folds it in a single forward pass into the set
//! of calls that are still running, timed out, completed or failed.

use crate::TaskType;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// Separator between the parent workflow id and the call id in the backend
/// id of a child workflow.
pub const CHILD_ID_SEPARATOR: char = '-';

/// Backend-visible id of the child workflow started for `call_id`.
pub fn child_workflow_id(parent_workflow_id: &str, call_id: &str) -> String {
    format!("{parent_workflow_id}{CHILD_ID_SEPARATOR}{call_id}")
}

/// Recover the call id from a child workflow id by dropping everything up to
/// the last separator.
pub fn child_call_id(workflow_id: &str) -> &str {
    workflow_id.rsplit(CHILD_ID_SEPARATOR).next().unwrap_or(workflow_id)
}

/// One immutable history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Monotonically increasing sequence id assigned by the backend.
    pub event_id: u64,
    pub kind: EventKind,
}

impl HistoryEvent {
    pub fn new(event_id: u64, kind: EventKind) -> Self {
        Self { event_id, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventKind {
    /// Always the first event of an execution.
    WorkflowExecutionStarted {
        workflow_type: TaskType,
        input: String,
        #[serde(default)]
        tag_list: Vec<String>,
        task_list: String,
        task_start_to_close_timeout: Option<Duration>,
        execution_start_to_close_timeout: Option<Duration>,
    },
    DecisionTaskScheduled,
    DecisionTaskStarted,
    DecisionTaskCompleted {
        execution_context: Option<String>,
    },

    ActivityTaskScheduled {
        activity_id: String,
        activity_type: TaskType,
        input: String,
    },
    ActivityTaskCompleted {
        scheduled_event_id: u64,
        result: String,
    },
    ActivityTaskFailed {
        scheduled_event_id: u64,
        reason: String,
    },
    ActivityTaskTimedOut {
        scheduled_event_id: u64,
    },
    /// The backend refused to schedule the activity (e.g. unknown type).
    ScheduleActivityTaskFailed {
        activity_id: String,
        cause: String,
    },

    StartChildWorkflowExecutionInitiated {
        workflow_id: String,
        workflow_type: TaskType,
    },
    ChildWorkflowExecutionStarted {
        workflow_id: String,
    },
    ChildWorkflowExecutionCompleted {
        workflow_id: String,
        result: String,
    },
    ChildWorkflowExecutionFailed {
        workflow_id: String,
        reason: String,
    },
    ChildWorkflowExecutionTimedOut {
        workflow_id: String,
    },
    StartChildWorkflowExecutionFailed {
        workflow_id: String,
        cause: String,
    },

    TimerStarted {
        timer_id: String,
    },
    TimerFired {
        timer_id: String,
    },

    /// Any event type the reducer does not care about.
    #[serde(other)]
    Other,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::WorkflowExecutionStarted { .. } => "WorkflowExecutionStarted",
            EventKind::DecisionTaskScheduled => "DecisionTaskScheduled",
            EventKind::DecisionTaskStarted => "DecisionTaskStarted",
            EventKind::DecisionTaskCompleted { .. } => "DecisionTaskCompleted",
            EventKind::ActivityTaskScheduled { .. } => "ActivityTaskScheduled",
            EventKind::ActivityTaskCompleted { .. } => "ActivityTaskCompleted",
            EventKind::ActivityTaskFailed { .. } => "ActivityTaskFailed",
            EventKind::ActivityTaskTimedOut { .. } => "ActivityTaskTimedOut",
            EventKind::ScheduleActivityTaskFailed { .. } => "ScheduleActivityTaskFailed",
            EventKind::StartChildWorkflowExecutionInitiated { .. } => "StartChildWorkflowExecutionInitiated",
            EventKind::ChildWorkflowExecutionStarted { .. } => "ChildWorkflowExecutionStarted",
            EventKind::ChildWorkflowExecutionCompleted { .. } => "ChildWorkflowExecutionCompleted",
            EventKind::ChildWorkflowExecutionFailed { .. } => "ChildWorkflowExecutionFailed",
            EventKind::ChildWorkflowExecutionTimedOut { .. } => "ChildWorkflowExecutionTimedOut",
            EventKind::StartChildWorkflowExecutionFailed { .. } => "StartChildWorkflowExecutionFailed",
            EventKind::TimerStarted { .. } => "TimerStarted",
            EventKind::TimerFired { .. } => "TimerFired",
            EventKind::Other => "Other",
        }
    }
}

/// Where a single call stands in the reduced history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus<'a> {
    /// Never seen: the call has to be scheduled.
    Unknown,
    Running,
    Completed { payload: &'a str, order: u64 },
    Failed { reason: &'a str, order: u64 },
    TimedOut { order: u64 },
}

/// Reduced view of a history at one point in time.
///
/// Every call id seen in the history sits in exactly one of the four
/// collections. Rebuilt from scratch on every decision task and never
/// mutated while workflow code runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallState {
    running: BTreeSet<String>,
    timed_out: BTreeSet<String>,
    results: BTreeMap<String, String>,
    errors: BTreeMap<String, String>,
    // event id that settled each finished call
    orders: HashMap<String, u64>,
    execution_context: Option<String>,
}

impl CallState {
    pub fn running(&self) -> &BTreeSet<String> {
        &self.running
    }

    pub fn timed_out(&self) -> &BTreeSet<String> {
        &self.timed_out
    }

    /// Serialized results by call id. Fired timers carry `"null"`.
    pub fn results(&self) -> &BTreeMap<String, String> {
        &self.results
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Context blob stored by the most recent completed decision, if any.
    pub fn execution_context(&self) -> Option<&str> {
        self.execution_context.as_deref()
    }

    pub fn status(&self, call_id: &str) -> CallStatus<'_> {
        let order = || self.orders.get(call_id).copied().unwrap_or_default();
        if let Some(payload) = self.results.get(call_id) {
            CallStatus::Completed { payload, order: order() }
        } else if self.running.contains(call_id) {
            CallStatus::Running
        } else if let Some(reason) = self.errors.get(call_id) {
            CallStatus::Failed { reason, order: order() }
        } else if self.timed_out.contains(call_id) {
            CallStatus::TimedOut { order: order() }
        } else {
            CallStatus::Unknown
        }
    }

    /// Number of distinct call ids known to the history.
    pub fn len(&self) -> usize {
        self.running.len() + self.timed_out.len() + self.results.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&mut self, call_id: &str) {
        self.running.remove(call_id);
        self.timed_out.remove(call_id);
        self.results.remove(call_id);
        self.errors.remove(call_id);
        self.orders.remove(call_id);
    }

    fn start(&mut self, call_id: String) {
        self.forget(&call_id);
        self.running.insert(call_id);
    }

    fn finish(&mut self, call_id: &str, event_id: u64) -> Result<(), ReduceError> {
        if !self.running.remove(call_id) {
            return Err(ReduceError::NotRunning {
                event_id,
                call_id: call_id.to_string(),
            });
        }
        self.orders.insert(call_id.to_string(), event_id);
        Ok(())
    }
}

/// History that cannot be reconciled with the calls it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    UnknownScheduledEvent { event_id: u64, scheduled_event_id: u64 },
    NotRunning { event_id: u64, call_id: String },
}

impl fmt::Display for ReduceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceError::UnknownScheduledEvent {
                event_id,
                scheduled_event_id,
            } => write!(
                f,
                "event {event_id} references unknown scheduled event {scheduled_event_id}"
            ),
            ReduceError::NotRunning { event_id, call_id } => {
                write!(f, "event {event_id} settles call '{call_id}' which is not running")
            }
        }
    }
}

impl std::error::Error for ReduceError {}

/// Incremental single-pass history reducer.
///
/// Completion events of activities point at their scheduling event rather
/// than at the call id, so the reducer remembers which call every scheduling
/// event belongs to.
#[derive(Debug, Default)]
pub struct Reducer {
    state: CallState,
    scheduled: HashMap<u64, String>,
}

impl Reducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &HistoryEvent) -> Result<(), ReduceError> {
        let event_id = event.event_id;
        match &event.kind {
            EventKind::ActivityTaskScheduled { activity_id, .. } => {
                self.scheduled.insert(event_id, activity_id.clone());
                self.state.start(activity_id.clone());
            }
            EventKind::ActivityTaskCompleted {
                scheduled_event_id,
                result,
            } => {
                let id = self.scheduled_call(event_id, *scheduled_event_id)?;
                self.state.finish(&id, event_id)?;
                self.state.results.insert(id, result.clone());
            }
            EventKind::ActivityTaskFailed {
                scheduled_event_id,
                reason,
            } => {
                let id = self.scheduled_call(event_id, *scheduled_event_id)?;
                self.state.finish(&id, event_id)?;
                self.state.errors.insert(id, reason.clone());
            }
            EventKind::ActivityTaskTimedOut { scheduled_event_id } => {
                let id = self.scheduled_call(event_id, *scheduled_event_id)?;
                self.state.finish(&id, event_id)?;
                self.state.timed_out.insert(id);
            }
            EventKind::ScheduleActivityTaskFailed { activity_id, cause } => {
                // never started, so it never was running
                self.fail_unstarted(activity_id.clone(), cause, event_id);
            }
            EventKind::StartChildWorkflowExecutionInitiated { workflow_id, .. } => {
                self.state.start(child_call_id(workflow_id).to_string());
            }
            EventKind::ChildWorkflowExecutionCompleted { workflow_id, result } => {
                let id = child_call_id(workflow_id);
                self.state.finish(id, event_id)?;
                self.state.results.insert(id.to_string(), result.clone());
            }
            EventKind::ChildWorkflowExecutionFailed { workflow_id, reason } => {
                let id = child_call_id(workflow_id);
                self.state.finish(id, event_id)?;
                self.state.errors.insert(id.to_string(), reason.clone());
            }
            EventKind::ChildWorkflowExecutionTimedOut { workflow_id } => {
                let id = child_call_id(workflow_id);
                self.state.finish(id, event_id)?;
                self.state.timed_out.insert(id.to_string());
            }
            EventKind::StartChildWorkflowExecutionFailed { workflow_id, cause } => {
                self.fail_unstarted(child_call_id(workflow_id).to_string(), cause, event_id);
            }
            EventKind::TimerStarted { timer_id } => {
                self.state.start(timer_id.clone());
            }
            EventKind::TimerFired { timer_id } => {
                self.state.finish(timer_id, event_id)?;
                self.state.results.insert(timer_id.clone(), "null".to_string());
            }
            EventKind::DecisionTaskCompleted { execution_context } => {
                if execution_context.is_some() {
                    self.state.execution_context = execution_context.clone();
                }
            }
            EventKind::WorkflowExecutionStarted { .. }
            | EventKind::DecisionTaskScheduled
            | EventKind::DecisionTaskStarted
            | EventKind::ChildWorkflowExecutionStarted { .. }
            | EventKind::Other => {}
        }
        Ok(())
    }

    pub fn finish(self) -> CallState {
        self.state
    }

    fn scheduled_call(&self, event_id: u64, scheduled_event_id: u64) -> Result<String, ReduceError> {
        self.scheduled
            .get(&scheduled_event_id)
            .cloned()
            .ok_or(ReduceError::UnknownScheduledEvent {
                event_id,
                scheduled_event_id,
            })
    }

    fn fail_unstarted(&mut self, call_id: String, cause: &str, event_id: u64) {
        self.state.forget(&call_id);
        self.state.orders.insert(call_id.clone(), event_id);
        self.state.errors.insert(call_id, cause.to_string());
    }
}

/// Reduce a complete event sequence in one pass.
pub fn reduce<I>(events: I) -> Result<CallState, ReduceError>
where
    I: IntoIterator,
    I::Item: Borrow<HistoryEvent>,
{
    let mut reducer = Reducer::new();
    for event in events {
        reducer.apply(event.borrow())?;
    }
    Ok(reducer.finish())
}
