//! Identity and default execution options of activities and workflows.
//!
//! Specs are immutable values. Per-call changes go through the `with_*`
//! builders or [`ActivityOptions::overlay`], which return a new value and
//! leave the original untouched.

use crate::TaskType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Zero means "not set" for every timeout.
fn positive(d: Duration) -> Option<Duration> {
    if d.is_zero() { None } else { Some(d) }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Per-call activity options. `None` leaves the backend default in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub task_list: Option<String>,
    pub heartbeat: Option<Duration>,
    pub schedule_to_close: Option<Duration>,
    pub schedule_to_start: Option<Duration>,
    pub start_to_close: Option<Duration>,
}

impl ActivityOptions {
    /// Options where every field set in `overrides` replaces the one in `self`.
    pub fn overlay(&self, overrides: &ActivityOptions) -> ActivityOptions {
        ActivityOptions {
            task_list: overrides.task_list.clone().or_else(|| self.task_list.clone()),
            heartbeat: overrides.heartbeat.or(self.heartbeat),
            schedule_to_close: overrides.schedule_to_close.or(self.schedule_to_close),
            schedule_to_start: overrides.schedule_to_start.or(self.schedule_to_start),
            start_to_close: overrides.start_to_close.or(self.start_to_close),
        }
    }
}

/// Per-call child workflow options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    pub task_list: Option<String>,
    /// Decision task start-to-close timeout.
    pub decision_duration: Option<Duration>,
    /// Execution start-to-close timeout.
    pub workflow_duration: Option<Duration>,
}

impl WorkflowOptions {
    pub fn overlay(&self, overrides: &WorkflowOptions) -> WorkflowOptions {
        WorkflowOptions {
            task_list: overrides.task_list.clone().or_else(|| self.task_list.clone()),
            decision_duration: overrides.decision_duration.or(self.decision_duration),
            workflow_duration: overrides.workflow_duration.or(self.workflow_duration),
        }
    }
}

/// Retry hints forwarded with a scheduling request. The backend enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryHints {
    pub retry: u32,
    pub delay: Duration,
}

impl Default for RetryHints {
    fn default() -> Self {
        Self {
            retry: 3,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySpec {
    task_type: TaskType,
    options: ActivityOptions,
}

impl ActivitySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::new(name, version),
            options: ActivityOptions::default(),
        }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    pub fn with_options(&self, overrides: &ActivityOptions) -> Self {
        Self {
            task_type: self.task_type.clone(),
            options: self.options.overlay(overrides),
        }
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.options.task_list = non_empty(task_list.into());
        self
    }

    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.options.heartbeat = positive(timeout);
        self
    }

    pub fn with_schedule_to_close(mut self, timeout: Duration) -> Self {
        self.options.schedule_to_close = positive(timeout);
        self
    }

    pub fn with_schedule_to_start(mut self, timeout: Duration) -> Self {
        self.options.schedule_to_start = positive(timeout);
        self
    }

    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.options.start_to_close = positive(timeout);
        self
    }
}

impl fmt::Display for ActivitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSpec {
    task_type: TaskType,
    options: WorkflowOptions,
}

impl WorkflowSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            task_type: TaskType::new(name, version),
            options: WorkflowOptions::default(),
        }
    }

    pub(crate) fn from_parts(task_type: TaskType, options: WorkflowOptions) -> Self {
        Self { task_type, options }
    }

    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn with_options(&self, overrides: &WorkflowOptions) -> Self {
        Self {
            task_type: self.task_type.clone(),
            options: self.options.overlay(overrides),
        }
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.options.task_list = non_empty(task_list.into());
        self
    }

    pub fn with_decision_duration(mut self, timeout: Duration) -> Self {
        self.options.decision_duration = positive(timeout);
        self
    }

    pub fn with_workflow_duration(mut self, timeout: Duration) -> Self {
        self.options.workflow_duration = positive(timeout);
        self
    }
}

impl fmt::Display for WorkflowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.task_type)
    }
}
