//! Per-pass workflow context.
//!
//! A [`WorkflowContext`] is created for one replay pass over one decision
//! task. It gives proxies read access to the reduced history and collects the
//! decisions the pass produces. Nothing in it outlives the pass except what
//! the runtime copies into the decision response.

use crate::backend::Decision;
use crate::codec::{Arguments, Codec};
use crate::history::{CallState, CallStatus};
use crate::outcome::{AsyncOutcome, TaskError};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub struct WorkflowContext<'a> {
    workflow_id: &'a str,
    call_state: &'a CallState,
    codec: &'a dyn Codec,
    tags: &'a [String],
    decisions: Vec<Decision>,
    failure: Option<String>,
    next_call: u64,
    execution_context: Option<String>,
}

impl<'a> WorkflowContext<'a> {
    pub fn new(workflow_id: &'a str, call_state: &'a CallState, codec: &'a dyn Codec) -> Self {
        Self {
            workflow_id,
            call_state,
            codec,
            tags: &[],
            decisions: Vec::new(),
            failure: None,
            next_call: 0,
            execution_context: call_state.execution_context().map(str::to_string),
        }
    }

    /// Attach the tag list the execution was started with.
    pub fn with_tags(mut self, tags: &'a [String]) -> Self {
        self.tags = tags;
        self
    }

    pub fn workflow_id(&self) -> &'a str {
        self.workflow_id
    }

    /// Tags from the execution start event, empty when none were set.
    pub fn tags(&self) -> &'a [String] {
        self.tags
    }

    /// Reduced history this pass replays against.
    pub fn call_state(&self) -> &'a CallState {
        self.call_state
    }

    pub fn codec(&self) -> &'a dyn Codec {
        self.codec
    }

    /// Next implicit call id: `"0"`, `"1"`, ... in call order.
    ///
    /// Ids only stay stable across passes if the workflow issues its calls in
    /// the same order every time.
    pub fn next_call_id(&mut self) -> String {
        let id = self.next_call.to_string();
        self.next_call += 1;
        id
    }

    /// Mark the workflow as failed. The first reason recorded wins; later
    /// scheduling requests in this pass are dropped.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        match &self.failure {
            Some(existing) => {
                debug!(target: "duroflow::context", workflow_id = %self.workflow_id, first = %existing, ignored = %reason, "workflow already failed");
            }
            None => {
                debug!(target: "duroflow::context", workflow_id = %self.workflow_id, reason = %reason, "workflow marked failed");
                self.failure = Some(reason);
            }
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Decisions collected so far in this pass.
    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub(crate) fn schedule(&mut self, decision: Decision) {
        if self.is_failed() {
            debug!(target: "duroflow::context", workflow_id = %self.workflow_id, call_id = ?decision.call_id(), "dropping decision of failed workflow");
            return;
        }
        self.decisions.push(decision);
    }

    /// Context blob stored with the previous decision, or the value set
    /// earlier in this pass.
    pub fn execution_context(&self) -> Option<&str> {
        self.execution_context.as_deref()
    }

    pub fn set_execution_context(&mut self, context: impl Into<String>) {
        self.execution_context = Some(context.into());
    }

    /// Durable timer under the next implicit call id.
    pub fn sleep(&mut self, delay: Duration) -> AsyncOutcome {
        let timer_id = self.next_call_id();
        self.sleep_with_id(&timer_id, delay)
    }

    /// Durable timer. Completes with `null` once the timer fired.
    pub fn sleep_with_id(&mut self, timer_id: &str, delay: Duration) -> AsyncOutcome {
        match self.call_state.status(timer_id) {
            CallStatus::Completed { order, .. } => AsyncOutcome::Completed {
                value: Value::Null,
                order,
            },
            CallStatus::Running => AsyncOutcome::Pending,
            CallStatus::Failed { reason, order } => AsyncOutcome::Failed {
                reason: reason.to_string(),
                order,
            },
            CallStatus::TimedOut { order } => AsyncOutcome::TimedOut {
                message: format!("Timer {timer_id} has timed-out"),
                order,
            },
            CallStatus::Unknown => {
                self.schedule(Decision::StartTimer {
                    timer_id: timer_id.to_string(),
                    delay,
                });
                AsyncOutcome::Pending
            }
        }
    }

    /// Ask the backend to close this execution and start a fresh one with
    /// `args`. Propagate the returned error with `?`.
    pub fn restart<T>(&self, args: &Arguments) -> Result<T, TaskError> {
        let input = self.codec.encode_args(args)?;
        Err(TaskError::Restart(input))
    }

    pub(crate) fn into_parts(self) -> (Vec<Decision>, Option<String>, Option<String>) {
        (self.decisions, self.failure, self.execution_context)
    }
}
