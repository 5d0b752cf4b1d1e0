//! Task runtime: runs user code once per delivered task and maps the way it
//! exits to a [`TaskVerdict`].

use super::poller::{ActivityTask, DecisionTask};
use super::{ActivityHandler, WorkflowHandler};
use crate::TaskType;
use crate::backend::{Backend, BackendError, Decision};
use crate::codec::Codec;
use crate::context::WorkflowContext;
use crate::outcome::TaskError;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

/// What a task run tells the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskVerdict {
    /// Returned normally; carries the encoded result.
    Complete(String),
    /// Waiting on an outcome that is not known yet. Decisions already
    /// collected still go out.
    Suspend,
    Fail(String),
    /// Workflow asked to continue as a new execution with this input.
    Restart(String),
}

/// Outcome of one workflow replay pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    pub verdict: TaskVerdict,
    /// Scheduling decisions collected during the pass.
    pub decisions: Vec<Decision>,
    pub execution_context: Option<String>,
}

impl WorkflowRun {
    pub(crate) fn failed(reason: String, execution_context: Option<&str>) -> Self {
        Self {
            verdict: TaskVerdict::Fail(reason),
            decisions: Vec::new(),
            execution_context: execution_context.map(str::to_string),
        }
    }

    /// Decisions to send for this pass.
    ///
    /// A failing or restarting workflow sends only its terminal decision. A
    /// completing one keeps the calls it scheduled on the way.
    pub fn into_decisions(self) -> (Vec<Decision>, Option<String>) {
        let decisions = match self.verdict {
            TaskVerdict::Complete(result) => {
                let mut decisions = self.decisions;
                decisions.push(Decision::CompleteWorkflow { result });
                decisions
            }
            TaskVerdict::Suspend => self.decisions,
            TaskVerdict::Fail(reason) => vec![Decision::FailWorkflow { reason }],
            TaskVerdict::Restart(input) => vec![Decision::RestartWorkflow { input }],
        };
        (decisions, self.execution_context)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Replay `task` against `handler` once.
pub fn execute_workflow(handler: &dyn WorkflowHandler, task: &DecisionTask, codec: &dyn Codec) -> WorkflowRun {
    let args = match codec.decode_args(&task.input) {
        Ok(args) => args,
        Err(e) => {
            error!(target: "duroflow::runtime", workflow_id = %task.workflow_id, error = %e, "workflow input rejected");
            return WorkflowRun::failed(e, task.call_state.execution_context());
        }
    };

    let mut ctx = WorkflowContext::new(&task.workflow_id, &task.call_state, codec).with_tags(&task.tags);
    let returned = catch_unwind(AssertUnwindSafe(|| handler.run(&mut ctx, args)));
    let (decisions, failure, execution_context) = ctx.into_parts();

    let verdict = match (failure, returned) {
        // a failure recorded through the context wins over how the code exited
        (Some(reason), _) => TaskVerdict::Fail(reason),
        (None, Ok(Ok(value))) => match codec.encode_result(&value) {
            Ok(result) => TaskVerdict::Complete(result),
            Err(e) => TaskVerdict::Fail(e),
        },
        (None, Ok(Err(TaskError::Suspend))) => TaskVerdict::Suspend,
        (None, Ok(Err(TaskError::Restart(input)))) => TaskVerdict::Restart(input),
        (None, Ok(Err(e))) => TaskVerdict::Fail(e.to_string()),
        (None, Err(payload)) => TaskVerdict::Fail(panic_message(payload)),
    };

    match &verdict {
        TaskVerdict::Fail(reason) => {
            error!(target: "duroflow::runtime", workflow_id = %task.workflow_id, workflow_type = %task.spec, reason = %reason, "workflow failed");
        }
        other => {
            debug!(target: "duroflow::runtime", workflow_id = %task.workflow_id, verdict = ?other, scheduled = decisions.len(), "workflow pass finished");
        }
    }

    WorkflowRun {
        verdict,
        decisions,
        execution_context,
    }
}

/// Send the decisions of a replay pass. The execution context goes back
/// verbatim when the pass did not change it.
pub async fn report_workflow(backend: &dyn Backend, task_token: &str, run: WorkflowRun) -> Result<(), BackendError> {
    let (decisions, execution_context) = run.into_decisions();
    backend.respond_decision(task_token, decisions, execution_context).await
}

/// Handle given to activity code for the duration of one attempt.
#[derive(Clone)]
pub struct ActivityContext {
    task_token: String,
    activity_id: String,
    activity_type: TaskType,
    backend: Arc<dyn Backend>,
}

impl ActivityContext {
    pub fn new(
        task_token: impl Into<String>,
        activity_id: impl Into<String>,
        activity_type: TaskType,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            task_token: task_token.into(),
            activity_id: activity_id.into(),
            activity_type,
            backend,
        }
    }

    pub fn task_token(&self) -> &str {
        &self.task_token
    }

    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    pub fn activity_type(&self) -> &TaskType {
        &self.activity_type
    }

    /// Tell the backend this attempt is still alive.
    pub async fn heartbeat(&self) -> Result<(), BackendError> {
        debug!(target: "duroflow::activity", activity_id = %self.activity_id, "heartbeat");
        self.backend.heartbeat_activity(&self.task_token).await
    }
}

impl std::fmt::Debug for ActivityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityContext")
            .field("task_token", &self.task_token)
            .field("activity_id", &self.activity_id)
            .field("activity_type", &self.activity_type)
            .finish_non_exhaustive()
    }
}

/// Run one activity attempt on its own tokio task so a panic stays contained.
pub async fn execute_activity(
    handler: Arc<dyn ActivityHandler>,
    task: &ActivityTask,
    backend: Arc<dyn Backend>,
    codec: &dyn Codec,
) -> TaskVerdict {
    let args = match codec.decode_args(&task.input) {
        Ok(args) => args,
        Err(e) => {
            error!(target: "duroflow::activity", activity_id = %task.activity_id, error = %e, "activity input rejected");
            return TaskVerdict::Fail(e);
        }
    };

    let ctx = ActivityContext::new(&task.task_token, &task.activity_id, task.task_type.clone(), backend);
    let joined = tokio::spawn(async move { handler.invoke(ctx, args).await }).await;

    let verdict = match joined {
        Ok(Ok(value)) => match codec.encode_result(&value) {
            Ok(result) => TaskVerdict::Complete(result),
            Err(e) => TaskVerdict::Fail(e),
        },
        Ok(Err(TaskError::Suspend)) => TaskVerdict::Suspend,
        Ok(Err(TaskError::Restart(_))) => TaskVerdict::Fail("activities cannot restart".to_string()),
        Ok(Err(e)) => TaskVerdict::Fail(e.to_string()),
        Err(e) if e.is_panic() => TaskVerdict::Fail(panic_message(e.into_panic())),
        Err(e) => TaskVerdict::Fail(e.to_string()),
    };

    if let TaskVerdict::Fail(reason) = &verdict {
        error!(target: "duroflow::activity", activity_id = %task.activity_id, activity_type = %task.task_type, reason = %reason, "activity failed");
    }
    verdict
}

/// Report an activity verdict. A suspended activity reports nothing.
pub async fn report_activity(backend: &dyn Backend, task_token: &str, verdict: &TaskVerdict) -> Result<(), BackendError> {
    match verdict {
        TaskVerdict::Complete(result) => backend.complete_activity(task_token, result.clone()).await,
        TaskVerdict::Fail(reason) | TaskVerdict::Restart(reason) => backend.fail_activity(task_token, reason.clone()).await,
        TaskVerdict::Suspend => Ok(()),
    }
}
