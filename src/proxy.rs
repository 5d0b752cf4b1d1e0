//! Call proxies: the scheduling protocol behind every activity and child
//! workflow call.
//!
//! A proxy call never blocks. Against the reduced history of the current
//! pass it decides, in this order:
//!
//! 1. a dependency failed or timed out: surface the earliest such error,
//!    either as an outcome (error handling on) or by failing the workflow;
//! 2. a dependency is still pending: return `Pending` without scheduling;
//! 3. the call already has an outcome in history: return it;
//! 4. the call is running: return `Pending`;
//! 5. the call was never seen: schedule it and return `Pending`.

use crate::backend::Decision;
use crate::codec::Arguments;
use crate::context::WorkflowContext;
use crate::history::{CHILD_ID_SEPARATOR, CallStatus, child_workflow_id};
use crate::outcome::{AsyncOutcome, aggregate_errors};
use crate::spec::{ActivityOptions, ActivitySpec, RetryHints, WorkflowOptions, WorkflowSpec};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// One call argument: a plain value or the outcome of an earlier call.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Outcome(AsyncOutcome),
}

impl Arg {
    fn outcome(&self) -> Option<&AsyncOutcome> {
        match self {
            Arg::Value(_) => None,
            Arg::Outcome(outcome) => Some(outcome),
        }
    }

    fn into_value(self) -> Option<Value> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Outcome(AsyncOutcome::Completed { value, .. }) => Some(value),
            Arg::Outcome(_) => None,
        }
    }
}

/// Arguments of a proxy call, possibly depending on earlier calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<Arg>,
    kwargs: Vec<(String, Arg)>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(Arg::Value(value.into()));
        self
    }

    /// Positional argument taken from the outcome of another call.
    pub fn dep(mut self, outcome: &AsyncOutcome) -> Self {
        self.args.push(Arg::Outcome(outcome.clone()));
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.push((name.into(), Arg::Value(value.into())));
        self
    }

    pub fn kwarg_dep(mut self, name: impl Into<String>, outcome: &AsyncOutcome) -> Self {
        self.kwargs.push((name.into(), Arg::Outcome(outcome.clone())));
        self
    }

    /// Dependency outcomes in argument order, keywords last.
    pub fn outcomes(&self) -> impl Iterator<Item = &AsyncOutcome> {
        self.args
            .iter()
            .chain(self.kwargs.iter().map(|(_, arg)| arg))
            .filter_map(Arg::outcome)
    }

    /// Plain arguments, or `None` while a dependency has no value.
    pub fn resolve(self) -> Option<Arguments> {
        let args = self.args.into_iter().map(Arg::into_value).collect::<Option<Vec<_>>>()?;
        let mut kwargs = Map::new();
        for (name, arg) in self.kwargs {
            kwargs.insert(name, arg.into_value()?);
        }
        Some(Arguments { args, kwargs })
    }
}

impl From<Arguments> for CallArgs {
    fn from(arguments: Arguments) -> Self {
        Self {
            args: arguments.args.into_iter().map(Arg::Value).collect(),
            kwargs: arguments
                .kwargs
                .into_iter()
                .map(|(name, value)| (name, Arg::Value(value)))
                .collect(),
        }
    }
}

/// Error that is either handed back to the caller or fails the workflow.
fn surface(ctx: &mut WorkflowContext<'_>, error_handling: bool, outcome: AsyncOutcome) -> AsyncOutcome {
    if error_handling {
        return outcome;
    }
    if let Some(message) = outcome.error_message() {
        ctx.fail(message);
    }
    AsyncOutcome::Pending
}

/// Shared protocol of activity and child workflow calls. `schedule` builds
/// the decision from the encoded input when the call is new.
fn invoke(
    ctx: &mut WorkflowContext<'_>,
    call_id: &str,
    label: fmt::Arguments<'_>,
    error_handling: bool,
    args: CallArgs,
    schedule: impl FnOnce(String) -> Decision,
) -> AsyncOutcome {
    if let Some(error) = aggregate_errors(args.outcomes()) {
        return surface(ctx, error_handling, error);
    }
    if args.outcomes().any(AsyncOutcome::is_pending) {
        return AsyncOutcome::Pending;
    }

    match ctx.call_state().status(call_id) {
        CallStatus::Completed { payload, order } => match ctx.codec().decode_result(payload) {
            Ok(value) => AsyncOutcome::Completed { value, order },
            Err(e) => {
                ctx.fail(format!("{label} call {call_id}: {e}"));
                AsyncOutcome::Pending
            }
        },
        CallStatus::Running => AsyncOutcome::Pending,
        CallStatus::Failed { reason, order } => surface(
            ctx,
            error_handling,
            AsyncOutcome::Failed {
                reason: reason.to_string(),
                order,
            },
        ),
        CallStatus::TimedOut { order } => surface(
            ctx,
            error_handling,
            AsyncOutcome::TimedOut {
                message: format!("{label} has timed-out"),
                order,
            },
        ),
        CallStatus::Unknown => {
            if ctx.is_failed() {
                return AsyncOutcome::Pending;
            }
            // all dependencies completed, so this always resolves
            let Some(arguments) = args.resolve() else {
                return AsyncOutcome::Pending;
            };
            match ctx.codec().encode_args(&arguments) {
                Ok(input) => {
                    debug!(target: "duroflow::proxy", workflow_id = %ctx.workflow_id(), call_id = %call_id, task = %label, "scheduling call");
                    ctx.schedule(schedule(input));
                }
                Err(e) => ctx.fail(format!("{label} call {call_id}: {e}")),
            }
            AsyncOutcome::Pending
        }
    }
}

/// Activity call site: an [`ActivitySpec`] plus per-call retry hints and the
/// error handling toggle.
///
/// With error handling off (the default) a failed or timed-out call fails the
/// whole workflow. With it on, the caller receives the error as an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityProxy {
    spec: ActivitySpec,
    retry: RetryHints,
    error_handling: bool,
}

impl ActivityProxy {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::from_spec(ActivitySpec::new(name, version))
    }

    pub fn from_spec(spec: ActivitySpec) -> Self {
        Self {
            spec,
            retry: RetryHints::default(),
            error_handling: false,
        }
    }

    pub fn spec(&self) -> &ActivitySpec {
        &self.spec
    }

    pub fn retry(&self) -> RetryHints {
        self.retry
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry.retry = retry;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn with_error_handling(mut self, enabled: bool) -> Self {
        self.error_handling = enabled;
        self
    }

    /// Copy of this proxy with `overrides` applied on top of the spec options.
    pub fn with_options(&self, overrides: &ActivityOptions) -> Self {
        Self {
            spec: self.spec.with_options(overrides),
            ..self.clone()
        }
    }

    pub fn call(&self, ctx: &mut WorkflowContext<'_>, args: impl Into<CallArgs>) -> AsyncOutcome {
        let call_id = ctx.next_call_id();
        self.call_with_id(ctx, &call_id, args)
    }

    pub fn call_with_id(&self, ctx: &mut WorkflowContext<'_>, call_id: &str, args: impl Into<CallArgs>) -> AsyncOutcome {
        invoke(
            ctx,
            call_id,
            format_args!("Activity {}", self.spec),
            self.error_handling,
            args.into(),
            |input| Decision::ScheduleActivity {
                call_id: call_id.to_string(),
                activity_type: self.spec.task_type().clone(),
                input,
                options: self.spec.options().clone(),
                retry: self.retry,
            },
        )
    }
}

/// Child workflow call site.
///
/// The child runs under backend id `{workflow_id}-{call_id}`, so call ids of
/// child workflows must not contain `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowProxy {
    spec: WorkflowSpec,
    retry: RetryHints,
    error_handling: bool,
}

impl WorkflowProxy {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::from_spec(WorkflowSpec::new(name, version))
    }

    pub fn from_spec(spec: WorkflowSpec) -> Self {
        Self {
            spec,
            retry: RetryHints::default(),
            error_handling: false,
        }
    }

    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry.retry = retry;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    pub fn with_error_handling(mut self, enabled: bool) -> Self {
        self.error_handling = enabled;
        self
    }

    pub fn with_options(&self, overrides: &WorkflowOptions) -> Self {
        Self {
            spec: self.spec.with_options(overrides),
            ..self.clone()
        }
    }

    pub fn call(&self, ctx: &mut WorkflowContext<'_>, args: impl Into<CallArgs>) -> AsyncOutcome {
        let call_id = ctx.next_call_id();
        self.call_with_id(ctx, &call_id, args)
    }

    pub fn call_with_id(&self, ctx: &mut WorkflowContext<'_>, call_id: &str, args: impl Into<CallArgs>) -> AsyncOutcome {
        if call_id.contains(CHILD_ID_SEPARATOR) {
            ctx.fail(format!(
                "child workflow call id '{call_id}' must not contain '{CHILD_ID_SEPARATOR}'"
            ));
            return AsyncOutcome::Pending;
        }
        let workflow_id = child_workflow_id(ctx.workflow_id(), call_id);
        invoke(
            ctx,
            call_id,
            format_args!("Workflow {}", self.spec),
            self.error_handling,
            args.into(),
            |input| Decision::ScheduleChildWorkflow {
                call_id: call_id.to_string(),
                workflow_id,
                workflow_type: self.spec.task_type().clone(),
                input,
                options: self.spec.options().clone(),
                retry: self.retry,
            },
        )
    }
}
