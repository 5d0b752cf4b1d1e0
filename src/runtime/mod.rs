//! Worker runtime: pollers, task execution, handler registries and the
//! dispatcher loops that tie them to a [`Backend`].
//!
//! ```rust,no_run
//! use duroflow::runtime::registry::{ActivityRegistry, WorkflowRegistry};
//! use duroflow::runtime::{RuntimeOptions, Worker};
//! use duroflow::backend::in_memory::InMemoryBackend;
//! use duroflow::{Arguments, TaskError, WorkflowContext};
//! use serde_json::{Value, json};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let workflows = WorkflowRegistry::builder()
//!     .register("Hello", "1", |_ctx: &mut WorkflowContext<'_>, _args: Arguments| -> Result<Value, TaskError> {
//!         Ok(json!("hi"))
//!     })
//!     .build();
//! let activities = ActivityRegistry::builder().build();
//!
//! let worker = Worker::start(
//!     Arc::new(InMemoryBackend::new()),
//!     workflows,
//!     activities,
//!     RuntimeOptions::default(),
//! )
//! .await;
//! worker.shutdown().await;
//! # }
//! ```

use crate::backend::{Backend, BackendError};
use crate::codec::{Arguments, Codec, JsonCodec};
use crate::context::WorkflowContext;
use crate::outcome::TaskError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

mod dispatchers;
pub mod observability;
pub mod poller;
pub mod registry;
pub mod task;

use observability::{Metrics, MetricsSnapshot};
use poller::{ActivityTask, DecisionTask};
use registry::{ActivityRegistry, WorkflowRegistry};
use task::{ActivityContext, TaskVerdict, WorkflowRun};

/// Configuration options for a [`Worker`] and its pollers.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Task list polled for both decision and activity tasks.
    pub task_list: String,
    /// Attempts per continuation page before the whole poll starts over.
    /// Default: 7
    pub page_retry_budget: u32,
    /// Pause between failed backend polls. Zero retries right away.
    pub poll_error_backoff: Duration,
    /// Worker identity reported in logs.
    pub identity: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            task_list: "default".to_string(),
            page_retry_budget: 7,
            poll_error_backoff: Duration::ZERO,
            identity: format!("duroflow-{}", std::process::id()),
        }
    }
}

/// Trait implemented by workflow code.
///
/// `run` is re-executed from the start on every decision task and must issue
/// its calls in the same order each time.
pub trait WorkflowHandler: Send + Sync {
    fn run(&self, ctx: &mut WorkflowContext<'_>, args: Arguments) -> Result<Value, TaskError>;
}

/// Function wrapper that implements `WorkflowHandler`.
pub struct FnWorkflow<F>(pub F);

impl<F> WorkflowHandler for FnWorkflow<F>
where
    F: Fn(&mut WorkflowContext<'_>, Arguments) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    fn run(&self, ctx: &mut WorkflowContext<'_>, args: Arguments) -> Result<Value, TaskError> {
        (self.0)(ctx, args)
    }
}

/// Trait implemented by activity code.
///
/// Returning [`TaskError::Suspend`] leaves the task open: nothing is
/// reported and the backend waits for an external completion.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, ctx: ActivityContext, args: Arguments) -> Result<Value, TaskError>;
}

/// Function wrapper that implements `ActivityHandler`.
pub struct FnActivity<F>(pub F);

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F>
where
    F: Fn(ActivityContext, Arguments) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn invoke(&self, ctx: ActivityContext, args: Arguments) -> Result<Value, TaskError> {
        (self.0)(ctx, args).await
    }
}

/// Polls one task list and runs the registered workflows and activities.
pub struct Worker {
    backend: Arc<dyn Backend>,
    workflows: WorkflowRegistry,
    activities: ActivityRegistry,
    codec: Arc<dyn Codec>,
    options: RuntimeOptions,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    /// Worker that does not poll on its own. Drive it with
    /// [`Worker::process_decision_task`] and [`Worker::process_activity_task`].
    pub fn new(
        backend: Arc<dyn Backend>,
        workflows: WorkflowRegistry,
        activities: ActivityRegistry,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        Self::with_codec(backend, workflows, activities, options, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        backend: Arc<dyn Backend>,
        workflows: WorkflowRegistry,
        activities: ActivityRegistry,
        options: RuntimeOptions,
        codec: Arc<dyn Codec>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            backend,
            workflows,
            activities,
            codec,
            options,
            metrics: Arc::new(Metrics::default()),
            shutdown_tx,
            joins: Mutex::new(Vec::new()),
        })
    }

    /// Create a worker and spawn its decision and activity loops.
    pub async fn start(
        backend: Arc<dyn Backend>,
        workflows: WorkflowRegistry,
        activities: ActivityRegistry,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        Self::start_with_codec(backend, workflows, activities, options, Arc::new(JsonCodec)).await
    }

    /// Like [`Worker::start`], with every payload going through `codec`.
    pub async fn start_with_codec(
        backend: Arc<dyn Backend>,
        workflows: WorkflowRegistry,
        activities: ActivityRegistry,
        options: RuntimeOptions,
        codec: Arc<dyn Codec>,
    ) -> Arc<Self> {
        let worker = Self::with_codec(backend, workflows, activities, options, codec);
        let decision_loop = worker.clone().start_decision_dispatcher();
        let activity_loop = worker.clone().start_activity_dispatcher();
        worker.joins.lock().await.extend([decision_loop, activity_loop]);
        debug!(target: "duroflow::runtime", identity = %worker.options.identity, task_list = %worker.options.task_list, "worker started");
        worker
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub(crate) fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the dispatcher loops and wait for them to exit.
    pub async fn shutdown(self: Arc<Self>) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<_> = self.joins.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(target: "duroflow::runtime", error = %e, "dispatcher exited abnormally");
            }
        }
    }

    /// Replay one decision task and send the resulting decisions.
    pub async fn process_decision_task(&self, task: DecisionTask) -> Result<TaskVerdict, BackendError> {
        let workflow_type = task.spec.task_type();
        let run = match self.workflows.get(workflow_type) {
            Some(handler) => task::execute_workflow(handler.as_ref(), &task, self.codec.as_ref()),
            None => {
                error!(
                    target: "duroflow::runtime",
                    workflow_id = %task.workflow_id,
                    workflow_type = %workflow_type,
                    "workflow type not registered"
                );
                self.metrics.record_unregistered();
                WorkflowRun::failed(
                    format!("unregistered workflow {workflow_type}"),
                    task.call_state.execution_context(),
                )
            }
        };
        let verdict = run.verdict.clone();
        match task::report_workflow(self.backend.as_ref(), &task.task_token, run).await {
            Ok(()) => {
                self.metrics.record_decision(&verdict);
                Ok(verdict)
            }
            Err(e) => {
                self.metrics.record_report_error();
                Err(e)
            }
        }
    }

    /// Run one activity task and report its verdict.
    pub async fn process_activity_task(&self, task: ActivityTask) -> Result<TaskVerdict, BackendError> {
        let verdict = match self.activities.get(&task.task_type) {
            Some(handler) => task::execute_activity(handler, &task, self.backend.clone(), self.codec.as_ref()).await,
            None => {
                error!(
                    target: "duroflow::runtime",
                    activity_id = %task.activity_id,
                    activity_type = %task.task_type,
                    "activity type not registered"
                );
                self.metrics.record_unregistered();
                TaskVerdict::Fail(format!("unregistered activity {}", task.task_type))
            }
        };
        match task::report_activity(self.backend.as_ref(), &task.task_token, &verdict).await {
            Ok(()) => {
                self.metrics.record_activity(&verdict);
                Ok(verdict)
            }
            Err(e) => {
                self.metrics.record_report_error();
                Err(e)
            }
        }
    }
}
