mod common;

use common::HistoryBuilder;
use common::log_capture::LogCapture;
use duroflow::backend::in_memory::InMemoryBackend;
use duroflow::runtime::observability::{LogFormat, ObservabilityConfig};
use duroflow::runtime::poller::DecisionPoller;
use duroflow::runtime::registry::{ActivityRegistry, WorkflowRegistry};
use duroflow::runtime::{RuntimeOptions, Worker};
use duroflow::{ActivityProxy, Arguments, CallArgs, TaskError, TaskType, WorkflowContext};
use serde_json::Value;
use std::sync::Arc;
use tracing::Level;

fn fragile(ctx: &mut WorkflowContext<'_>, _args: Arguments) -> Result<Value, TaskError> {
    ActivityProxy::new("Fetch", "1").call(ctx, CallArgs::new()).into_result()
}

async fn run_once(workflow_type: TaskType, history: HistoryBuilder) -> Arc<Worker> {
    let backend = Arc::new(InMemoryBackend::new());
    backend.push_decision_task("wf-obs", workflow_type, history.events()).await;
    let worker = Worker::new(
        backend.clone(),
        WorkflowRegistry::builder().register("Fragile", "1", fragile).build(),
        ActivityRegistry::builder().build(),
        RuntimeOptions::default(),
    );
    let task = DecisionPoller::new(backend, worker.options()).poll_next().await.unwrap();
    worker.process_decision_task(task).await.unwrap();
    worker
}

#[tokio::test]
async fn workflow_failure_is_logged_with_its_reason() {
    let logs = LogCapture::install();
    let fragile_type = TaskType::new("Fragile", "1");
    let mut h = HistoryBuilder::started(fragile_type.clone(), "[[],{}]");
    let fetch = h.activity_scheduled("0", TaskType::new("Fetch", "1"));
    h.activity_failed(fetch, "upstream 503");
    run_once(fragile_type, h).await;

    let errors = logs.at(Level::ERROR, "duroflow::runtime");
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].message, "workflow failed");
    assert_eq!(errors[0].field("reason"), Some("upstream 503"));
    assert_eq!(errors[0].field("workflow_id"), Some("wf-obs"));
    assert_eq!(errors[0].field("workflow_type"), Some("Fragile@1"));
}

#[tokio::test]
async fn suspended_pass_logs_nothing_above_debug() {
    let logs = LogCapture::install();
    let fragile_type = TaskType::new("Fragile", "1");
    run_once(fragile_type.clone(), HistoryBuilder::started(fragile_type, "[[],{}]")).await;

    let loud = logs.at_least(Level::INFO);
    assert!(loud.is_empty(), "{loud:?}");
    let scheduling = logs.at(Level::DEBUG, "duroflow::proxy");
    assert_eq!(scheduling.len(), 1);
    assert_eq!(scheduling[0].field("call_id"), Some("0"));
}

#[tokio::test]
async fn unregistered_workflow_is_logged_and_counted() {
    let logs = LogCapture::install();
    let missing = TaskType::new("Missing", "3");
    let worker = run_once(missing.clone(), HistoryBuilder::started(missing, "[[],{}]")).await;

    let errors = logs.at(Level::ERROR, "duroflow::runtime");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "workflow type not registered");
    assert_eq!(errors[0].field("workflow_type"), Some("Missing@3"));
    assert_eq!(worker.metrics_snapshot().unregistered_tasks, 1);
}

#[test]
fn default_config_is_pretty_at_info() {
    let config = ObservabilityConfig::default();
    assert_eq!(config.log_format, LogFormat::Pretty);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.service_name, "duroflow");
}
