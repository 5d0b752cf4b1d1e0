//! Decision dispatcher: poll, replay, respond, until shutdown.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::super::Worker;
use super::super::poller::DecisionPoller;

impl Worker {
    pub(in crate::runtime) fn start_decision_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown_signal();
        let poller = DecisionPoller::new(self.backend(), self.options()).with_metrics(self.metrics());

        tokio::spawn(async move {
            tracing::debug!(target: "duroflow::runtime", identity = %self.options().identity, "decision dispatcher started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let polled = tokio::select! {
                    _ = shutdown.changed() => break,
                    polled = poller.poll_next() => polled,
                };
                let task = match polled {
                    Ok(task) => task,
                    // logged by the poller; the task is abandoned
                    Err(_) => continue,
                };

                let workflow_id = task.workflow_id.clone();
                let task_token = task.task_token.clone();
                match self.process_decision_task(task).await {
                    Ok(verdict) => {
                        tracing::debug!(
                            target: "duroflow::runtime",
                            workflow_id = %workflow_id,
                            verdict = ?verdict,
                            "decision task answered"
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "duroflow::runtime",
                            workflow_id = %workflow_id,
                            task_token = %task_token,
                            error = %e,
                            "failed to respond to decision task"
                        );
                    }
                }
            }
            tracing::debug!(target: "duroflow::runtime", "decision dispatcher exited");
        })
    }
}
