//! Activity dispatcher: poll, run, report, until shutdown.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::super::Worker;
use super::super::poller::ActivityPoller;

impl Worker {
    pub(in crate::runtime) fn start_activity_dispatcher(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown = self.shutdown_signal();
        let poller = ActivityPoller::new(self.backend(), self.options());

        tokio::spawn(async move {
            tracing::debug!(target: "duroflow::runtime", identity = %self.options().identity, "activity dispatcher started");
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let task = tokio::select! {
                    _ = shutdown.changed() => break,
                    task = poller.poll_next() => task,
                };

                let activity_id = task.activity_id.clone();
                let activity_type = task.task_type.clone();
                let start_time = std::time::Instant::now();
                match self.process_activity_task(task).await {
                    Ok(verdict) => {
                        tracing::debug!(
                            target: "duroflow::runtime",
                            activity_id = %activity_id,
                            activity_type = %activity_type,
                            verdict = ?verdict,
                            duration_ms = %start_time.elapsed().as_millis(),
                            "activity task finished"
                        );
                    }
                    Err(e) => {
                        warn!(
                            target: "duroflow::runtime",
                            activity_id = %activity_id,
                            error = %e,
                            "failed to report activity result"
                        );
                    }
                }
            }
            tracing::debug!(target: "duroflow::runtime", "activity dispatcher exited");
        })
    }
}
