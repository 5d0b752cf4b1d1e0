//! Fault-injecting backend for poller tests.
//!
//! Wraps an [`InMemoryBackend`] and fails a scripted number of calls before
//! delegating, while counting every call that reached it.

use async_trait::async_trait;
use duroflow::backend::in_memory::InMemoryBackend;
use duroflow::backend::{ActivityPoll, Backend, BackendError, Decision, DecisionPage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct FaultInjectingBackend {
    inner: Arc<InMemoryBackend>,
    /// Continuation page fetches that still have to fail
    failing_page_fetches: AtomicU32,
    /// Whether injected page failures are permanent instead of retryable
    permanent_page_failures: AtomicBool,
    /// First-page polls that still have to fail
    failing_decision_polls: AtomicU32,
    decision_polls: AtomicU32,
    page_fetches: AtomicU32,
}

impl FaultInjectingBackend {
    pub fn new(inner: Arc<InMemoryBackend>) -> Self {
        Self {
            inner,
            failing_page_fetches: AtomicU32::new(0),
            permanent_page_failures: AtomicBool::new(false),
            failing_decision_polls: AtomicU32::new(0),
            decision_polls: AtomicU32::new(0),
            page_fetches: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryBackend> {
        &self.inner
    }

    /// Fail the next `n` continuation page fetches with a retryable error.
    pub fn fail_next_page_fetches(&self, n: u32) {
        self.permanent_page_failures.store(false, Ordering::SeqCst);
        self.failing_page_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_page_fetches_permanently(&self, n: u32) {
        self.permanent_page_failures.store(true, Ordering::SeqCst);
        self.failing_page_fetches.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_decision_polls(&self, n: u32) {
        self.failing_decision_polls.store(n, Ordering::SeqCst);
    }

    pub fn decision_polls(&self) -> u32 {
        self.decision_polls.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> u32 {
        self.page_fetches.load(Ordering::SeqCst)
    }
}

/// Consume one unit of an injection budget; true when this call must fail.
fn take_one(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Backend for FaultInjectingBackend {
    async fn poll_decision_task(&self, task_list: &str) -> Result<DecisionPage, BackendError> {
        self.decision_polls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_decision_polls) {
            return Err(BackendError::retryable("poll_decision_task", "injected: throttled"));
        }
        self.inner.poll_decision_task(task_list).await
    }

    async fn poll_decision_task_page(&self, task_list: &str, page_token: &str) -> Result<DecisionPage, BackendError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failing_page_fetches) {
            return Err(if self.permanent_page_failures.load(Ordering::SeqCst) {
                BackendError::permanent("poll_decision_task_page", "injected: page expired")
            } else {
                BackendError::retryable("poll_decision_task_page", "injected: connection reset")
            });
        }
        self.inner.poll_decision_task_page(task_list, page_token).await
    }

    async fn poll_activity_task(&self, task_list: &str) -> Result<ActivityPoll, BackendError> {
        self.inner.poll_activity_task(task_list).await
    }

    async fn respond_decision(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    ) -> Result<(), BackendError> {
        self.inner.respond_decision(task_token, decisions, execution_context).await
    }

    async fn complete_activity(&self, task_token: &str, result: String) -> Result<(), BackendError> {
        self.inner.complete_activity(task_token, result).await
    }

    async fn fail_activity(&self, task_token: &str, reason: String) -> Result<(), BackendError> {
        self.inner.fail_activity(task_token, reason).await
    }

    async fn heartbeat_activity(&self, task_token: &str) -> Result<(), BackendError> {
        self.inner.heartbeat_activity(task_token).await
    }
}
