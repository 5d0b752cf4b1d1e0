use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{ActivityPoll, Backend, BackendError, Decision, DecisionPage};
use crate::TaskType;
use crate::history::HistoryEvent;

/// Everything a worker sent back, in the order it was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Decision {
        task_token: String,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    },
    ActivityCompleted {
        task_token: String,
        result: String,
    },
    ActivityFailed {
        task_token: String,
        reason: String,
    },
    Heartbeat {
        task_token: String,
    },
}

impl Response {
    pub fn task_token(&self) -> &str {
        match self {
            Response::Decision { task_token, .. }
            | Response::ActivityCompleted { task_token, .. }
            | Response::ActivityFailed { task_token, .. }
            | Response::Heartbeat { task_token } => task_token,
        }
    }
}

/// Scripted backend: tests push decision and activity tasks, workers poll
/// them, and every answer is recorded for inspection.
///
/// Histories are split into pages of `page_size` events so the pagination
/// path of the poller is exercised. Polling an empty queue waits
/// `idle_wait` and returns an empty task, like a long poll timing out.
///
/// A handed out task holds a lease of `task_lease`. Answering it ends the
/// lease; a task nobody answers in time is dropped along with its pages, and
/// later answers to it are rejected.
pub struct InMemoryBackend {
    page_size: usize,
    idle_wait: Duration,
    task_lease: Duration,
    next_token: AtomicU64,
    decision_q: Mutex<VecDeque<DecisionPage>>,
    // continuation pages by page token
    pages: Mutex<HashMap<String, DecisionPage>>,
    activity_q: Mutex<VecDeque<ActivityPoll>>,
    // lease deadline of every token handed out and not answered yet
    outstanding: Mutex<HashMap<String, Instant>>,
    responses: Mutex<Vec<Response>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            idle_wait: Duration::from_millis(10),
            task_lease: Duration::from_secs(60),
            next_token: AtomicU64::new(1),
            decision_q: Mutex::new(VecDeque::new()),
            pages: Mutex::new(HashMap::new()),
            activity_q: Mutex::new(VecDeque::new()),
            outstanding: Mutex::new(HashMap::new()),
            responses: Mutex::new(Vec::new()),
        }
    }

    /// Events per history page. Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    pub fn with_task_lease(mut self, task_lease: Duration) -> Self {
        self.task_lease = task_lease;
        self
    }

    fn token(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a decision task carrying `events` and return its task token.
    pub async fn push_decision_task(
        &self,
        workflow_id: impl Into<String>,
        workflow_type: TaskType,
        events: Vec<HistoryEvent>,
    ) -> String {
        let task_token = self.token("decision");
        let workflow_id = workflow_id.into();

        let chunks: Vec<Vec<HistoryEvent>> = if events.is_empty() {
            vec![Vec::new()]
        } else {
            events.chunks(self.page_size).map(<[HistoryEvent]>::to_vec).collect()
        };
        let last = chunks.len() - 1;

        let mut pages = self.pages.lock().await;
        let mut first = None;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let page = DecisionPage {
                task_token: task_token.clone(),
                workflow_id: workflow_id.clone(),
                workflow_type: workflow_type.clone(),
                events: chunk,
                next_page_token: (index < last).then(|| page_token(&task_token, index + 1)),
            };
            if index == 0 {
                first = Some(page);
            } else {
                pages.insert(page_token(&task_token, index), page);
            }
        }
        drop(pages);

        if let Some(page) = first {
            self.decision_q.lock().await.push_back(page);
        }
        task_token
    }

    /// Queue an activity task and return its task token.
    pub async fn push_activity_task(
        &self,
        activity_id: impl Into<String>,
        activity_type: TaskType,
        input: impl Into<String>,
    ) -> String {
        let task_token = self.token("activity");
        self.activity_q.lock().await.push_back(ActivityPoll {
            task_token: task_token.clone(),
            activity_id: activity_id.into(),
            activity_type,
            input: input.into(),
        });
        task_token
    }

    pub async fn responses(&self) -> Vec<Response> {
        self.responses.lock().await.clone()
    }

    /// Wait until at least `count` responses were recorded or `timeout`
    /// elapsed, then return what is there.
    pub async fn wait_for_responses(&self, count: usize, timeout: Duration) -> Vec<Response> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let responses = self.responses().await;
            if responses.len() >= count || tokio::time::Instant::now() >= deadline {
                return responses;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Tasks handed out and neither answered nor expired.
    pub async fn open_tasks(&self) -> usize {
        self.outstanding.lock().await.len()
    }

    /// Continuation pages still held for queued or open decision tasks.
    pub async fn stored_pages(&self) -> usize {
        self.pages.lock().await.len()
    }

    async fn lease(&self, task_token: &str) {
        let deadline = Instant::now() + self.task_lease;
        self.outstanding.lock().await.insert(task_token.to_string(), deadline);
    }

    /// Forget every task whose lease ran out.
    async fn expire_leases(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut outstanding = self.outstanding.lock().await;
            let expired = outstanding
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(token, _)| token.clone())
                .collect::<Vec<_>>();
            for token in &expired {
                outstanding.remove(token);
            }
            expired
        };
        for token in expired {
            debug!(target: "duroflow::backend", task_token = %token, "task lease expired");
            self.drop_pages(&token).await;
        }
    }

    async fn drop_pages(&self, task_token: &str) {
        let prefix = page_token_prefix(task_token);
        self.pages.lock().await.retain(|key, _| !key.starts_with(&prefix));
    }

    async fn settle(&self, operation: &str, task_token: &str, response: Response) -> Result<(), BackendError> {
        let deadline = self.outstanding.lock().await.remove(task_token);
        self.drop_pages(task_token).await;
        match deadline {
            None => Err(BackendError::permanent(operation, format!("unknown task token {task_token}"))),
            Some(deadline) if deadline <= Instant::now() => {
                Err(BackendError::permanent(operation, format!("task token {task_token} expired")))
            }
            Some(_) => {
                self.responses.lock().await.push(response);
                Ok(())
            }
        }
    }
}

fn page_token_prefix(task_token: &str) -> String {
    format!("{task_token}#")
}

fn page_token(task_token: &str, index: usize) -> String {
    format!("{}{index}", page_token_prefix(task_token))
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    async fn poll_decision_task(&self, _task_list: &str) -> Result<DecisionPage, BackendError> {
        self.expire_leases().await;
        let next = self.decision_q.lock().await.pop_front();
        match next {
            Some(page) => {
                self.lease(&page.task_token).await;
                Ok(page)
            }
            None => {
                tokio::time::sleep(self.idle_wait).await;
                Ok(DecisionPage::empty())
            }
        }
    }

    async fn poll_decision_task_page(&self, _task_list: &str, page_token: &str) -> Result<DecisionPage, BackendError> {
        self.pages
            .lock()
            .await
            .get(page_token)
            .cloned()
            .ok_or_else(|| BackendError::permanent("poll_decision_task_page", format!("unknown page token {page_token}")))
    }

    async fn poll_activity_task(&self, _task_list: &str) -> Result<ActivityPoll, BackendError> {
        self.expire_leases().await;
        let next = self.activity_q.lock().await.pop_front();
        match next {
            Some(task) => {
                self.lease(&task.task_token).await;
                Ok(task)
            }
            None => {
                tokio::time::sleep(self.idle_wait).await;
                Ok(ActivityPoll::empty())
            }
        }
    }

    async fn respond_decision(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        execution_context: Option<String>,
    ) -> Result<(), BackendError> {
        self.settle(
            "respond_decision",
            task_token,
            Response::Decision {
                task_token: task_token.to_string(),
                decisions,
                execution_context,
            },
        )
        .await
    }

    async fn complete_activity(&self, task_token: &str, result: String) -> Result<(), BackendError> {
        self.settle(
            "complete_activity",
            task_token,
            Response::ActivityCompleted {
                task_token: task_token.to_string(),
                result,
            },
        )
        .await
    }

    async fn fail_activity(&self, task_token: &str, reason: String) -> Result<(), BackendError> {
        self.settle(
            "fail_activity",
            task_token,
            Response::ActivityFailed {
                task_token: task_token.to_string(),
                reason,
            },
        )
        .await
    }

    async fn heartbeat_activity(&self, task_token: &str) -> Result<(), BackendError> {
        let now = Instant::now();
        match self.outstanding.lock().await.get_mut(task_token) {
            Some(deadline) if *deadline > now => *deadline = now + self.task_lease,
            _ => {
                return Err(BackendError::permanent(
                    "heartbeat_activity",
                    format!("unknown task token {task_token}"),
                ));
            }
        }
        self.responses.lock().await.push(Response::Heartbeat {
            task_token: task_token.to_string(),
        });
        Ok(())
    }
}
