// Not every test binary uses every helper.
#![allow(dead_code)]

pub mod fault_injection;
pub mod log_capture;

use duroflow::backend::Decision;
use duroflow::backend::in_memory::Response;
use duroflow::{EventKind, HistoryEvent, TaskType};

/// Builds histories the way a backend would number them.
pub struct HistoryBuilder {
    events: Vec<HistoryEvent>,
    next_id: u64,
}

impl HistoryBuilder {
    /// History opening with the execution start event of `workflow_type`.
    pub fn started(workflow_type: TaskType, input: &str) -> Self {
        Self::tagged(workflow_type, input, &[])
    }

    /// Like [`HistoryBuilder::started`], with a tag list on the start event.
    pub fn tagged(workflow_type: TaskType, input: &str, tags: &[&str]) -> Self {
        let mut builder = Self {
            events: Vec::new(),
            next_id: 1,
        };
        builder.push(EventKind::WorkflowExecutionStarted {
            workflow_type,
            input: input.to_string(),
            tag_list: tags.iter().map(|t| t.to_string()).collect(),
            task_list: "default".to_string(),
            task_start_to_close_timeout: None,
            execution_start_to_close_timeout: None,
        });
        builder
    }

    /// Append an event and return its id.
    pub fn push(&mut self, kind: EventKind) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;
        self.events.push(HistoryEvent::new(event_id, kind));
        event_id
    }

    pub fn activity_scheduled(&mut self, call_id: &str, activity_type: TaskType) -> u64 {
        self.push(EventKind::ActivityTaskScheduled {
            activity_id: call_id.to_string(),
            activity_type,
            input: "[[],{}]".to_string(),
        })
    }

    pub fn activity_completed(&mut self, scheduled_event_id: u64, result: &str) -> u64 {
        self.push(EventKind::ActivityTaskCompleted {
            scheduled_event_id,
            result: result.to_string(),
        })
    }

    pub fn activity_failed(&mut self, scheduled_event_id: u64, reason: &str) -> u64 {
        self.push(EventKind::ActivityTaskFailed {
            scheduled_event_id,
            reason: reason.to_string(),
        })
    }

    pub fn decision_completed(&mut self, execution_context: Option<&str>) -> u64 {
        self.push(EventKind::DecisionTaskScheduled);
        self.push(EventKind::DecisionTaskStarted);
        self.push(EventKind::DecisionTaskCompleted {
            execution_context: execution_context.map(str::to_string),
        })
    }

    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events.clone()
    }
}

/// Decisions of the only decision response, panicking on anything else.
pub fn single_decision(responses: &[Response]) -> (Vec<Decision>, Option<String>) {
    match responses {
        [Response::Decision {
            decisions,
            execution_context,
            ..
        }] => (decisions.clone(), execution_context.clone()),
        other => panic!("expected one decision response, got {other:?}"),
    }
}

/// Call ids of the scheduling decisions, in order.
pub fn scheduled_ids(decisions: &[Decision]) -> Vec<String> {
    decisions
        .iter()
        .filter(|d| !d.is_terminal())
        .filter_map(|d| d.call_id().map(str::to_string))
        .collect()
}
