//! Duroflow: a history-replay workflow decision engine.
//!
//! Workflow logic is ordinary sequential Rust. Every time the backend hands
//! out a decision task, the workflow function is re-run from the top against
//! the reduced history of its execution: calls whose outcome is already known
//! return immediately, the first unresolved one suspends the pass, and every
//! new call made before that point is sent back as a scheduling decision.
//!
//! The pieces, leaves first:
//!
//! - [`AsyncOutcome`]: the four-state value handed to workflow code in place
//!   of a call's real result.
//! - [`history`]: history events and the [`history::Reducer`] that folds
//!   them into a [`CallState`].
//! - [`runtime::poller`]: paginated decision polling and activity polling.
//! - [`proxy`]: the per-call scheduling protocol behind [`ActivityProxy`] and
//!   [`WorkflowProxy`].
//! - [`runtime::task`]: runs user code once per task and maps its exit to a
//!   [`TaskVerdict`].
//!
//! # Example
//!
//! ```rust,no_run
//! use duroflow::{ActivityProxy, ActivitySpec, Arguments, CallArgs, TaskError, WorkflowContext};
//! use serde_json::Value;
//!
//! fn primes(ctx: &mut WorkflowContext<'_>, args: Arguments) -> Result<Value, TaskError> {
//!     let limit: u64 = args.get(0)?;
//!     let count = ActivityProxy::new("CountPrimes", "1");
//!     let double = ActivityProxy::new("Double", "1");
//!
//!     let n = count.call(ctx, CallArgs::new().arg(limit));
//!     // Pending `n` keeps `Double` from being scheduled this pass.
//!     let doubled = double.call(ctx, CallArgs::new().dep(&n));
//!     Ok(doubled.result()?.clone())
//! }
//!
//! # let _ = ActivitySpec::new("CountPrimes", "1");
//! # let _ = primes;
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod backend;
pub mod codec;
pub mod context;
pub mod history;
pub mod outcome;
pub mod proxy;
pub mod runtime;
pub mod spec;

pub use codec::{Arguments, Codec, JsonCodec};
pub use context::WorkflowContext;
pub use history::{CallState, CallStatus, EventKind, HistoryEvent};
pub use outcome::{AsyncOutcome, TaskError, aggregate_errors};
pub use proxy::{ActivityProxy, Arg, CallArgs, WorkflowProxy};
pub use runtime::task::{ActivityContext, TaskVerdict};
pub use runtime::{RuntimeOptions, Worker};
pub use spec::{ActivityOptions, ActivitySpec, RetryHints, WorkflowOptions, WorkflowSpec};

/// Name and version identifying a workflow or activity type.
///
/// Versions are opaque strings; the backend treats every version as a
/// distinct type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct TaskType {
    pub name: String,
    pub version: String,
}

impl TaskType {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
