//! Dispatcher loops for [`Worker`](super::Worker)
//!
//! - `decision`: polls decision tasks and replays workflows
//! - `activity`: polls activity tasks and runs activities

mod activity;
mod decision;
