//! Registry of workflow and activity handlers keyed by name and version.
//!
//! Every `(name, version)` pair is a distinct type, the same way the backend
//! sees it. Registrations go through a builder that records duplicates as
//! errors instead of silently replacing the earlier handler.

use super::task::ActivityContext;
use super::{ActivityHandler, FnActivity, FnWorkflow, WorkflowHandler};
use crate::TaskType;
use crate::codec::Arguments;
use crate::context::WorkflowContext;
use crate::outcome::TaskError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Registry<H: ?Sized> {
    inner: Arc<HashMap<TaskType, Arc<H>>>,
}

// Manual Clone impl since H: ?Sized doesn't auto-derive Clone
impl<H: ?Sized> Clone for Registry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }
}

pub struct RegistryBuilder<H: ?Sized> {
    map: HashMap<TaskType, Arc<H>>,
    errors: Vec<String>,
}

pub type WorkflowRegistry = Registry<dyn WorkflowHandler>;
pub type ActivityRegistry = Registry<dyn ActivityHandler>;
pub type WorkflowRegistryBuilder = RegistryBuilder<dyn WorkflowHandler>;
pub type ActivityRegistryBuilder = RegistryBuilder<dyn ActivityHandler>;

impl<H: ?Sized> Registry<H> {
    pub fn builder() -> RegistryBuilder<H> {
        RegistryBuilder {
            map: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn builder_from(reg: &Registry<H>) -> RegistryBuilder<H> {
        RegistryBuilder {
            map: reg.inner.as_ref().clone(),
            errors: Vec::new(),
        }
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<H>> {
        let found = self.inner.get(task_type).cloned();
        if found.is_none() {
            self.log_registry_miss(task_type);
        }
        found
    }

    pub fn has(&self, task_type: &TaskType) -> bool {
        self.inner.contains_key(task_type)
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Registered types, sorted.
    pub fn list(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.inner.keys().cloned().collect();
        types.sort();
        types
    }

    fn log_registry_miss(&self, task_type: &TaskType) {
        let versions: Vec<&str> = self
            .inner
            .keys()
            .filter(|t| t.name == task_type.name)
            .map(|t| t.version.as_str())
            .collect();
        tracing::debug!(
            target: "duroflow::runtime::registry",
            requested_name = %task_type.name,
            requested_version = %task_type.version,
            available_versions_for_name = ?versions,
            registered_count = self.inner.len(),
            "Registry lookup miss"
        );
    }
}

impl<H: ?Sized> RegistryBuilder<H> {
    pub fn build(self) -> Registry<H> {
        Registry {
            inner: Arc::new(self.map),
        }
    }

    /// Build the registry, returning an error if there were any registration errors.
    ///
    /// # Errors
    ///
    /// Returns all registration errors joined with `"; "`.
    pub fn build_result(self) -> Result<Registry<H>, String> {
        if self.errors.is_empty() {
            Ok(self.build())
        } else {
            Err(self.errors.join("; "))
        }
    }

    /// Add every handler of `other`; types already present are recorded as errors.
    pub fn merge(mut self, other: Registry<H>, kind: &str) -> Self {
        for (task_type, handler) in other.inner.iter() {
            if self.map.contains_key(task_type) {
                self.errors.push(format!("duplicate {kind} in merge: {task_type}"));
            } else {
                self.map.insert(task_type.clone(), handler.clone());
            }
        }
        self
    }

    fn insert(mut self, task_type: TaskType, handler: Arc<H>, kind: &str) -> Self {
        if self.map.contains_key(&task_type) {
            self.errors.push(format!("duplicate {kind} registration: {task_type}"));
            return self;
        }
        self.map.insert(task_type, handler);
        self
    }
}

impl WorkflowRegistryBuilder {
    pub fn register<F>(self, name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkflowContext<'_>, Arguments) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.insert(TaskType::new(name, version), Arc::new(FnWorkflow(f)), "workflow")
    }

    pub fn register_handler(
        self,
        name: impl Into<String>,
        version: impl Into<String>,
        handler: impl WorkflowHandler + 'static,
    ) -> Self {
        self.insert(TaskType::new(name, version), Arc::new(handler), "workflow")
    }
}

impl ActivityRegistryBuilder {
    pub fn register<F, Fut>(self, name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Arguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        self.insert(TaskType::new(name, version), Arc::new(FnActivity(f)), "activity")
    }

    /// Register an activity taking its first positional argument as `In` and
    /// returning any serializable value.
    pub fn register_typed<In, Out, F, Fut>(self, name: impl Into<String>, version: impl Into<String>, f: F) -> Self
    where
        In: DeserializeOwned + Send + 'static,
        Out: Serialize + Send + 'static,
        F: Fn(ActivityContext, In) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<Out, TaskError>> + Send + 'static,
    {
        let wrapper = move |ctx: ActivityContext, args: Arguments| {
            let f = f.clone();
            async move {
                let input: In = args.get(0)?;
                let out = f(ctx, input).await?;
                Ok::<Value, TaskError>(serde_json::to_value(&out)?)
            }
        };
        self.register(name, version, wrapper)
    }

    pub fn register_handler(
        self,
        name: impl Into<String>,
        version: impl Into<String>,
        handler: impl ActivityHandler + 'static,
    ) -> Self {
        self.insert(TaskType::new(name, version), Arc::new(handler), "activity")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop(_ctx: &mut WorkflowContext<'_>, _args: Arguments) -> Result<Value, TaskError> {
        Ok(Value::Null)
    }

    #[test]
    fn versions_are_distinct_types() {
        let reg = WorkflowRegistry::builder()
            .register("Order", "1", noop)
            .register("Order", "2", noop)
            .build_result()
            .unwrap();
        assert_eq!(reg.count(), 2);
        assert!(reg.get(&TaskType::new("Order", "2")).is_some());
        assert!(reg.get(&TaskType::new("Order", "3")).is_none());
        assert_eq!(reg.list()[0], TaskType::new("Order", "1"));
    }

    #[test]
    fn duplicates_are_reported() {
        let err = WorkflowRegistry::builder()
            .register("Order", "1", noop)
            .register("Order", "1", noop)
            .build_result()
            .err()
            .unwrap();
        assert_eq!(err, "duplicate workflow registration: Order@1");
    }

    #[test]
    fn merge_keeps_first_and_reports_clash() {
        let other = ActivityRegistry::builder()
            .register("Add", "1", |_ctx, _args| async { Ok(json!(1)) })
            .register("Sub", "1", |_ctx, _args| async { Ok(json!(2)) })
            .build();
        let result = ActivityRegistry::builder()
            .register("Add", "1", |_ctx, _args| async { Ok(json!(0)) })
            .merge(other, "activity")
            .build_result();
        assert_eq!(result.err().unwrap(), "duplicate activity in merge: Add@1");
    }

    #[test]
    fn builder_from_extends_existing() {
        let base = WorkflowRegistry::builder().register("A", "1", noop).build();
        let extended = WorkflowRegistry::builder_from(&base).register("B", "1", noop).build();
        assert_eq!(extended.count(), 2);
        assert_eq!(base.count(), 1);
    }
}
