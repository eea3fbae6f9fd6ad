//! Task registry.
//!
//! Routing is dynamic, so the graph does not reject cycles. It only checks
//! that names are unique and that every declared successor exists.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use stepwise_task_api::Task;
use stepwise_utils::GraphError;

#[derive(Default)]
pub struct TaskGraphBuilder {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl TaskGraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `task`, failing if its name is already taken.
    pub fn register(mut self, task: Arc<dyn Task>) -> Result<Self, GraphError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(GraphError::DuplicateTaskName { name });
        }
        self.tasks.insert(name, task);
        Ok(self)
    }

    pub fn register_all<I>(self, tasks: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = Arc<dyn Task>>,
    {
        tasks.into_iter().try_fold(self, Self::register)
    }

    /// Validate declared successors and freeze the registry.
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        for (name, task) in &self.tasks {
            for successor in task.successors() {
                if !self.tasks.contains_key(successor) {
                    return Err(GraphError::UnknownTask {
                        name: successor.to_string(),
                        referenced_by: Some(name.clone()),
                    });
                }
            }
        }

        tracing::debug!(tasks = ?self.tasks.keys().collect::<Vec<_>>(), "task graph built");
        Ok(TaskGraph {
            tasks: Arc::new(self.tasks),
        })
    }
}

/// Immutable, cheaply cloneable set of registered tasks.
#[derive(Clone)]
pub struct TaskGraph {
    tasks: Arc<BTreeMap<String, Arc<dyn Task>>>,
}

impl TaskGraph {
    #[must_use]
    pub fn builder() -> TaskGraphBuilder {
        TaskGraphBuilder::new()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Task>, GraphError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownTask {
                name: name.to_string(),
                referenced_by: None,
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Task>)> {
        self.tasks.iter().map(|(name, task)| (name.as_str(), task))
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stepwise_task_api::{Route, TaskOutput, TaskScope};
    use stepwise_utils::TaskError;

    struct Named {
        name: &'static str,
        next: Option<&'static str>,
    }

    #[async_trait]
    impl Task for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn successors(&self) -> Vec<&str> {
            self.next.into_iter().collect()
        }

        async fn execute(&self, _scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
            Ok(TaskOutput::Null)
        }

        fn route(&self, _output: &TaskOutput) -> Route {
            self.next.map_or(Route::End, Route::next)
        }
    }

    fn task(name: &'static str, next: Option<&'static str>) -> Arc<dyn Task> {
        Arc::new(Named { name, next })
    }

    #[test]
    fn test_register_and_lookup() {
        let graph = TaskGraph::builder()
            .register(task("writer", None))
            .unwrap()
            .register(task("analysis", Some("writer")))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.names(), vec!["analysis", "writer"]);
        assert!(graph.contains("writer"));
        assert_eq!(graph.get("analysis").unwrap().name(), "analysis");
        assert_eq!(
            graph.get("ghost").err(),
            Some(GraphError::UnknownTask {
                name: "ghost".into(),
                referenced_by: None
            })
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let err = TaskGraph::builder()
            .register_all([task("analysis", None), task("analysis", None)])
            .err();
        assert_eq!(
            err,
            Some(GraphError::DuplicateTaskName {
                name: "analysis".into()
            })
        );
    }

    #[test]
    fn test_unknown_successor_rejected_at_build() {
        let err = TaskGraph::builder()
            .register(task("analysis", Some("writer")))
            .unwrap()
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownTask {
                name: "writer".into(),
                referenced_by: Some("analysis".into())
            }
        );
    }

    #[test]
    fn test_self_cycle_is_allowed() {
        let graph = TaskGraph::builder()
            .register(task("loop", Some("loop")))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_empty_graph() {
        let graph = TaskGraph::builder().build().unwrap();
        assert!(graph.is_empty());
        assert!(format!("{graph:?}").contains("TaskGraph"));
    }
}
