//! Small tasks shared by the integration tests.
//!
//! Each test binary uses a different subset, hence the `dead_code` allowance.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use stepwise::{
    EventStore, Recovery, Route, Task, TaskError, TaskGraph, TaskOutput, TaskScope, TraceSpan,
    Tracer,
};

/// Event key every test task appends its name to
pub const TRAIL: &str = "trail";

pub fn append_trail(events: &EventStore, name: &str) {
    let name = name.to_string();
    events.update(TRAIL, move |current| {
        let mut trail = current
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        trail.push(json!(name));
        Value::Array(trail)
    });
}

pub fn graph(tasks: Vec<Arc<dyn Task>>) -> TaskGraph {
    TaskGraph::builder()
        .register_all(tasks)
        .unwrap()
        .build()
        .unwrap()
}

/// Appends its name to the trail, counts visits in Context, then routes on.
pub struct Relay {
    name: String,
    next: Option<String>,
}

impl Relay {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            next: None,
        }
    }

    pub fn then(mut self, next: &str) -> Self {
        self.next = Some(next.to_string());
        self
    }

    pub fn arc(self) -> Arc<dyn Task> {
        Arc::new(self)
    }
}

#[async_trait]
impl Task for Relay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        append_trail(scope.events, &self.name);
        let visits = scope.context.get(&self.name).as_u64().unwrap_or(0) + 1;
        scope.context.set_value(self.name.clone(), json!(visits));
        scope.trace(TraceSpan::new(format!("{}.inner", self.name)));
        Ok(json!({ "task": self.name, "visits": visits }))
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        match &self.next {
            Some(next) => Route::next(next.clone()),
            None => Route::End,
        }
    }
}

/// Writes partial progress, then fails. Optionally recovers.
pub struct Failing {
    name: String,
    recovery: Recovery,
}

impl Failing {
    pub fn rethrowing(name: &str) -> Arc<dyn Task> {
        Arc::new(Self {
            name: name.to_string(),
            recovery: Recovery::Rethrow,
        })
    }

    pub fn recovering(name: &str, route: Route) -> Arc<dyn Task> {
        Arc::new(Self {
            name: name.to_string(),
            recovery: Recovery::Route(route),
        })
    }
}

#[async_trait]
impl Task for Failing {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        scope.events.update("progress", |_| json!("written before failure"));
        scope.context.set_value("partial", json!(true));
        Err(TaskError::failed("disk on fire"))
    }

    async fn on_error(&self, error: &TaskError, scope: &mut TaskScope<'_>) -> Recovery {
        scope
            .context
            .set_value("handled", json!(error.to_string()));
        self.recovery.clone()
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::End
    }
}

pub struct Panicking;

#[async_trait]
impl Task for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        append_trail(scope.events, "panicking");
        panic!("task exploded");
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::End
    }
}

/// Writes context `written`, then panics while choosing a route.
pub struct PanickingRoute;

#[async_trait]
impl Task for PanickingRoute {
    fn name(&self) -> &str {
        "misroute"
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        scope.context.set_value("written", json!(true));
        Ok(json!("done"))
    }

    async fn on_error(&self, _error: &TaskError, scope: &mut TaskScope<'_>) -> Recovery {
        scope.context.set_value("handled", json!(true));
        Recovery::Route(Route::End)
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        panic!("no route for this output");
    }
}

/// Routes to itself without ever suspending, counting visits in context `spins`.
pub struct Spin;

#[async_trait]
impl Task for Spin {
    fn name(&self) -> &str {
        "spin"
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        let spins = scope.context.get("spins").as_u64().unwrap_or(0) + 1;
        scope.context.set_value("spins", json!(spins));
        Ok(Value::Null)
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::next("spin")
    }
}

/// Marks itself as waiting, then blocks until the run is cancelled.
///
/// Its error handler would reroute to `End`; cancellation must bypass it.
pub struct WaitForCancel;

#[async_trait]
impl Task for WaitForCancel {
    fn name(&self) -> &str {
        "wait"
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        scope.events.update("waiting", |_| json!(true));
        scope.signal.cancelled().await;
        Err(TaskError::Cancelled)
    }

    async fn on_error(&self, _error: &TaskError, scope: &mut TaskScope<'_>) -> Recovery {
        scope.context.set_value("handled", json!(true));
        Recovery::Route(Route::End)
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::End
    }
}

/// Sleeps, then finishes; returns a plain failure if the run was cancelled
/// meanwhile.
pub struct Sleeper {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Task for Sleeper {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        tokio::time::sleep(self.delay).await;
        if scope.signal.is_cancelled() {
            return Err(TaskError::failed("noticed cancellation late"));
        }
        Ok(json!(self.name))
    }

    async fn on_error(&self, _error: &TaskError, _scope: &mut TaskScope<'_>) -> Recovery {
        Recovery::Route(Route::End)
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::End
    }
}

/// Routes to itself forever, counting visits in the event `ticks`.
pub struct Ticker;

#[async_trait]
impl Task for Ticker {
    fn name(&self) -> &str {
        "tick"
    }

    async fn execute(&self, scope: &mut TaskScope<'_>) -> Result<TaskOutput, TaskError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        scope
            .events
            .update("ticks", |current| json!(current.and_then(Value::as_u64).unwrap_or(0) + 1));
        Ok(Value::Null)
    }

    fn route(&self, _output: &TaskOutput) -> Route {
        Route::next("tick")
    }
}

/// A tracer that rejects every span.
pub struct BrokenTracer;

impl Tracer for BrokenTracer {
    fn span(&self, _span: TraceSpan) -> anyhow::Result<()> {
        anyhow::bail!("trace sink unavailable")
    }
}
