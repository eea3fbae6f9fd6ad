//! Caller-facing view of a spawned run.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use stepwise_events::{EventStore, EventUpdate};
use stepwise_task_api::Context;
use stepwise_utils::{CancellationSignal, RunError};

use crate::runner::RunOutcome;

/// Handle returned by [`Orchestrator::start_run`](crate::Orchestrator::start_run).
///
/// # Observing progress
///
/// - Poll: [`events`](Self::events) gives the live store (`get_state`,
///   `snapshot`).
/// - Push: [`take_subscription`](Self::take_subscription) yields the receiver
///   created before the run started; [`subscribe`](Self::subscribe) creates a
///   new one that only sees later updates. A lagged receiver can resync from
///   `snapshot()`.
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    events: EventStore,
    signal: CancellationSignal,
    join: JoinHandle<RunOutcome>,
    initial_rx: Option<broadcast::Receiver<EventUpdate>>,
}

impl RunHandle {
    pub(crate) fn new(
        run_id: Uuid,
        events: EventStore,
        signal: CancellationSignal,
        join: JoinHandle<RunOutcome>,
        initial_rx: broadcast::Receiver<EventUpdate>,
    ) -> Self {
        Self {
            run_id,
            events,
            signal,
            join,
            initial_rx: Some(initial_rx),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventUpdate> {
        self.events.subscribe()
    }

    /// The receiver subscribed before the run was spawned. Returns `None`
    /// after the first call.
    pub fn take_subscription(&mut self) -> Option<broadcast::Receiver<EventUpdate>> {
        self.initial_rx.take()
    }

    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Cancel the run once `delay` elapses, unless it finishes first.
    pub fn cancel_after(&self, delay: Duration) -> JoinHandle<()> {
        self.signal.cancel_after(delay)
    }

    #[must_use]
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish.
    ///
    /// If the run's tokio task itself dies, the outcome is `Aborted` with an
    /// empty context and whatever the event store held at that point.
    pub async fn result(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "run task aborted");
                RunOutcome {
                    run_id: self.run_id,
                    result: Err(RunError::Aborted {
                        reason: e.to_string(),
                    }),
                    context: Context::new(),
                    events: self.events.snapshot(),
                    executions: Vec::new(),
                }
            }
        }
    }
}
