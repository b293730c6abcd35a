//! The observability injection surface.
//!
//! Observability sinks are injected dependencies; third-party
//! metrics/tracing/event-hook backends are out of this crate's scope,
//! so this module defines only the *surface* (`Hooks<T>`, `StageEvent<T>`),
//! not a metrics backend. Every connector accepts `Option<Arc<dyn Hooks<T>>>` via a
//! `.with_hooks(...)` builder, defaulting to `None` (no overhead when
//! unused). Hook delivery is fire-and-forget: a hook's own panics or
//! errors never affect a Stage's return value.

use std::sync::Arc;

use crate::error::Error;
use crate::stage::Cloneable;

/// A lifecycle event emitted by a connector during one `Process` call.
///
/// Every connector emits at least [`StageEvent::Started`] /
/// [`StageEvent::Succeeded`] / [`StageEvent::Failed`]. Connectors with
/// richer internal state machines — [`Retry`](crate::connectors::retry::Retry),
/// [`Fallback`](crate::connectors::fallback::Fallback), and
/// [`Scaffold`](crate::connectors::scaffold::Scaffold) — additionally
/// emit their own named sub-events: Retry's on-attempt, on-success,
/// on-exhausted; Fallback's on-activated, on-recovered, on-exhausted;
/// Scaffold's on-launched, on-all-launched.
#[derive(Debug)]
pub enum StageEvent<'a, T: Cloneable> {
    /// A connector began processing `input`.
    Started { stage: &'a str, input: &'a T },
    /// A connector finished successfully.
    Succeeded { stage: &'a str, output: &'a T },
    /// A connector finished with a failure.
    Failed { stage: &'a str, error: &'a Error<T> },
    /// Retry/Backoff is about to invoke its child for the `attempt`-th
    /// time (1-based).
    Attempt { stage: &'a str, attempt: usize },
    /// Retry/Backoff succeeded on `attempt` (1-based).
    AttemptSucceeded { stage: &'a str, attempt: usize },
    /// Retry/Backoff consumed every attempt without success.
    Exhausted { stage: &'a str, attempts: usize },
    /// Fallback is about to attempt its `index`-th child (0-based).
    FallbackActivated { stage: &'a str, index: usize },
    /// Fallback recovered via its `index`-th child (0-based) after at
    /// least one earlier failure.
    FallbackRecovered { stage: &'a str, index: usize },
    /// Scaffold spawned its `index`-th child (0-based).
    ScaffoldLaunched { stage: &'a str, index: usize },
    /// Scaffold finished spawning every child (none were awaited).
    ScaffoldAllLaunched { stage: &'a str, count: usize },
}

/// The observability sink trait: a connector's injection point for
/// counters, spans, or event streams. The default implementation is a
/// no-op, so a connector built without `.with_hooks(...)` pays no
/// runtime cost beyond an `Option` check.
pub trait Hooks<T: Cloneable>: Send + Sync {
    /// Observes one lifecycle event. Must not panic; implementations
    /// that might should catch their own panics, since a hook failure
    /// must never affect the Stage's return value.
    fn on_event(&self, event: &StageEvent<'_, T>);
}

/// Invokes `hooks.on_event(&event)` if a sink is configured; otherwise a
/// no-op. Centralizes the `Option` check every connector's call sites use.
pub fn emit<T: Cloneable>(hooks: Option<&Arc<dyn Hooks<T>>>, event: StageEvent<'_, T>) {
    if let Some(hooks) = hooks {
        hooks.on_event(&event);
    }
}

/// A [`Hooks`] implementation that renders every event as a `tracing`
/// event, gated behind the `tracing` feature.
#[cfg(feature = "tracing")]
pub struct TracingHooks;

#[cfg(feature = "tracing")]
impl<T: Cloneable + std::fmt::Debug> Hooks<T> for TracingHooks {
    fn on_event(&self, event: &StageEvent<'_, T>) {
        match event {
            StageEvent::Started { stage, input } => {
                tracing::debug!(target: "stage_rail", stage, ?input, "stage started");
            },
            StageEvent::Succeeded { stage, output } => {
                tracing::debug!(target: "stage_rail", stage, ?output, "stage succeeded");
            },
            StageEvent::Failed { stage, error } => {
                tracing::warn!(target: "stage_rail", stage, %error, "stage failed");
            },
            StageEvent::Attempt { stage, attempt } => {
                tracing::debug!(target: "stage_rail", stage, attempt, "attempt starting");
            },
            StageEvent::AttemptSucceeded { stage, attempt } => {
                tracing::debug!(target: "stage_rail", stage, attempt, "attempt succeeded");
            },
            StageEvent::Exhausted { stage, attempts } => {
                tracing::warn!(target: "stage_rail", stage, attempts, "attempts exhausted");
            },
            StageEvent::FallbackActivated { stage, index } => {
                tracing::debug!(target: "stage_rail", stage, index, "fallback child activated");
            },
            StageEvent::FallbackRecovered { stage, index } => {
                tracing::debug!(target: "stage_rail", stage, index, "fallback recovered");
            },
            StageEvent::ScaffoldLaunched { stage, index } => {
                tracing::debug!(target: "stage_rail", stage, index, "scaffold child launched");
            },
            StageEvent::ScaffoldAllLaunched { stage, count } => {
                tracing::debug!(target: "stage_rail", stage, count, "scaffold finished launching");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingHooks {
        seen: Mutex<Vec<String>>,
    }

    impl Hooks<i32> for RecordingHooks {
        fn on_event(&self, event: &StageEvent<'_, i32>) {
            let label = match event {
                StageEvent::Started { .. } => "started",
                StageEvent::Succeeded { .. } => "succeeded",
                StageEvent::Failed { .. } => "failed",
                StageEvent::Attempt { .. } => "attempt",
                StageEvent::AttemptSucceeded { .. } => "attempt_succeeded",
                StageEvent::Exhausted { .. } => "exhausted",
                StageEvent::FallbackActivated { .. } => "fallback_activated",
                StageEvent::FallbackRecovered { .. } => "fallback_recovered",
                StageEvent::ScaffoldLaunched { .. } => "scaffold_launched",
                StageEvent::ScaffoldAllLaunched { .. } => "scaffold_all_launched",
            };
            self.seen.lock().unwrap().push(label.to_string());
        }
    }

    #[test]
    fn emit_invokes_the_configured_sink() {
        let hooks: Arc<dyn Hooks<i32>> = Arc::new(RecordingHooks { seen: Mutex::new(Vec::new()) });
        let input = 1;
        emit(Some(&hooks), StageEvent::Started { stage: "s", input: &input });
        emit(Some(&hooks), StageEvent::Attempt { stage: "s", attempt: 1 });
    }

    #[test]
    fn emit_is_a_no_op_without_a_sink() {
        // Must not panic with no sink configured.
        emit::<i32>(None, StageEvent::Attempt { stage: "s", attempt: 1 });
    }
}
