use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::{close_once, ctx_error};
use crate::context::Context;
use crate::error::{ErrorKind, StageResult};
use crate::observability::{emit, Hooks, StageEvent};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Bounded re-invocation of a single child with no delay between
/// attempts. `maxAttempts` is clamped to at least 1 both at construction
/// and through [`Retry::set_max_attempts`].
pub struct Retry<T: Cloneable> {
    name: String,
    child: RwLock<ArcStage<T>>,
    max_attempts: RwLock<usize>,
    hooks: Option<Arc<dyn Hooks<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Retry<T> {
    /// Builds a `Retry` wrapping `child`, retrying up to `max_attempts`
    /// times (clamped to at least 1).
    pub fn new(name: impl Into<String>, child: ArcStage<T>, max_attempts: usize) -> Self {
        Self {
            name: name.into(),
            child: RwLock::new(child),
            max_attempts: RwLock::new(max_attempts.max(1)),
            hooks: None,
            closed: OnceCell::new(),
        }
    }

    /// Attaches an observability sink, emitting
    /// `Attempt`/`AttemptSucceeded`/`Exhausted` events alongside the
    /// universal `Started`/`Succeeded`/`Failed` ones.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks<T>>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Replaces the wrapped child.
    pub async fn set_child(&self, child: ArcStage<T>) {
        *self.child.write().await = child;
    }

    /// Updates the attempt bound, clamped to at least 1.
    pub async fn set_max_attempts(&self, max_attempts: usize) {
        *self.max_attempts.write().await = max_attempts.max(1);
    }

    /// The current attempt bound.
    pub async fn max_attempts(&self) -> usize {
        *self.max_attempts.read().await
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Retry<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let max_attempts = *self.max_attempts.read().await;
        let child = self.child.read().await.clone();
        let original = input.clone();
        let start = Instant::now();
        let mut last_err = None;

        emit(self.hooks.as_ref(), StageEvent::Started { stage: &self.name, input: &original });

        for attempt in 1..=max_attempts {
            if attempt > 1 && ctx.is_done() {
                let err = ctx_error(&self.name, original, ctx).with_duration(start.elapsed());
                emit(self.hooks.as_ref(), StageEvent::Failed { stage: &self.name, error: &err });
                return Err(err);
            }
            emit(self.hooks.as_ref(), StageEvent::Attempt { stage: &self.name, attempt });
            let attempt_input = input.clone();
            let snapshot = attempt_input.clone();
            match run_guarded(child.as_ref(), ctx, attempt_input, snapshot).await {
                Ok(v) => {
                    emit(self.hooks.as_ref(), StageEvent::AttemptSucceeded { stage: &self.name, attempt });
                    emit(self.hooks.as_ref(), StageEvent::Succeeded { stage: &self.name, output: &v });
                    return Ok(v);
                },
                Err(e) => last_err = Some(e),
            }
        }

        emit(self.hooks.as_ref(), StageEvent::Exhausted { stage: &self.name, attempts: max_attempts });
        let err = last_err
            .expect("max_attempts is clamped to at least 1, so the loop runs")
            .wrap(self.name.clone(), original, ErrorKind::Exhausted)
            .with_duration(start.elapsed());
        emit(self.hooks.as_ref(), StageEvent::Failed { stage: &self.name, error: &err });
        Err(err)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> CloseResult {
        close_once(&self.closed, async {
            let child = self.child.read().await.clone();
            close_children(&[child]).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::adapters::Apply;

    #[derive(Debug, thiserror::Error)]
    #[error("attempt failed")]
    struct AttemptFailed;

    #[tokio::test]
    async fn succeeds_on_a_later_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let child: ArcStage<i32> = Arc::new(Apply::new("flaky", move |_ctx, n: i32| {
            let counter = Arc::clone(&counter);
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err::<i32, _>(AttemptFailed)
                } else {
                    Ok(n * 2)
                }
            }
        }));
        let retry = Retry::new("retry", child, 5);
        let result = retry.process(&Context::new(), 7).await.unwrap();
        assert_eq!(result, 14);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts_and_wraps_the_last_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let child: ArcStage<i32> = Arc::new(Apply::new("always_fails", move |_ctx, _n: i32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(AttemptFailed)
            }
        }));
        let retry = Retry::new("retry", child, 3);
        let err = retry.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_attempts_is_clamped_to_at_least_one() {
        let child: ArcStage<i32> = Arc::new(Apply::new("fails", |_ctx, _n: i32| async move { Err::<i32, _>(AttemptFailed) }));
        let retry = Retry::new("retry", child, 0);
        assert_eq!(retry.max_attempts().await, 1);
    }
}
