use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::{close_once, ctx_error};
use crate::context::{Clock, Context, TokioClock};
use crate::error::{ErrorKind, StageResult};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Like [`Retry`](crate::connectors::retry::Retry), but interposes an
/// exponentially-doubling, cancellable delay between attempts: waits
/// form `base, 2·base, 4·base, …`, and no delay follows the final
/// attempt.
pub struct Backoff<T: Cloneable> {
    name: String,
    child: RwLock<ArcStage<T>>,
    max_attempts: RwLock<usize>,
    base_delay: RwLock<Duration>,
    clock: Arc<dyn Clock>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Backoff<T> {
    /// Builds a `Backoff` wrapping `child`, retrying up to `max_attempts`
    /// times (clamped to at least 1) with delays starting at
    /// `base_delay` and doubling each attempt, using the real clock.
    pub fn new(name: impl Into<String>, child: ArcStage<T>, max_attempts: usize, base_delay: Duration) -> Self {
        Self::with_clock(name, child, max_attempts, base_delay, Arc::new(TokioClock))
    }

    /// As [`Backoff::new`], but with an injectable [`Clock`] so tests
    /// can drive waits deterministically.
    pub fn with_clock(
        name: impl Into<String>,
        child: ArcStage<T>,
        max_attempts: usize,
        base_delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            child: RwLock::new(child),
            max_attempts: RwLock::new(max_attempts.max(1)),
            base_delay: RwLock::new(base_delay),
            clock,
            closed: OnceCell::new(),
        }
    }

    /// Replaces the wrapped child.
    pub async fn set_child(&self, child: ArcStage<T>) {
        *self.child.write().await = child;
    }

    /// Updates the attempt bound, clamped to at least 1.
    pub async fn set_max_attempts(&self, max_attempts: usize) {
        *self.max_attempts.write().await = max_attempts.max(1);
    }

    /// Updates the base delay used for the first inter-attempt wait.
    pub async fn set_base_delay(&self, base_delay: Duration) {
        *self.base_delay.write().await = base_delay;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Backoff<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let max_attempts = *self.max_attempts.read().await;
        let base_delay = *self.base_delay.read().await;
        let child = self.child.read().await.clone();
        let original = input.clone();
        let start = Instant::now();
        let mut last_err = None;
        let mut wait = base_delay;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let sleep = self.clock.sleep(wait);
                tokio::select! {
                    () = sleep => {},
                    () = ctx.token().cancelled() => {
                        return Err(ctx_error(&self.name, original, ctx).with_duration(start.elapsed()));
                    }
                }
                wait *= 2;
            }
            let attempt_input = input.clone();
            let snapshot = attempt_input.clone();
            match run_guarded(child.as_ref(), ctx, attempt_input, snapshot).await {
                Ok(v) => return Ok(v),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .expect("max_attempts is clamped to at least 1, so the loop runs")
            .wrap(self.name.clone(), original, ErrorKind::Exhausted)
            .with_duration(start.elapsed()))
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
    use std::sync::Mutex;

    use super::*;
    use crate::adapters::Apply;

    #[derive(Debug, thiserror::Error)]
    #[error("always fails")]
    struct AlwaysFails;

    struct RecordingClock {
        waits: Mutex<Vec<Duration>>,
    }

    impl RecordingClock {
        fn new() -> Self {
            Self { waits: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait::async_trait]
    impl Clock for RecordingClock {
        fn now(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn doubles_the_delay_between_attempts_and_skips_the_final_wait() {
        let clock = Arc::new(RecordingClock::new());
        let child: ArcStage<i32> =
            Arc::new(Apply::new("always_fails", |_ctx, _n: i32| async move { Err::<i32, _>(AlwaysFails) }));
        let backoff =
            Backoff::with_clock("backoff", child, 4, Duration::from_millis(10), Arc::clone(&clock) as Arc<dyn Clock>);

        let err = backoff.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);

        let recorded = clock.waits.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![Duration::from_millis(10), Duration::from_millis(20), Duration::from_millis(40)]
        );
    }

    #[tokio::test]
    async fn succeeds_without_waiting_when_the_first_attempt_succeeds() {
        let clock = Arc::new(RecordingClock::new());
        let child: ArcStage<i32> = Arc::new(Apply::new("ok", |_ctx, n: i32| async move { Ok::<_, AlwaysFails>(n + 1) }));
        let backoff =
            Backoff::with_clock("backoff", child, 3, Duration::from_millis(5), Arc::clone(&clock) as Arc<dyn Clock>);

        let result = backoff.process(&Context::new(), 1).await.unwrap();
        assert_eq!(result, 2);
        assert!(clock.waits.lock().unwrap().is_empty());
    }
}
