use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::{close_once, ctx_error};
use crate::context::{Clock, Context, TokioClock};
use crate::error::{Error, ErrorKind, StageResult, Structural};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Bounds a child's execution to a duration. If the child finishes
/// first, its result is returned. If the deadline fires first, `Timeout`
/// returns immediately with a timeout-flagged error; the child keeps
/// running, detached, in its own task, and its eventual result is
/// discarded — `Timeout` does not block until the child observes
/// cancellation.
pub struct Timeout<T: Cloneable> {
    name: String,
    child: RwLock<ArcStage<T>>,
    duration: RwLock<Duration>,
    clock: Arc<dyn Clock>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Timeout<T> {
    /// Builds a `Timeout` bounding `child` to `duration`, using the real
    /// clock.
    pub fn new(name: impl Into<String>, child: ArcStage<T>, duration: Duration) -> Self {
        Self::with_clock(name, child, duration, Arc::new(TokioClock))
    }

    /// As [`Timeout::new`], but with an injectable [`Clock`] so tests
    /// can drive the deadline deterministically.
    pub fn with_clock(name: impl Into<String>, child: ArcStage<T>, duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            child: RwLock::new(child),
            duration: RwLock::new(duration),
            clock,
            closed: OnceCell::new(),
        }
    }

    /// Replaces the wrapped child.
    pub async fn set_child(&self, child: ArcStage<T>) {
        *self.child.write().await = child;
    }

    /// Updates the bounding duration.
    pub async fn set_duration(&self, duration: Duration) {
        *self.duration.write().await = duration;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Timeout<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let duration = *self.duration.read().await;
        let child = self.child.read().await.clone();
        let original = input.clone();
        let snapshot = input.clone();
        let child_ctx = ctx.child_with_deadline(duration);

        let mut join = tokio::spawn(async move { run_guarded(child.as_ref(), &child_ctx, input, snapshot).await });

        tokio::select! {
            result = &mut join => {
                match result {
                    Ok(stage_result) => stage_result.map_err(|e| e.wrap_same_kind(self.name.clone(), original)),
                    Err(join_err) => Err(Error::new(self.name.clone(), original, ErrorKind::Panic, JoinFailure(join_err.to_string()))),
                }
            }
            () = self.clock.sleep(duration) => {
                Err(Error::new(self.name.clone(), original, ErrorKind::Timeout, Structural::DeadlineExceeded).with_timeout())
            }
            () = ctx.token().cancelled() => {
                Err(ctx_error(&self.name, original, ctx))
            }
        }
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

#[derive(Debug, thiserror::Error)]
#[error("timeout-bounded child task failed to join: {0}")]
struct JoinFailure(String);
