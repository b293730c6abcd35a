use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::{Error, StageResult};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Runs a primary child; on failure, submits the resulting [`Error<T>`]
/// to a second, purely observational "error pipeline" stage before
/// returning the *original* failure unchanged.
///
/// The error pipeline's own outcome — success, failure, or panic — never
/// replaces the caller-visible error. Its errors are discarded; it
/// exists for logging/alerting/transformation side effects only.
pub struct Handle<T: Cloneable> {
    name: String,
    primary: RwLock<ArcStage<T>>,
    error_pipeline: RwLock<ArcStage<Error<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Handle<T> {
    /// Builds a `Handle` running `primary`, submitting any failure to
    /// `error_pipeline` for observation.
    pub fn new(name: impl Into<String>, primary: ArcStage<T>, error_pipeline: ArcStage<Error<T>>) -> Self {
        Self {
            name: name.into(),
            primary: RwLock::new(primary),
            error_pipeline: RwLock::new(error_pipeline),
            closed: OnceCell::new(),
        }
    }

    /// Replaces the primary stage.
    pub async fn set_primary(&self, primary: ArcStage<T>) {
        *self.primary.write().await = primary;
    }

    /// Replaces the error pipeline stage.
    pub async fn set_error_pipeline(&self, error_pipeline: ArcStage<Error<T>>) {
        *self.error_pipeline.write().await = error_pipeline;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Handle<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let primary = self.primary.read().await.clone();
        let original = input.clone();
        let snapshot = input.clone();

        let err = match run_guarded(primary.as_ref(), ctx, input, snapshot).await {
            Ok(v) => return Ok(v),
            Err(e) => e.wrap_same_kind(self.name.clone(), original),
        };

        let error_pipeline = self.error_pipeline.read().await.clone();
        let pipeline_snapshot = err.clone();
        // Fire-and-observe: the pipeline's own result/errors are discarded.
        let _ = run_guarded(error_pipeline.as_ref(), ctx, err.clone(), pipeline_snapshot).await;
        Err(err)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> CloseResult {
        close_once(&self.closed, async {
            let primary = self.primary.read().await.clone();
            let error_pipeline = self.error_pipeline.read().await.clone();
            let mut failures = Vec::new();
            if let Err(e) = error_pipeline.close().await {
                failures.push(format!("{}: {e}", error_pipeline.name()));
            }
            if let Err(e) = primary.close().await {
                failures.push(format!("{}: {e}", primary.name()));
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(crate::stage::CloseError { attempted: 2, failures })
            }
        })
        .await
    }
}
