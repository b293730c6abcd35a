use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::{check_index_bound, check_insert_bound, close_once};
use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult, Structural};
use crate::observability::{emit, Hooks, StageEvent};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Attempts an ordered list of children, returning the first success;
/// if every child fails, returns the last child's error.
///
/// Requires `T: Cloneable` because every attempt but the last needs its
/// own independent copy of the original input.
pub struct Fallback<T: Cloneable> {
    name: String,
    children: RwLock<Vec<ArcStage<T>>>,
    hooks: Option<Arc<dyn Hooks<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Fallback<T> {
    /// Builds a `Fallback` from an ordered child list. An empty list is
    /// permitted at construction; `process` will fail on an empty list.
    pub fn new(name: impl Into<String>, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), children: RwLock::new(children), hooks: None, closed: OnceCell::new() }
    }

    /// Attaches an observability sink, emitting
    /// `FallbackActivated`/`FallbackRecovered` events alongside the
    /// universal `Started`/`Succeeded`/`Failed` ones.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks<T>>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Number of configured children.
    pub async fn len(&self) -> usize {
        self.children.read().await.len()
    }

    /// The primary (first-attempted) child, if any.
    pub async fn primary(&self) -> Option<ArcStage<T>> {
        self.children.read().await.first().cloned()
    }

    /// The children attempted after the primary, in order.
    pub async fn fallback_list(&self) -> Vec<ArcStage<T>> {
        self.children.read().await.iter().skip(1).cloned().collect()
    }

    /// Appends a child to the end of the attempt order.
    pub async fn add(&self, child: ArcStage<T>) {
        self.children.write().await.push(child);
    }

    /// Inserts a child at `index` in the attempt order.
    pub async fn insert(&self, index: usize, child: ArcStage<T>) -> Result<(), Structural> {
        let mut guard = self.children.write().await;
        check_insert_bound(index, guard.len())?;
        guard.insert(index, child);
        Ok(())
    }

    /// Removes the child at `index`.
    pub async fn remove(&self, index: usize) -> Result<ArcStage<T>, Structural> {
        let mut guard = self.children.write().await;
        check_index_bound(index, guard.len())?;
        Ok(guard.remove(index))
    }

    /// Replaces the entire attempt list.
    pub async fn replace_all(&self, children: Vec<ArcStage<T>>) {
        *self.children.write().await = children;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Fallback<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        if children.is_empty() {
            let err = Error::new(self.name.clone(), input, ErrorKind::AllFailed, Structural::EmptyFallback);
            emit(self.hooks.as_ref(), StageEvent::Failed { stage: &self.name, error: &err });
            return Err(err);
        }
        let original = input.clone();
        emit(self.hooks.as_ref(), StageEvent::Started { stage: &self.name, input: &original });
        let mut last_err = None;
        for (index, child) in children.iter().enumerate() {
            if index > 0 {
                emit(self.hooks.as_ref(), StageEvent::FallbackActivated { stage: &self.name, index });
            }
            let attempt = input.clone();
            let snapshot = attempt.clone();
            match run_guarded(child.as_ref(), ctx, attempt, snapshot).await {
                Ok(v) => {
                    if index > 0 {
                        emit(self.hooks.as_ref(), StageEvent::FallbackRecovered { stage: &self.name, index });
                    }
                    emit(self.hooks.as_ref(), StageEvent::Succeeded { stage: &self.name, output: &v });
                    return Ok(v);
                },
                Err(e) => last_err = Some(e),
            }
        }
        // `children` is non-empty, so the loop always assigns `last_err`.
        let err = last_err.expect("at least one attempt").wrap(self.name.clone(), original, ErrorKind::AllFailed);
        emit(self.hooks.as_ref(), StageEvent::Failed { stage: &self.name, error: &err });
        Err(err)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> CloseResult {
        close_once(&self.closed, async {
            let children = self.children.read().await.clone();
            close_children(&children).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::{Apply, Transform};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Labeled(&'static str);

    #[tokio::test]
    async fn empty_fallback_fails() {
        let fb: Fallback<i32> = Fallback::new("fb", vec![]);
        let err = fb.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllFailed);
    }

    #[tokio::test]
    async fn returns_first_success() {
        let fails: ArcStage<i32> =
            Arc::new(Apply::new("fails", |_ctx, _n: i32| async move { Err::<i32, _>(Labeled("one")) }));
        let ok: ArcStage<i32> = Arc::new(Transform::new("ok", |n| n + 1));
        let fb = Fallback::new("fb", vec![fails, ok]);
        assert_eq!(fb.process(&Context::new(), 5).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn exhausts_and_returns_the_last_error_with_original_input() {
        let one: ArcStage<i32> =
            Arc::new(Apply::new("one", |_ctx, _n: i32| async move { Err::<i32, _>(Labeled("one")) }));
        let two: ArcStage<i32> =
            Arc::new(Apply::new("two", |_ctx, _n: i32| async move { Err::<i32, _>(Labeled("two")) }));
        let three: ArcStage<i32> =
            Arc::new(Apply::new("three", |_ctx, _n: i32| async move { Err::<i32, _>(Labeled("three")) }));
        let fb = Fallback::new("fb", vec![one, two, three]);
        let err = fb.process(&Context::new(), 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllFailed);
        assert!(err.to_string().contains("three"));
        assert_eq!(*err.input_data(), 5);
    }

    #[tokio::test]
    async fn primary_and_fallback_list_reflect_registration_order() {
        let a: ArcStage<i32> = Arc::new(Transform::new("a", |n| n));
        let b: ArcStage<i32> = Arc::new(Transform::new("b", |n| n));
        let fb = Fallback::new("fb", vec![a, b]);
        assert_eq!(fb.primary().await.unwrap().name(), "a");
        assert_eq!(fb.fallback_list().await.iter().map(|s| s.name()).collect::<Vec<_>>(), vec!["b"]);
    }
}
