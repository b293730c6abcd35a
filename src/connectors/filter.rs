use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::StageResult;
use crate::stage::{run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Delegates to a single wrapped child only when a predicate holds;
/// otherwise returns the input unchanged.
pub struct Filter<T: Cloneable, P> {
    name: String,
    predicate: P,
    child: RwLock<ArcStage<T>>,
    closed: OnceCell<CloseResult>,
}

impl<T, P> Filter<T, P>
where
    T: Cloneable,
    P: Fn(&Context, &T) -> bool + Send + Sync,
{
    /// Wraps `child`, delegating to it only when `predicate` holds.
    pub fn new(name: impl Into<String>, predicate: P, child: ArcStage<T>) -> Self {
        Self { name: name.into(), predicate, child: RwLock::new(child), closed: OnceCell::new() }
    }

    /// Replaces the wrapped child.
    pub async fn set_child(&self, child: ArcStage<T>) {
        *self.child.write().await = child;
    }
}

#[async_trait]
impl<T, P> Stage<T> for Filter<T, P>
where
    T: Cloneable,
    P: Fn(&Context, &T) -> bool + Send + Sync,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        if !(self.predicate)(ctx, &input) {
            return Ok(input);
        }
        let child = self.child.read().await.clone();
        let original = input.clone();
        let snapshot = input.clone();
        run_guarded(child.as_ref(), ctx, input, snapshot).await.map_err(|e| e.wrap_same_kind(self.name.clone(), original))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> CloseResult {
        close_once(&self.closed, async {
            let child = self.child.read().await.clone();
            let children = [child];
            crate::stage::close_children(&children).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::Transform;

    #[tokio::test]
    async fn delegates_when_predicate_holds() {
        let double: ArcStage<i32> = Arc::new(Transform::new("double", |n| n * 2));
        let filter = Filter::new("even_only", |_ctx: &Context, n: &i32| n % 2 == 0, double);
        assert_eq!(filter.process(&Context::new(), 4).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn passes_through_unchanged_when_predicate_fails() {
        let double: ArcStage<i32> = Arc::new(Transform::new("double", |n| n * 2));
        let filter = Filter::new("even_only", |_ctx: &Context, n: &i32| n % 2 == 0, double);
        assert_eq!(filter.process(&Context::new(), 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn child_errors_propagate_with_filters_name_prepended() {
        #[derive(Debug, thiserror::Error)]
        #[error("nope")]
        struct Nope;

        let fails: ArcStage<i32> =
            Arc::new(crate::adapters::Apply::new("fails", |_ctx, _n: i32| async move { Err::<i32, _>(Nope) }));
        let filter = Filter::new("wrap", |_ctx: &Context, _n: &i32| true, fails);
        let err = filter.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.path(), &["wrap", "fails"]);
    }
}
