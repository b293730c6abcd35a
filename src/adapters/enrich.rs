use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::StageResult;
use crate::stage::{catch_panic, Cloneable, Stage};

/// A best-effort transform that swallows failures by contract: `fn(v) =
/// if (v', e) := user(ctx, v); e != nil then (v, nil) else (v', nil)`.
/// `Enrich` never surfaces an error: if the user function fails, the
/// original input is returned unchanged.
pub struct Enrich<T, F> {
    name: String,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

impl<T, F, Fut, E> Enrich<T, F>
where
    T: Cloneable,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wraps `f` as a named, failure-swallowing enrichment.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, F, Fut, E> Stage<T> for Enrich<T, F>
where
    T: Cloneable,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let snapshot = input.clone();
        catch_panic(&self.name, snapshot.clone(), async move {
            Ok((self.f)(ctx.clone(), input).await.unwrap_or(snapshot))
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("enrich failed")]
    struct EnrichFailed;

    #[tokio::test]
    async fn success_returns_the_enriched_value() {
        let stage = Enrich::new("enrich", |_ctx, n: i32| async move { Ok::<_, EnrichFailed>(n + 100) });
        assert_eq!(stage.process(&Context::new(), 1).await.unwrap(), 101);
    }

    #[tokio::test]
    async fn failure_is_swallowed_and_input_is_returned_unchanged() {
        let stage = Enrich::new("enrich", |_ctx, _n: i32| async move { Err::<i32, _>(EnrichFailed) });
        let result = stage.process(&Context::new(), 7).await;
        assert_eq!(result.unwrap(), 7);
    }
}
