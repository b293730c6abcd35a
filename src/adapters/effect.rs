use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult};
use crate::stage::{catch_panic, Cloneable, Stage};

/// A side-effecting leaf that does not transform its input: `fn(v) = if
/// e := side(ctx, v); e != nil then err else (v, nil)`.
///
/// `Effect` surfaces errors but never modifies data — useful for
/// logging, metrics emission, or validation-without-mutation.
pub struct Effect<T, F> {
    name: String,
    f: F,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T, F, Fut, E> Effect<T, F>
where
    T: Cloneable,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wraps `f` as a named side effect. `f` receives the value and
    /// must hand it back unchanged on success; on failure its return
    /// value is discarded in favor of the pre-call snapshot.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, F, Fut, E> Stage<T> for Effect<T, F>
where
    T: Cloneable,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let snapshot = input.clone();
        let name = self.name.clone();
        catch_panic(&self.name, snapshot.clone(), async move {
            (self.f)(ctx.clone(), input).await.map_err(|e| Error::new(name, snapshot, ErrorKind::UserFailure, e))
        })
        .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
