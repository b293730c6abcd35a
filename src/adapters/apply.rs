use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult};
use crate::stage::{catch_panic, Cloneable, Stage};

/// A fallible, user-supplied transform: `fn(v) = user(ctx, v)`. `Apply`
/// is the general-purpose leaf: it may fail, and the failure surfaces to
/// the caller verbatim, wrapped with this stage's name.
pub struct Apply<T, F> {
    name: String,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

impl<T, F, Fut, E> Apply<T, F>
where
    T: Cloneable,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    /// Wraps `f` as a named, fallible transform.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, F, Fut, E> Stage<T> for Apply<T, F>
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
