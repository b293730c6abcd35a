use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::StageResult;
use crate::stage::{catch_panic, Cloneable, Stage};

/// A conditional, infallible transform: `fn(v) = if cond(ctx, v) then
/// xform(ctx, v) else v`.
pub struct Mutate<T, P, F> {
    name: String,
    predicate: P,
    xform: F,
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

impl<T, P, F, Fut> Mutate<T, P, F>
where
    T: Cloneable,
    P: Fn(&Context, &T) -> bool + Send + Sync,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = T> + Send,
{
    /// Wraps `predicate`/`xform` as a named conditional transform.
    pub fn new(name: impl Into<String>, predicate: P, xform: F) -> Self {
        Self { name: name.into(), predicate, xform, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, P, F, Fut> Stage<T> for Mutate<T, P, F>
where
    T: Cloneable,
    P: Fn(&Context, &T) -> bool + Send + Sync,
    F: Fn(Context, T) -> Fut + Send + Sync,
    Fut: Future<Output = T> + Send,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let snapshot = input.clone();
        if !(self.predicate)(ctx, &input) {
            return Ok(input);
        }
        catch_panic(&self.name, snapshot, async move { Ok((self.xform)(ctx.clone(), input).await) }).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
