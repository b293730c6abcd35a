//! `tower::Service` interop for [`Stage<T>`](crate::stage::Stage) (feature `tower`).
//!
//! A thin adapter letting a whole `Stage<T>` pipeline be dropped into a
//! `tower::ServiceBuilder` stack. This module is additive: it introduces
//! no new runtime semantics over `Stage::process`, only a `Service`
//! front door for it.
//!
//! ```rust,ignore
//! use stage_rail::tower::StageService;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new().service(StageService::new(my_stage, Context::new()));
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures_core::future::FusedFuture;
use pin_project_lite::pin_project;
use tower::Service;

use crate::context::Context;
use crate::error::{Error, StageResult};
use crate::stage::{ArcStage, Cloneable};

/// A `tower::Service<T>` that runs a single [`Stage<T>`](crate::stage::Stage)
/// per call, threading a fixed [`Context`] through every invocation.
///
/// `poll_ready` is always `Poll::Ready(Ok(()))`: stages have no notion
/// of backpressure of their own, so readiness is unconditional.
pub struct StageService<T: Cloneable> {
    stage: ArcStage<T>,
    ctx: Context,
}

impl<T: Cloneable> StageService<T> {
    /// Wraps `stage` as a `tower::Service`, using `ctx` for every call.
    #[must_use]
    pub fn new(stage: ArcStage<T>, ctx: Context) -> Self {
        Self { stage, ctx }
    }
}

impl<T: Cloneable> Clone for StageService<T> {
    fn clone(&self) -> Self {
        Self { stage: Arc::clone(&self.stage), ctx: self.ctx.clone() }
    }
}

impl<T: Cloneable> Service<T> for StageService<T> {
    type Response = T;
    type Error = Error<T>;
    type Future = StageFuture<T>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: T) -> Self::Future {
        let stage = Arc::clone(&self.stage);
        let ctx = self.ctx.clone();
        StageFuture::new(Box::pin(async move { stage.process(&ctx, request).await }))
    }
}

pin_project! {
    /// Future returned by [`StageService::call`].
    ///
    /// Wraps the boxed `Stage::process` future so it can participate in
    /// `futures_core::future::FusedFuture`.
    #[must_use = "futures do nothing unless polled"]
    pub struct StageFuture<T: Cloneable> {
        #[pin]
        inner: Pin<Box<dyn Future<Output = StageResult<T>> + Send>>,
        done: bool,
    }
}

impl<T: Cloneable> StageFuture<T> {
    fn new(inner: Pin<Box<dyn Future<Output = StageResult<T>> + Send>>) -> Self {
        Self { inner, done: false }
    }
}

impl<T: Cloneable> Future for StageFuture<T> {
    type Output = StageResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(result) => {
                *this.done = true;
                Poll::Ready(result)
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Cloneable> FusedFuture for StageFuture<T> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

/// Extension trait that wraps any `Stage<T>` as a `tower::Service`
/// without naming [`StageService`] at the call site.
pub trait StageServiceExt<T: Cloneable> {
    /// Wraps `self` as a `tower::Service<T>`, using `ctx` for every call.
    fn into_tower_service(self, ctx: Context) -> StageService<T>;
}

impl<T: Cloneable> StageServiceExt<T> for ArcStage<T> {
    fn into_tower_service(self, ctx: Context) -> StageService<T> {
        StageService::new(self, ctx)
    }
}
