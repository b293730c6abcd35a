//! The `Stage<T>` contract and the panic-containment boundary every
//! implementation is wrapped in.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult};

/// The ability to produce an independent copy of a value so it can be
/// re-offered to more than one attempt (a retried leaf, a fallback
/// alternative, a fanned-out child).
///
/// Rust already has a non-reflective, explicit deep-copy capability —
/// [`Clone`] — so this crate does not invent a parallel marker trait; it
/// blanket-implements `Cloneable` over anything `Stage<T>` already
/// requires to cross task boundaries.
pub trait Cloneable: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Cloneable for T {}

/// A unit of work that transforms a `T` into a `T`, or fails with a
/// structured [`Error<T>`], observing a [`Context`] for cancellation and
/// deadlines.
///
/// This is the sole extension point of the crate: leaf adapters
/// ([`crate::adapters`]) and connectors ([`crate::connectors`]) are both
/// just `Stage<T>` implementations, and connectors compose children that
/// are themselves `Stage<T>` — there is no separate "composite" type.
#[async_trait]
pub trait Stage<T: Cloneable>: Send + Sync {
    /// Runs this stage against `input`, observing `ctx` for cancellation
    /// and deadlines.
    ///
    /// Implementations must not let a panic escape `process` uncaught —
    /// see [`run_guarded`] for the containment boundary every built-in
    /// leaf and connector uses.
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T>;

    /// A short, stable identifier used in [`Error::path`](crate::error::Error::path)
    /// and observability events. Not required to be unique.
    fn name(&self) -> &str;

    /// Tears down this stage, idempotently, recursively closing any
    /// children. Leaf adapters have nothing to release and accept the
    /// default no-op.
    async fn close(&self) -> CloseResult {
        Ok(())
    }
}

/// Object-safe, shared child reference used throughout the connector
/// layer (`Sequence`'s chain, `Switch`'s route map, `Fallback`'s attempt
/// list, ...). `Arc` rather than `Box` so connectors can snapshot their
/// child list under a read lock, clone it, release the lock, and execute
/// without it: cloning a `Vec<ArcStage<T>>` is a handful of refcount
/// bumps, never a deep copy of the stages themselves.
pub type ArcStage<T> = Arc<dyn Stage<T>>;

/// Awaits `fut`, converting any unwinding panic into a structured
/// [`Error<T>`] with [`ErrorKind::Panic`] instead of letting it propagate
/// past the stage boundary.
///
/// `snapshot` becomes the resulting error's `InputData` if `fut` panics,
/// since a panic partway through may have consumed or corrupted whatever
/// the callee was working on. Every built-in leaf adapter and connector
/// routes its user-code and child-stage invocations through this.
pub async fn catch_panic<T, Fut>(name: &str, snapshot: T, fut: Fut) -> StageResult<T>
where
    T: Cloneable,
    Fut: std::future::Future<Output = StageResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::new(name, snapshot, ErrorKind::Panic, PanicPayload::from(payload))),
    }
}

/// Runs `stage.process(ctx, input)` under [`catch_panic`]. This is the
/// shape every connector uses when invoking a child: clone the input
/// once for the snapshot, hand the original to the child.
pub async fn run_guarded<T: Cloneable>(
    stage: &(impl Stage<T> + ?Sized),
    ctx: &Context,
    input: T,
    snapshot: T,
) -> StageResult<T> {
    catch_panic(stage.name(), snapshot, stage.process(ctx, input)).await
}

/// Best-effort string rendering of a caught panic payload, wrapped as a
/// `std::error::Error` so it can live inside [`crate::error::Cause::Leaf`].
#[derive(Debug, thiserror::Error)]
#[error("stage panicked: {0}")]
pub struct PanicPayload(String);

impl From<Box<dyn Any + Send>> for PanicPayload {
    fn from(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self(message)
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for ArcStage<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        self.as_ref().process(ctx, input).await
    }

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn close(&self) -> CloseResult {
        self.as_ref().close().await
    }
}

/// The result of [`Stage::close`]: ambient infrastructure teardown, not
/// a pipeline [`Error<T>`] (there is no `T` in scope at `Close()` time).
pub type CloseResult = Result<(), CloseError>;

/// Aggregated failure from closing a connector and its children: `Close`
/// is idempotent and recursively closes children in reverse order,
/// collecting every failure rather than stopping at the first.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} of {} stage(s) failed to close: {}", failures.len(), attempted, failures.join("; "))]
pub struct CloseError {
    /// Total number of stages (self + children) this close attempted.
    pub attempted: usize,
    /// `"{name}: {message}"` for every stage whose close failed.
    pub failures: Vec<String>,
}

/// Closes `children` in reverse registration order, aggregating any
/// failures (including this connector's own, if it has teardown of its
/// own beyond its children) into a single [`CloseError`]. Connectors
/// that hold a child list call this from their own `close`.
pub async fn close_children<T: Cloneable>(children: &[ArcStage<T>]) -> CloseResult {
    let mut failures = Vec::new();
    for child in children.iter().rev() {
        if let Err(e) = child.close().await {
            failures.push(format!("{}: {e}", child.name()));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(CloseError { attempted: children.len(), failures })
    }
}
