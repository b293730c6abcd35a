use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::StageResult;
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Fans a cloned input out to every child in parallel, waits for all of
/// them to finish, and discards every result and error — returning the
/// *original* input unchanged.
///
/// Useful for parallel side effects (logging, metrics emission) whose
/// individual outcomes are irrelevant but whose completion the caller
/// still wants synchronized with. Requires `T: Cloneable` since each
/// child must see its own independent copy — no child sees another's
/// mutations.
pub struct Concurrent<T: Cloneable> {
    name: String,
    children: RwLock<Vec<ArcStage<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Concurrent<T> {
    /// Builds a `Concurrent` from an initial, possibly empty, child list.
    pub fn new(name: impl Into<String>, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), children: RwLock::new(children), closed: OnceCell::new() }
    }

    /// Number of configured children.
    pub async fn len(&self) -> usize {
        self.children.read().await.len()
    }

    /// `true` iff this `Concurrent` has no children.
    pub async fn is_empty(&self) -> bool {
        self.children.read().await.is_empty()
    }

    /// Appends a child to the fan-out set.
    pub async fn add(&self, child: ArcStage<T>) {
        self.children.write().await.push(child);
    }

    /// Replaces the entire child list.
    pub async fn replace_all(&self, children: Vec<ArcStage<T>>) {
        *self.children.write().await = children;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Concurrent<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        if children.is_empty() {
            return Ok(input);
        }

        let mut set = JoinSet::new();
        for child in children {
            let ctx = ctx.clone();
            let attempt = input.clone();
            let snapshot = attempt.clone();
            set.spawn(async move {
                // Result and error are intentionally discarded: Concurrent
                // is for parallel side effects where only joint completion
                // matters.
                let _ = run_guarded(child.as_ref(), &ctx, attempt, snapshot).await;
            });
        }
        // A child's own panic is already contained by `run_guarded`; a
        // `JoinError` here can only mean the *task* itself was aborted,
        // which this connector never does, so it is safe to ignore.
        while set.join_next().await.is_some() {}

        Ok(input)
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
