use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Fans a cloned input out to every child in parallel and returns the
/// first result from a child that completes **without** error,
/// cancelling the rest.
///
/// If every child fails, returns an aggregate [`Error`] carrying each
/// child's failure. An empty child list is the identity function.
pub struct Race<T: Cloneable> {
    name: String,
    children: RwLock<Vec<ArcStage<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Race<T> {
    /// Builds a `Race` from an initial, possibly empty, child list.
    pub fn new(name: impl Into<String>, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), children: RwLock::new(children), closed: OnceCell::new() }
    }

    /// Number of configured children.
    pub async fn len(&self) -> usize {
        self.children.read().await.len()
    }

    /// Appends a child to the contending set.
    pub async fn add(&self, child: ArcStage<T>) {
        self.children.write().await.push(child);
    }

    /// Replaces the entire child list.
    pub async fn replace_all(&self, children: Vec<ArcStage<T>>) {
        *self.children.write().await = children;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Race<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        if children.is_empty() {
            return Ok(input);
        }

        let original = input.clone();
        let (child_ctx, guard) = ctx.child_linked();

        let mut set = JoinSet::new();
        for child in children {
            let child_ctx = child_ctx.clone();
            let attempt = input.clone();
            let snapshot = attempt.clone();
            set.spawn(async move { run_guarded(child.as_ref(), &child_ctx, attempt, snapshot).await });
        }

        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(value)) => {
                    // A winner was found: cancel the rest, but don't abort
                    // them by dropping `set` here — that would drop each
                    // loser's future mid-`.await`, before it ever runs the
                    // code that checks `child_ctx` again. Hand the
                    // remaining tasks (and the guard that keeps
                    // `child_ctx` linked to the parent) to a detached
                    // drain task so losers run to their next checkpoint
                    // and actually observe the cancellation.
                    child_ctx.cancel();
                    tokio::spawn(async move {
                        let _guard = guard;
                        while set.join_next().await.is_some() {}
                    });
                    return Ok(value);
                },
                Ok(Err(e)) => failures.push(e),
                Err(_join_err) => {
                    // A child task itself never aborts/panics past
                    // `run_guarded`'s containment, so this branch is
                    // unreachable in practice; treat it as a lost race
                    // contender rather than crash the whole race.
                },
            }
        }

        Err(Error::aggregate(self.name.clone(), original, ErrorKind::AllFailed, failures))
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
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::adapters::Apply;

    #[derive(Debug, thiserror::Error)]
    #[error("lost")]
    struct Lost;

    #[tokio::test]
    async fn empty_race_is_the_identity() {
        let race: Race<i32> = Race::new("race", vec![]);
        assert_eq!(race.process(&Context::new(), 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn fastest_success_wins_and_losers_observe_cancellation() {
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cancel);
        let slow: ArcStage<i32> = Arc::new(Apply::new("slow", move |ctx: Context, _n: i32| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if ctx.is_done() {
                    flag.store(true, Ordering::SeqCst);
                }
                Ok::<_, Lost>(1)
            }
        }));
        let fast: ArcStage<i32> = Arc::new(Apply::new("fast", |_ctx, _n: i32| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, Lost>(2)
        }));
        let race = Race::new("race", vec![slow, fast]);
        let result = race.process(&Context::new(), 0).await.unwrap();
        assert_eq!(result, 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn every_child_failing_returns_an_aggregate_error() {
        let one: ArcStage<i32> = Arc::new(Apply::new("one", |_ctx, _n: i32| async move { Err::<i32, _>(Lost) }));
        let two: ArcStage<i32> = Arc::new(Apply::new("two", |_ctx, _n: i32| async move { Err::<i32, _>(Lost) }));
        let race = Race::new("race", vec![one, two]);
        let err = race.process(&Context::new(), 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllFailed);
    }
}
