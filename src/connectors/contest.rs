use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinSet;

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult, Structural};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Like [`Race`](crate::connectors::race::Race), but a child only "wins"
/// if it completes without error **and** its result satisfies a
/// `condition`. A completed-but-rejected result does
/// not end the contest: `Contest` keeps waiting on the remaining
/// children. If none ever produce a qualifying result, returns a
/// structured [`Structural::NoWinner`] error.
pub struct Contest<T: Cloneable, C> {
    name: String,
    condition: C,
    children: RwLock<Vec<ArcStage<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T, C> Contest<T, C>
where
    T: Cloneable,
    C: Fn(&Context, &T) -> bool + Send + Sync,
{
    /// Builds a `Contest` from an initial, possibly empty, child list
    /// and a winning `condition`.
    pub fn new(name: impl Into<String>, condition: C, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), condition, children: RwLock::new(children), closed: OnceCell::new() }
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
impl<T, C> Stage<T> for Contest<T, C>
where
    T: Cloneable,
    C: Fn(&Context, &T) -> bool + Send + Sync,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        if children.is_empty() {
            return Err(Error::new(self.name.clone(), input, ErrorKind::NoWinner, Structural::NoWinner));
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

        while let Some(joined) = set.join_next().await {
            if let Ok(Ok(value)) = joined {
                if (self.condition)(ctx, &value) {
                    // Don't drop `set` here: that would abort every
                    // still-running loser mid-`.await`, before it reaches
                    // the code that checks `child_ctx` again. Cancel, then
                    // hand the remaining tasks and the link guard to a
                    // detached drain task so losers run to their next
                    // checkpoint and actually observe the cancellation.
                    child_ctx.cancel();
                    tokio::spawn(async move {
                        let _guard = guard;
                        while set.join_next().await.is_some() {}
                    });
                    return Ok(value);
                }
                // Completed but rejected: not a win, keep waiting on
                // the rest.
            }
        }

        Err(Error::new(self.name.clone(), original, ErrorKind::NoWinner, Structural::NoWinner))
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
