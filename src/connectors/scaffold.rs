use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::StageResult;
use crate::observability::{emit, Hooks, StageEvent};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// True fire-and-forget dispatch. For each child,
/// clones the input and spawns a detached task running on a context
/// that **drops** the caller's cancellation — so children survive the
/// caller cancelling `ctx` right after `process` returns. `Scaffold`
/// itself returns the original input immediately, without waiting for
/// any child. Child errors and panics are silently dropped; callers
/// observe scaffolded work only through optional event hooks.
pub struct Scaffold<T: Cloneable> {
    name: String,
    children: RwLock<Vec<ArcStage<T>>>,
    hooks: Option<Arc<dyn Hooks<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Scaffold<T> {
    /// Builds a `Scaffold` from an initial, possibly empty, child list.
    pub fn new(name: impl Into<String>, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), children: RwLock::new(children), hooks: None, closed: OnceCell::new() }
    }

    /// Attaches an observability sink, emitting `ScaffoldLaunched`/
    /// `ScaffoldAllLaunched` events.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks<T>>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Number of configured children.
    pub async fn len(&self) -> usize {
        self.children.read().await.len()
    }

    /// Appends a child to the fire-and-forget set.
    pub async fn add(&self, child: ArcStage<T>) {
        self.children.write().await.push(child);
    }

    /// Replaces the entire child list.
    pub async fn replace_all(&self, children: Vec<ArcStage<T>>) {
        *self.children.write().await = children;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Scaffold<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        let detached = ctx.child_detached();

        for (index, child) in children.iter().enumerate() {
            let child = Arc::clone(child);
            let detached = detached.clone();
            let attempt = input.clone();
            let snapshot = attempt.clone();
            tokio::spawn(async move {
                // Errors and panics are dropped by contract; `run_guarded`
                // still contains the panic so it never aborts the task.
                let _ = run_guarded(child.as_ref(), &detached, attempt, snapshot).await;
            });
            emit(self.hooks.as_ref(), StageEvent::ScaffoldLaunched { stage: &self.name, index });
        }
        emit(self.hooks.as_ref(), StageEvent::ScaffoldAllLaunched { stage: &self.name, count: children.len() });

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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::adapters::Apply;

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct Never;

    #[tokio::test]
    async fn returns_input_immediately_without_waiting_for_children() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let child: ArcStage<i32> = Arc::new(Apply::new("slow", move |_ctx, n: i32| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Never>(n)
            }
        }));
        let scaffold = Scaffold::new("scaffold", vec![child]);
        let start = std::time::Instant::now();
        let result = scaffold.process(&Context::new(), 5).await.unwrap();
        assert_eq!(result, 5);
        assert!(start.elapsed() < Duration::from_millis(5));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn scaffolded_work_survives_caller_cancellation() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let child: ArcStage<i32> = Arc::new(Apply::new("slow", move |_ctx, n: i32| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, Never>(n)
            }
        }));
        let scaffold = Scaffold::new("scaffold", vec![child]);
        let ctx = Context::new();
        scaffold.process(&ctx, 5).await.unwrap();
        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_scaffold_returns_input_unchanged() {
        let scaffold: Scaffold<i32> = Scaffold::new("scaffold", vec![]);
        assert_eq!(scaffold.process(&Context::new(), 9).await.unwrap(), 9);
    }
}
