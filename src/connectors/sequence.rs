use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::{check_index_bound, check_insert_bound, close_once};
use crate::context::Context;
use crate::error::{StageResult, Structural};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Applies children in registration order, threading each output into
/// the next input. Stops at the first failing child.
///
/// An empty `Sequence` is the identity function.
pub struct Sequence<T: Cloneable> {
    name: String,
    children: RwLock<Vec<ArcStage<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T: Cloneable> Sequence<T> {
    /// Builds a `Sequence` from an initial, possibly empty, child list.
    pub fn new(name: impl Into<String>, children: Vec<ArcStage<T>>) -> Self {
        Self { name: name.into(), children: RwLock::new(children), closed: OnceCell::new() }
    }

    /// Current number of children.
    pub async fn len(&self) -> usize {
        self.children.read().await.len()
    }

    /// `true` iff this `Sequence` has no children.
    pub async fn is_empty(&self) -> bool {
        self.children.read().await.is_empty()
    }

    /// A cloned snapshot of the current child list.
    pub async fn snapshot(&self) -> Vec<ArcStage<T>> {
        self.children.read().await.clone()
    }

    /// Appends a child to the end of the list.
    pub async fn append(&self, child: ArcStage<T>) {
        self.children.write().await.push(child);
    }

    /// Prepends a child to the front of the list.
    pub async fn prepend(&self, child: ArcStage<T>) {
        self.children.write().await.insert(0, child);
    }

    /// Inserts a child at `index`, shifting later children back.
    /// Bounds-checked: `index` may equal the current length (insert at
    /// end) but not exceed it.
    pub async fn insert(&self, index: usize, child: ArcStage<T>) -> Result<(), Structural> {
        let mut guard = self.children.write().await;
        check_insert_bound(index, guard.len())?;
        guard.insert(index, child);
        Ok(())
    }

    /// Removes and returns the child at `index`.
    pub async fn remove(&self, index: usize) -> Result<ArcStage<T>, Structural> {
        let mut guard = self.children.write().await;
        check_index_bound(index, guard.len())?;
        Ok(guard.remove(index))
    }

    /// Replaces the entire child list.
    pub async fn replace_all(&self, children: Vec<ArcStage<T>>) {
        *self.children.write().await = children;
    }
}

#[async_trait]
impl<T: Cloneable> Stage<T> for Sequence<T> {
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let children = self.children.read().await.clone();
        let original = input.clone();
        let mut value = input;
        for child in &children {
            let snapshot = value.clone();
            match run_guarded(child.as_ref(), ctx, value, snapshot).await {
                Ok(next) => value = next,
                Err(e) => return Err(e.wrap_same_kind(self.name.clone(), original)),
            }
        }
        Ok(value)
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

impl<T: Cloneable> std::fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::adapters::{Apply, Transform};
    use crate::error::ErrorKind;

    #[derive(Debug, thiserror::Error)]
    #[error("sequence child failed")]
    struct ChildFailed;

    #[tokio::test]
    async fn empty_sequence_is_the_identity() {
        let seq: Sequence<i32> = Sequence::new("empty", vec![]);
        let result = seq.process(&Context::new(), 42).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn applies_children_left_to_right() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let o1 = Arc::clone(&order);
        let first: ArcStage<i32> = Arc::new(Apply::new("first", move |_ctx, n: i32| {
            let o1 = Arc::clone(&o1);
            async move {
                o1.lock().unwrap().push("first");
                Ok::<_, ChildFailed>(n + 1)
            }
        }));
        let o2 = Arc::clone(&order);
        let second: ArcStage<i32> = Arc::new(Apply::new("second", move |_ctx, n: i32| {
            let o2 = Arc::clone(&o2);
            async move {
                o2.lock().unwrap().push("second");
                Ok::<_, ChildFailed>(n * 3)
            }
        }));
        let seq = Sequence::new("seq", vec![first, second]);
        let result = seq.process(&Context::new(), 1).await.unwrap();
        assert_eq!(result, 6); // (1 + 1) * 3
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stops_at_the_first_failing_child() {
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let ok: ArcStage<i32> = Arc::new(Transform::new("ok", |n| n));
        let fails: ArcStage<i32> = Arc::new(Apply::new("fails", move |_ctx, _n: i32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<i32, _>(ChildFailed)
            }
        }));
        let never: ArcStage<i32> = Arc::new(Apply::new("never", move |_ctx, _n: i32| async move {
            panic!("must not run after an earlier child fails")
        }));
        let seq = Sequence::new("seq", vec![ok, fails, never]);

        let err = seq.process(&Context::new(), 5).await.unwrap_err();
        assert_eq!(err.path(), &["seq", "fails"]);
        assert_eq!(err.kind(), ErrorKind::UserFailure);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_childs_input_data_is_its_own_entry_value_not_the_original() {
        let double: ArcStage<i32> = Arc::new(Transform::new("double", |n| n * 2));
        let fails: ArcStage<i32> =
            Arc::new(Apply::new("fails", |_ctx, _n: i32| async move { Err::<i32, _>(ChildFailed) }));
        let seq = Sequence::new("seq", vec![double, fails]);

        let err = seq.process(&Context::new(), 5).await.unwrap_err();
        // The failing child ("fails") saw 10 (5 doubled), not the
        // Sequence's own original input of 5.
        assert_eq!(*err.input_data(), 10);
    }

    #[tokio::test]
    async fn mutation_api_is_bounds_checked_not_panicking() {
        let seq: Sequence<i32> = Sequence::new("seq", vec![]);
        assert!(seq.insert(1, Arc::new(Transform::new("x", |n| n))).await.is_err());
        assert!(seq.remove(0).await.is_err());
    }

    #[tokio::test]
    async fn append_prepend_and_snapshot_round_trip() {
        let seq: Sequence<i32> = Sequence::new("seq", vec![]);
        seq.append(Arc::new(Transform::new("b", |n| n))).await;
        seq.prepend(Arc::new(Transform::new("a", |n| n))).await;
        let snapshot = seq.snapshot().await;
        assert_eq!(snapshot.iter().map(|s| s.name()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
