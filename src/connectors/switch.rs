use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};

use crate::connectors::support::close_once;
use crate::context::Context;
use crate::error::{Error, ErrorKind, StageResult, Structural};
use crate::stage::{close_children, run_guarded, ArcStage, CloseResult, Cloneable, Stage};

/// Routes to one of several children by a computed key.
///
/// `K` need not implement [`std::fmt::Display`]; the key is rendered
/// with [`std::fmt::Debug`] into the [`Structural::NoRoute`] error when
/// no route matches.
pub struct Switch<T: Cloneable, K, F> {
    name: String,
    key_fn: F,
    routes: RwLock<HashMap<K, ArcStage<T>>>,
    closed: OnceCell<CloseResult>,
}

impl<T, K, F> Switch<T, K, F>
where
    T: Cloneable,
    K: Eq + Hash + std::fmt::Debug + Clone + Send + Sync + 'static,
    F: Fn(&Context, &T) -> K + Send + Sync,
{
    /// Builds a `Switch` with the given key extractor and initial route
    /// table.
    pub fn new(name: impl Into<String>, key_fn: F, routes: HashMap<K, ArcStage<T>>) -> Self {
        Self { name: name.into(), key_fn, routes: RwLock::new(routes), closed: OnceCell::new() }
    }

    /// Registers (or replaces) the route for `key`.
    pub async fn set_route(&self, key: K, child: ArcStage<T>) {
        self.routes.write().await.insert(key, child);
    }

    /// Removes the route for `key`, if present.
    pub async fn remove_route(&self, key: &K) -> Option<ArcStage<T>> {
        self.routes.write().await.remove(key)
    }

    /// Number of registered routes.
    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }
}

#[async_trait]
impl<T, K, F> Stage<T> for Switch<T, K, F>
where
    T: Cloneable,
    K: Eq + Hash + std::fmt::Debug + Clone + Send + Sync + 'static,
    F: Fn(&Context, &T) -> K + Send + Sync,
{
    async fn process(&self, ctx: &Context, input: T) -> StageResult<T> {
        let key = (self.key_fn)(ctx, &input);
        let child = self.routes.read().await.get(&key).cloned();
        let Some(child) = child else {
            return Err(Error::new(
                self.name.clone(),
                input,
                ErrorKind::NoRoute,
                Structural::NoRoute { key: format!("{key:?}") },
            ));
        };
        let original = input.clone();
        let snapshot = input.clone();
        run_guarded(child.as_ref(), ctx, input, snapshot).await.map_err(|e| e.wrap_same_kind(self.name.clone(), original))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> CloseResult {
        close_once(&self.closed, async {
            let children: Vec<_> = self.routes.read().await.values().cloned().collect();
            close_children(&children).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::Transform;
    use crate::error::ErrorKind;

    fn route_table() -> HashMap<&'static str, ArcStage<i32>> {
        let mut routes = HashMap::new();
        routes.insert("even", Arc::new(Transform::new("even-route", |n: i32| n * 2)) as ArcStage<i32>);
        routes.insert("odd", Arc::new(Transform::new("odd-route", |n: i32| n * 3)) as ArcStage<i32>);
        routes
    }

    fn parity_key(_ctx: &Context, n: &i32) -> &'static str {
        if n % 2 == 0 { "even" } else { "odd" }
    }

    #[tokio::test]
    async fn delegates_to_the_matching_route() {
        let switch = Switch::new("switch", parity_key, route_table());
        assert_eq!(switch.process(&Context::new(), 4).await.unwrap(), 8);
        assert_eq!(switch.process(&Context::new(), 3).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn missing_route_is_a_structured_no_route_error() {
        let switch = Switch::new("switch", |_ctx: &Context, _n: &i32| "missing", route_table());
        let err = switch.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoRoute);
        assert_eq!(err.path(), &["switch"]);
    }

    #[tokio::test]
    async fn routes_are_mutable_at_runtime() {
        let switch = Switch::new("switch", parity_key, HashMap::new());
        assert_eq!(switch.route_count().await, 0);
        switch.set_route("even", Arc::new(Transform::new("even-route", |n: i32| n + 100))).await;
        assert_eq!(switch.process(&Context::new(), 2).await.unwrap(), 102);
        switch.remove_route(&"even").await;
        assert!(switch.process(&Context::new(), 2).await.is_err());
    }
}
