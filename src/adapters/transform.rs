use async_trait::async_trait;

use crate::context::Context;
use crate::error::StageResult;
use crate::stage::{catch_panic, Cloneable, Stage};

/// A pure, infallible transform: `fn(v) = (pure(v), nil)`.
///
/// `Transform` never fails and never inspects `ctx`; it forwards it
/// unread — leaves honor `ctx` by propagating it verbatim, not by
/// polling it themselves.
pub struct Transform<T, F> {
    name: String,
    f: F,
    _marker: std::marker::PhantomData<fn(T) -> T>,
}

impl<T, F> Transform<T, F>
where
    T: Cloneable,
    F: Fn(T) -> T + Send + Sync,
{
    /// Wraps `f` as a named, infallible transform.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, F> Stage<T> for Transform<T, F>
where
    T: Cloneable,
    F: Fn(T) -> T + Send + Sync,
{
    async fn process(&self, _ctx: &Context, input: T) -> StageResult<T> {
        let snapshot = input.clone();
        catch_panic(&self.name, snapshot, async move { Ok((self.f)(input)) }).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn applies_the_pure_function() {
        let double = Transform::new("double", |n: i32| n * 2);
        let result = double.process(&Context::new(), 5).await.unwrap();
        assert_eq!(result, 10);
    }

    #[tokio::test]
    async fn name_is_stable() {
        let stage = Transform::new("double", |n: i32| n * 2);
        assert_eq!(stage.name(), "double");
    }

    #[tokio::test]
    async fn panic_is_contained_as_a_structured_error() {
        use crate::error::ErrorKind;

        let stage = Transform::new("boom", |_n: i32| panic!("nope"));
        let err = stage.process(&Context::new(), 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Panic);
    }
}
