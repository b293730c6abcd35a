//! A type-parametric, composable pipeline runtime.
//!
//! The crate's single abstraction is a **Stage**: something that turns
//! a value of type `T` into another `T`, or fails with a structured
//! [`Error<T>`](error::Error), under a caller-supplied cancellation and
//! deadline token ([`Context`](context::Context)). Stages compose:
//! [`connectors`] are themselves `Stage`s that wrap one or more child
//! stages to encode sequencing, conditional routing, parallel fan-out,
//! racing, fallback, bounded retry, timeout enforcement, and
//! fire-and-forget dispatch. [`adapters`] are the trivial leaves —
//! pure transform, fallible transform, side effect, conditional
//! mutate, best-effort enrich — that establish the contract.
//!
//! # Quick start
//!
//! ```
//! use stage_rail::adapters::{Apply, Transform};
//! use stage_rail::connectors::Sequence;
//! use stage_rail::context::Context;
//! use stage_rail::stage::{ArcStage, Stage};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let double: ArcStage<i32> = Arc::new(Transform::new("double", |n: i32| n * 2));
//! let add_one: ArcStage<i32> = Arc::new(Apply::new("add_one", |_ctx: Context, n: i32| async move {
//!     Ok::<i32, std::convert::Infallible>(n + 1)
//! }));
//! let pipeline = Sequence::new("example", vec![double, add_one]);
//!
//! let result = pipeline.process(&Context::new(), 5).await.unwrap();
//! assert_eq!(result, 11);
//! # }
//! ```
//!
//! # Module map
//!
//! - [`error`] — the structured [`Error<T>`](error::Error) record and
//!   failure taxonomy shared by every stage.
//! - [`stage`] — the [`Stage`](stage::Stage) contract, the `Cloneable`
//!   capability (this crate's answer to `Cloner[T]`), and the panic
//!   containment boundary every stage is wrapped in.
//! - [`context`] — [`Context`](context::Context): the per-call
//!   cancellation/deadline carrier, plus the injectable [`Clock`](context::Clock)
//!   used by `Backoff` and `Timeout`.
//! - [`adapters`] — the five leaf adapter kinds.
//! - [`connectors`] — `Sequence`, `Switch`, `Filter`, `Fallback`,
//!   `Retry`, `Backoff`, `Handle`, `Timeout`, `Concurrent`, `Race`,
//!   `Contest`, `Scaffold`.
//! - [`observability`] — the `Hooks<T>` injection surface connectors
//!   report lifecycle events through.
//! - [`tower`] (feature `tower`) — a `tower::Service` adapter so any
//!   `Stage<T>` can be dropped into a `tower::ServiceBuilder` stack.

pub mod adapters;
pub mod connectors;
pub mod context;
pub mod error;
pub mod observability;
pub mod stage;

#[cfg(feature = "tower")]
pub mod tower;

/// Convenience re-exports for the common path: building and running a
/// pipeline. Import everything with `use stage_rail::prelude::*;`.
pub mod prelude {
    pub use crate::context::Context;
    pub use crate::error::{Error, ErrorKind};
    pub use crate::stage::{ArcStage, Cloneable, Stage};
}
