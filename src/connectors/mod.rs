//! Connectors: [`Stage`](crate::stage::Stage) implementations that
//! compose zero or more child stages.
//!
//! Every connector here follows the same shared disciplines, codified
//! in [`support`]: mutable state lives behind a `tokio::sync::RwLock`
//! and is snapshotted under a read lock before execution; `close` is
//! idempotent via `tokio::sync::OnceCell`; mutation APIs that take an
//! index are bounds-checked and return a structured error rather than
//! panicking.

pub mod support;

mod backoff;
mod concurrent;
mod contest;
mod fallback;
mod filter;
mod handle;
mod race;
mod retry;
mod scaffold;
mod sequence;
mod switch;
mod timeout;

pub use backoff::Backoff;
pub use concurrent::Concurrent;
pub use contest::Contest;
pub use fallback::Fallback;
pub use filter::Filter;
pub use handle::Handle;
pub use race::Race;
pub use retry::Retry;
pub use scaffold::Scaffold;
pub use sequence::Sequence;
pub use switch::Switch;
pub use timeout::Timeout;
