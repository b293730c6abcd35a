//! Shared helpers used by more than one connector: bounds-checked list
//! mutation (never a panic) and the common ctx-to-error conversion for
//! cancellation/timeout failures.

use tokio::sync::OnceCell;

use crate::context::Context;
use crate::error::{Error, ErrorKind, Structural};
use crate::stage::{CloseResult, Cloneable};

/// Checks `index <= len` (the bound allowed for an insert-at-end) and
/// returns a structured [`Structural::IndexOutOfBounds`] otherwise,
/// never a panic.
pub fn check_insert_bound(index: usize, len: usize) -> Result<(), Structural> {
    if index > len {
        Err(Structural::IndexOutOfBounds { index, len })
    } else {
        Ok(())
    }
}

/// Checks `index < len` (the bound required to read or remove an
/// existing element).
pub fn check_index_bound(index: usize, len: usize) -> Result<(), Structural> {
    if index >= len {
        Err(Structural::IndexOutOfBounds { index, len })
    } else {
        Ok(())
    }
}

/// If `ctx` is already done, produces the ctx-flag-bearing [`Error<T>`]
/// every connector that polls ctx before acting must return: check ctx,
/// and if canceled or past its deadline, return a ctx-flag-bearing
/// `Error<T>` instead of proceeding.
pub fn ctx_error<T: Cloneable>(name: &str, input: T, ctx: &Context) -> Error<T> {
    if ctx.is_deadline_expired() {
        Error::new(name, input, ErrorKind::Timeout, Structural::DeadlineExceeded).with_timeout()
    } else {
        Error::new(name, input, ErrorKind::Cancellation, Structural::Canceled).with_canceled()
    }
}

/// Memoized idempotent close: runs `f` exactly once across however many
/// times `close` is invoked, returning the same outcome thereafter.
pub async fn close_once<F>(cell: &OnceCell<CloseResult>, f: F) -> CloseResult
where
    F: std::future::Future<Output = CloseResult>,
{
    cell.get_or_init(|| f).await.clone()
}
