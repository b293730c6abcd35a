//! Cancellation and deadline propagation.
//!
//! A hand-rolled cancellation token (atomic bool + `tokio::sync::Notify`),
//! extended here with deadline derivation and the "values-preserving,
//! cancellation-dropping" detach used by
//! [`Scaffold`](crate::connectors::scaffold::Scaffold).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state: cancelling one
/// immediately makes every clone observe `is_cancelled() == true`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new token that is **not** cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner { cancelled: AtomicBool::new(false), notify: Notify::new() }),
        }
    }

    /// Signals cancellation. Idempotent — calling more than once is harmless.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A future that completes when the token is cancelled.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// Per-call cancellation/deadline/value carrier threaded through every
/// [`Stage::process`](crate::stage::Stage::process) invocation.
///
/// `Context` is intentionally minimal: it exists to let a connector
/// observe cancellation promptly — selecting on both the timer or
/// child-completion and ctx-done wherever it waits — and to derive
/// scoped children for [`Timeout`](crate::connectors::timeout::Timeout)
/// and [`Scaffold`](crate::connectors::scaffold::Scaffold).
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A fresh, uncancelled context with no deadline — the usual entry
    /// point for a top-level `Process` call.
    #[must_use]
    pub fn new() -> Self {
        Self { token: CancellationToken::new(), deadline: None }
    }

    /// Wraps an existing token into a context with no deadline.
    #[must_use]
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token, deadline: None }
    }

    /// Returns a reference to the underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// `true` iff the caller has cancelled, or a deadline has elapsed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `true` iff `is_done` is caused by an elapsed deadline rather than
    /// explicit cancellation of the underlying token.
    #[must_use]
    pub fn is_deadline_expired(&self) -> bool {
        !self.token.is_cancelled() && self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Requests cancellation on the shared token. Any context derived
    /// from (or sharing) this token observes it immediately, *except*
    /// contexts produced by [`Context::child_detached`].
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Completes when the context is done (cancelled or past deadline).
    pub async fn done(&self) {
        match self.deadline {
            None => self.token.cancelled().await,
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(deadline.into());
                tokio::select! {
                    () = self.token.cancelled() => {},
                    () = sleep => {},
                }
            },
        }
    }

    /// Derives a child context sharing this context's cancellation but
    /// with a new deadline that is the minimum of any existing deadline
    /// and `now + duration`. Used by
    /// [`Timeout`](crate::connectors::timeout::Timeout).
    #[must_use]
    pub fn child_with_deadline(&self, duration: Duration) -> Self {
        let candidate = Instant::now() + duration;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self { token: self.token.clone(), deadline: Some(deadline) }
    }

    /// Derives a child context that **drops** this context's
    /// cancellation (a fresh, independent token) while carrying no
    /// deadline. Used exclusively by
    /// [`Scaffold`](crate::connectors::scaffold::Scaffold) so detached
    /// work survives the caller cancelling the original context.
    #[must_use]
    pub fn child_detached(&self) -> Self {
        Self { token: CancellationToken::new(), deadline: None }
    }

    /// Derives a child context with a **fresh** cancellation token that
    /// still mirrors this context's own cancellation (so a child stage
    /// polling its ctx still observes the caller cancelling) but can
    /// also be cancelled independently, without reaching back to cancel
    /// the caller's own token.
    ///
    /// Used by [`Race`](crate::connectors::race::Race) and
    /// [`Contest`](crate::connectors::contest::Contest) to cancel every
    /// still-running child once a winner is selected, without mutating
    /// the context the caller handed in.
    ///
    /// Returns the derived context together with a [`LinkGuard`]; keep
    /// the guard alive for as long as the derived context is in use —
    /// dropping it stops the background task that keeps the two tokens
    /// linked.
    #[must_use]
    pub fn child_linked(&self) -> (Self, LinkGuard) {
        let child_token = CancellationToken::new();
        let stop = Arc::new(Notify::new());
        let outer = self.clone();
        let linked_token = child_token.clone();
        let stop_watch = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::select! {
                () = outer.done() => linked_token.cancel(),
                () = stop_watch.notified() => {},
            }
        });
        (Self { token: child_token, deadline: self.deadline }, LinkGuard { stop })
    }
}

/// Keeps a [`Context::child_linked`] derivation alive. Dropping this
/// guard stops the background task that propagates the parent
/// context's cancellation into the derived child token; it does not
/// itself cancel anything.
pub struct LinkGuard {
    stop: Arc<Notify>,
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        self.stop.notify_waiters();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Abstraction over wall-clock time so [`Backoff`](crate::connectors::backoff::Backoff)
/// and [`Timeout`](crate::connectors::timeout::Timeout) can be driven
/// deterministically under test.
///
/// The default implementation (`TokioClock`) defers to `tokio::time`,
/// which is itself mockable via `tokio::time::pause`/`advance` in tests
/// — so most tests do not need a custom `Clock` at all. A custom impl is
/// provided for scenarios (e.g. S3) that assert on the *sequence* of
/// requested durations rather than on wall-clock elapsed time.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// The current instant according to this clock.
    fn now(&self) -> Instant;

    /// Waits for approximately `duration`.
    async fn sleep(&self, duration: Duration);
}

/// The default [`Clock`], backed by `tokio::time`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent_and_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("cancelled() should resolve without waiting");
    }

    #[tokio::test]
    async fn context_is_done_reflects_cancellation() {
        let ctx = Context::new();
        assert!(!ctx.is_done());
        ctx.cancel();
        assert!(ctx.is_done());
        assert!(!ctx.is_deadline_expired());
    }

    #[tokio::test]
    async fn context_is_done_reflects_elapsed_deadline() {
        let ctx = Context::new().child_with_deadline(Duration::from_millis(10));
        assert!(!ctx.is_done());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.is_done());
        assert!(ctx.is_deadline_expired());
    }

    #[test]
    fn child_with_deadline_keeps_the_tighter_bound() {
        let parent = Context::new().child_with_deadline(Duration::from_millis(10));
        let child = parent.child_with_deadline(Duration::from_secs(60));
        // The child requested a looser deadline, so the parent's tighter
        // one should win.
        assert_eq!(parent.deadline, child.deadline);
    }

    #[tokio::test]
    async fn child_detached_does_not_observe_parent_cancellation() {
        let parent = Context::new();
        let child = parent.child_detached();
        parent.cancel();
        assert!(parent.is_done());
        assert!(!child.is_done());
    }

    #[tokio::test]
    async fn child_linked_observes_parent_cancellation() {
        let parent = Context::new();
        let (child, _guard) = parent.child_linked();
        parent.cancel();
        tokio::time::timeout(Duration::from_millis(50), child.done())
            .await
            .expect("linked child should observe parent cancellation");
    }

    #[tokio::test]
    async fn child_linked_can_be_cancelled_independently_of_parent() {
        let parent = Context::new();
        let (child, _guard) = parent.child_linked();
        child.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }
}
