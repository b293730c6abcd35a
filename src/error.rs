//! The structured failure type shared by every [`Stage`](crate::stage::Stage).
//!
//! `Error<T>` carries enough structure to answer "where did this fail,
//! with what input, and why" without forcing callers to parse a message
//! string. See the crate-level docs for the invariants this type upholds.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use smallvec::SmallVec;

use crate::stage::Cloneable;

/// Inline-friendly storage for the path of stage names from outermost
/// connector to innermost failing stage. Most pipelines nest only a few
/// connectors deep, so four entries are kept inline before spilling to
/// the heap.
pub type Path = SmallVec<[String; 4]>;

/// Coarse classification of why a [`Stage`](crate::stage::Stage) failed.
///
/// This is additive structure on top of the `Timeout`/`Canceled` flags
/// on [`Error`]: every [`Error`] still sets those two flags according to
/// spec, and `kind` lets callers `match` on the full taxonomy without
/// string-matching the rendered path.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A leaf's user-supplied function returned an error.
    UserFailure,
    /// A leaf or user function panicked; converted at the stage boundary.
    Panic,
    /// The caller's context was cancelled.
    Cancellation,
    /// A deadline expired.
    Timeout,
    /// [`Switch`](crate::connectors::switch::Switch) had no route for the computed key.
    NoRoute,
    /// [`Contest`](crate::connectors::contest::Contest) had no child produce a qualifying result.
    NoWinner,
    /// [`Retry`](crate::connectors::retry::Retry) or [`Backoff`](crate::connectors::backoff::Backoff) exhausted its attempts.
    Exhausted,
    /// [`Fallback`](crate::connectors::fallback::Fallback) exhausted its child list.
    AllFailed,
    /// A connector mutation API received an out-of-range index.
    IndexOutOfBounds,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UserFailure => "user failure",
            Self::Panic => "panic",
            Self::Cancellation => "cancellation",
            Self::Timeout => "timeout",
            Self::NoRoute => "no route",
            Self::NoWinner => "no winner",
            Self::Exhausted => "exhausted",
            Self::AllFailed => "all failed",
            Self::IndexOutOfBounds => "index out of bounds",
        };
        f.write_str(s)
    }
}

/// The underlying cause of an [`Error`].
///
/// Kept separate from `Error` itself so that a nested `Error<T>` cause
/// can be distinguished from an opaque leaf error: a wrapped `Error<T>`
/// is reused as the cause rather than erased into a string.
///
/// Holds its payloads behind `Arc` rather than `Box` so that `Error<T>`
/// itself can be `Clone` without requiring the boxed
/// `dyn std::error::Error` to be `Clone` (it generally isn't) — cloning
/// an `Error<T>` only bumps refcounts on its cause chain. This is what
/// lets [`Handle`](crate::connectors::handle::Handle) hand the *same*
/// failure to both the caller and its observational error pipeline.
#[derive(Debug)]
pub enum Cause<T: Cloneable> {
    /// An opaque error produced by user code, a panic payload, or a
    /// connector-internal condition (no-route, no-winner, ...).
    Leaf(Arc<dyn std::error::Error + Send + Sync + 'static>),
    /// A child [`Error<T>`] being propagated outward. Connectors reuse
    /// this variant (rather than re-boxing the message) when wrapping a
    /// child failure.
    Inner(Arc<Error<T>>),
    /// An aggregate of multiple child failures, used by
    /// [`Race`](crate::connectors::race::Race) when every child fails.
    Aggregate(Arc<[Error<T>]>),
}

impl<T: Cloneable> Clone for Cause<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Leaf(e) => Self::Leaf(Arc::clone(e)),
            Self::Inner(e) => Self::Inner(Arc::clone(e)),
            Self::Aggregate(errs) => Self::Aggregate(Arc::clone(errs)),
        }
    }
}

impl<T: Cloneable> fmt::Display for Cause<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(e) => write!(f, "{e}"),
            Self::Inner(e) => write!(f, "{e}"),
            Self::Aggregate(errs) => {
                write!(f, "{} children failed: [", errs.len())?;
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "]")
            },
        }
    }
}

/// Structured failure record produced by any [`Stage`](crate::stage::Stage).
///
/// Field-level invariants:
/// - `path` is non-empty and ordered outermost-first.
/// - `timeout` and `canceled` are mutually exclusive.
/// - `input` is the snapshot taken at the *failing* stage's entry, never
///   rewritten by an outer connector that merely prepends to `path`.
#[derive(Clone)]
pub struct Error<T: Cloneable> {
    path: Path,
    input: T,
    cause: Cause<T>,
    kind: ErrorKind,
    timestamp: SystemTime,
    duration: Option<Duration>,
    timeout: bool,
    canceled: bool,
}

impl<T: Cloneable> Error<T> {
    /// Builds a new error at a leaf stage boundary.
    pub fn new(
        name: impl Into<String>,
        input: T,
        kind: ErrorKind,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        let mut path = Path::new();
        path.push(name.into());
        Self {
            path,
            input,
            cause: Cause::Leaf(Arc::new(cause)),
            kind,
            timestamp: SystemTime::now(),
            duration: None,
            timeout: false,
            canceled: false,
        }
    }

    /// Builds a new error directly from a [`Cause`], used by connectors
    /// that synthesize structural failures (no-route, no-winner,
    /// aggregate) rather than wrapping a `std::error::Error`.
    pub fn from_cause(name: impl Into<String>, input: T, kind: ErrorKind, cause: Cause<T>) -> Self {
        let mut path = Path::new();
        path.push(name.into());
        Self {
            path,
            input,
            cause,
            kind,
            timestamp: SystemTime::now(),
            duration: None,
            timeout: false,
            canceled: false,
        }
    }

    /// Builds an aggregate error from every failed child, used by
    /// [`Race`](crate::connectors::race::Race) when none of its children
    /// succeed.
    pub fn aggregate(name: impl Into<String>, input: T, kind: ErrorKind, errors: Vec<Error<T>>) -> Self {
        Self::from_cause(name, input, kind, Cause::Aggregate(errors.into()))
    }

    /// Marks this error as timeout-caused. Clears `canceled` since the
    /// two flags are mutually exclusive.
    #[must_use]
    pub fn with_timeout(mut self) -> Self {
        self.timeout = true;
        self.canceled = false;
        self.kind = ErrorKind::Timeout;
        self
    }

    /// Marks this error as cancellation-caused. Clears `timeout` since
    /// the two flags are mutually exclusive.
    #[must_use]
    pub fn with_canceled(mut self) -> Self {
        self.canceled = true;
        self.timeout = false;
        self.kind = ErrorKind::Cancellation;
        self
    }

    /// Attaches the elapsed duration from the failing stage's entry to
    /// its failure.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Prepends `name` to the path and reclassifies the outer kind,
    /// reusing `self` as the (now nested) cause. This is the operation
    /// every connector performs when propagating a child failure: a
    /// connector, on propagating a failure from a child, prepends its own
    /// name. `input` is the *connector's* original input, not the
    /// failing child's — `input_data` is set by the innermost failing
    /// stage and is not rewritten here.
    #[must_use]
    pub fn wrap(self, outer_name: impl Into<String>, outer_input: T, outer_kind: ErrorKind) -> Self {
        let mut path = Path::new();
        path.push(outer_name.into());
        path.extend(self.path.iter().cloned());
        Self {
            path,
            input: outer_input,
            timeout: self.timeout,
            canceled: self.canceled,
            timestamp: self.timestamp,
            duration: self.duration,
            kind: outer_kind,
            cause: Cause::Inner(Arc::new(self)),
        }
    }

    /// Like [`Error::wrap`], but keeps this error's own `kind` instead of
    /// reclassifying it. Used by purely structural propagators
    /// (`Sequence`, `Filter`, `Switch`, `Handle`) that do not introduce a
    /// new failure category of their own — only connectors that
    /// genuinely reclassify the failure (`Retry`/`Backoff`'s
    /// `Exhausted`, `Fallback`'s `AllFailed`) use [`Error::wrap`]
    /// directly with an explicit kind.
    #[must_use]
    pub fn wrap_same_kind(self, outer_name: impl Into<String>, outer_input: T) -> Self {
        let kind = self.kind;
        self.wrap(outer_name, outer_input, kind)
    }

    /// The ordered stage-name path, outermost first.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// The rendered path joined with `" → "`.
    #[must_use]
    pub fn path_string(&self) -> String {
        self.path.join(" \u{2192} ")
    }

    /// Snapshot of the input at the failing stage's entry.
    #[must_use]
    pub fn input_data(&self) -> &T {
        &self.input
    }

    /// The failure taxonomy classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The underlying cause.
    #[must_use]
    pub fn cause(&self) -> &Cause<T> {
        &self.cause
    }

    /// `true` iff this failure's direct cause is itself a nested
    /// `Error<T>` (i.e. this error was produced by [`Error::wrap`]).
    #[must_use]
    pub fn cause_error(&self) -> Option<&Error<T>> {
        match &self.cause {
            Cause::Inner(inner) => Some(inner),
            _ => None,
        }
    }

    /// Wall-clock time the failure was recorded.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Elapsed time from the failing stage's entry to its failure, if
    /// the failing connector timed itself.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// `true` iff this failure was caused by deadline expiration.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.timeout
    }

    /// `true` iff this failure was caused by explicit cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Unwraps to the innermost non-`Error` cause, if any. Returns
    /// `None` when the chain bottoms out in a synthesized structural
    /// cause such as [`Cause::Aggregate`].
    #[must_use]
    pub fn root_cause(&self) -> &Cause<T> {
        let mut current = self;
        while let Cause::Inner(inner) = &current.cause {
            current = inner;
        }
        &current.cause
    }
}

impl<T: Cloneable> fmt::Display for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path_string(), self.cause)?;
        if self.timeout {
            write!(f, " (timeout)")?;
        } else if self.canceled {
            write!(f, " (canceled)")?;
        }
        Ok(())
    }
}

impl<T: Cloneable + fmt::Debug> fmt::Debug for Error<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("canceled", &self.canceled)
            .field("duration", &self.duration)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl<T: Cloneable + fmt::Debug> std::error::Error for Error<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Cause::Leaf(e) => Some(e.as_ref()),
            Cause::Inner(e) => Some(e.as_ref()),
            Cause::Aggregate(_) => None,
        }
    }
}

/// Convenience alias for the result every [`Stage::process`](crate::stage::Stage::process) returns.
pub type StageResult<T> = Result<T, Error<T>>;

/// Serializes an `Error<T>` as a flattened snapshot: `path`, `input`,
/// `kind`, `cause` (rendered via `Display`, since `Cause::Leaf` holds a
/// `dyn std::error::Error` that cannot itself derive `Serialize`),
/// `timestamp` (milliseconds since the Unix epoch), `duration_ms`,
/// `timeout`, and `canceled`. One-way: there is no corresponding
/// `Deserialize`, since reconstructing the original cause chain from a
/// rendered string isn't possible.
#[cfg(feature = "serde")]
impl<T: Cloneable + serde::Serialize> serde::Serialize for Error<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Error", 8)?;
        state.serialize_field("path", self.path.as_slice())?;
        state.serialize_field("input", &self.input)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("cause", &self.cause.to_string())?;
        let timestamp_ms =
            self.timestamp.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
        state.serialize_field("timestamp", &timestamp_ms)?;
        state.serialize_field("duration_ms", &self.duration.map(|d| d.as_millis()))?;
        state.serialize_field("timeout", &self.timeout)?;
        state.serialize_field("canceled", &self.canceled)?;
        state.end()
    }
}

/// A structural error with no meaningful source, used for
/// connector-internal conditions (no-route, no-winner, index bounds)
/// that are not wrapping a user error.
#[derive(Debug, thiserror::Error)]
pub enum Structural {
    /// [`Switch`](crate::connectors::switch::Switch) had no route registered for a key.
    #[error("no route for key `{key}`")]
    NoRoute {
        /// The textual rendering of the unmatched key.
        key: String,
    },
    /// [`Contest`](crate::connectors::contest::Contest) had no child satisfy the winning condition.
    #[error("no child produced a qualifying result")]
    NoWinner,
    /// [`Fallback`](crate::connectors::fallback::Fallback) was constructed/invoked with zero children.
    #[error("fallback has no children configured")]
    EmptyFallback,
    /// A connector mutation API received an out-of-range index.
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// The length of the collection at the time of the call.
        len: usize,
    },
    /// The deadline elapsed before the child stage completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Canceled,
    /// A stage panicked; `payload` is the panic message, recovered as a
    /// string where possible.
    #[error("stage panicked: {payload}")]
    Panic {
        /// Best-effort string rendering of the panic payload.
        payload: String,
    },
}
