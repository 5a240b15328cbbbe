//! The pull protocol: repeatable, effectful "produce the next step".
//!
//! Every invocation of [`Pull::pull`] resolves to one of three outcomes:
//!
//! - `Ok(Step::Emit(batch))` - a non-empty batch; call again for more
//! - `Ok(Step::Halt(done))` - the producer finished with a completion value
//! - `Err(cause)` - a genuine failure to propagate
//!
//! Completion is a variant of [`Step`], never a failure reason, so recovery
//! operators cannot accidentally swallow it and consumers never see it as an
//! error.
//!
//! # Example
//!
//! ```rust
//! use millrace::pull::{Fused, HaltPull, Pull, Step};
//!
//! # tokio_test::block_on(async {
//! let mut pull = Fused::new(HaltPull::<i32, String, _>::new("eof"));
//! assert!(matches!(pull.pull().await, Ok(Step::Halt("eof"))));
//! // Once halted, always halted.
//! assert!(matches!(pull.pull().await, Ok(Step::Halt("eof"))));
//! # });
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::cause::Cause;
use crate::nonempty::NonEmptyVec;
use crate::runtime::{BoxFuture, ScopeExit};

/// A successful pull outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<A, Done> {
    /// A non-empty batch of output elements.
    Emit(NonEmptyVec<A>),
    /// The producer finished with this completion value.
    Halt(Done),
}

impl<A, Done> Step<A, Done> {
    /// Whether this is an emission.
    pub fn is_emit(&self) -> bool {
        matches!(self, Step::Emit(_))
    }

    /// Whether this is the terminal step.
    pub fn is_halt(&self) -> bool {
        matches!(self, Step::Halt(_))
    }

    /// The emitted batch, if any.
    pub fn into_emit(self) -> Option<NonEmptyVec<A>> {
        match self {
            Step::Emit(batch) => Some(batch),
            Step::Halt(_) => None,
        }
    }

    /// The completion value, if this step is a halt.
    pub fn into_halt(self) -> Option<Done> {
        match self {
            Step::Emit(_) => None,
            Step::Halt(done) => Some(done),
        }
    }

    /// Transform the emitted batch.
    pub fn map_emit<B, F>(self, f: F) -> Step<B, Done>
    where
        F: FnOnce(NonEmptyVec<A>) -> NonEmptyVec<B>,
    {
        match self {
            Step::Emit(batch) => Step::Emit(f(batch)),
            Step::Halt(done) => Step::Halt(done),
        }
    }

    /// Transform the completion value.
    pub fn map_done<D2, F>(self, f: F) -> Step<A, D2>
    where
        F: FnOnce(Done) -> D2,
    {
        match self {
            Step::Emit(batch) => Step::Emit(batch),
            Step::Halt(done) => Step::Halt(f(done)),
        }
    }
}

/// The outcome of one pull: a [`Step`] or a failure.
pub type PullResult<A, E, Done> = Result<Step<A, Done>, Cause<E>>;

/// A boxed, type-erased pull.
pub type BoxPull<A, E, Done> = Box<dyn Pull<Out = A, Err = E, Done = Done>>;

/// A repeatable producer of output batches.
///
/// A pull has exactly one logical caller at a time. Implementations keep
/// their progress in `self` and may suspend inside `pull`.
pub trait Pull: Send {
    /// Element type of emitted batches.
    type Out;
    /// Error type of failures.
    type Err;
    /// Completion value carried by the halt step.
    type Done;

    /// Produce the next step.
    fn pull(&mut self) -> BoxFuture<'_, PullResult<Self::Out, Self::Err, Self::Done>>;

    /// Erase the concrete pull type.
    fn boxed(self) -> BoxPull<Self::Out, Self::Err, Self::Done>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl<P> Pull for Box<P>
where
    P: Pull + ?Sized,
{
    type Out = P::Out;
    type Err = P::Err;
    type Done = P::Done;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<Self::Out, Self::Err, Self::Done>> {
        (**self).pull()
    }
}

// ===== Halt helpers =====

/// A ready halt result.
pub fn halt<A, E, Done>(done: Done) -> PullResult<A, E, Done> {
    Ok(Step::Halt(done))
}

/// A ready halt result carrying no completion value.
pub fn halt_void<A, E>() -> PullResult<A, E, ()> {
    Ok(Step::Halt(()))
}

/// A ready emission of `batch`.
pub fn emit<A, E, Done>(batch: NonEmptyVec<A>) -> PullResult<A, E, Done> {
    Ok(Step::Emit(batch))
}

/// The scope exit matching a terminal pull result.
///
/// Emissions and halts close a scope successfully; failures close it with
/// the erased cause.
pub fn halt_exit<A, E, Done>(result: &PullResult<A, E, Done>) -> ScopeExit {
    match result {
        Ok(_) => Ok(()),
        Err(cause) => Err(cause.erase()),
    }
}

// ===== Simple pulls =====

/// A pull that halts immediately, every time.
pub struct HaltPull<A, E, Done> {
    done: Done,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E, Done> HaltPull<A, E, Done> {
    /// Halt with `done` on every call.
    pub fn new(done: Done) -> Self {
        HaltPull {
            done,
            _marker: PhantomData,
        }
    }
}

impl<A, E> HaltPull<A, E, ()> {
    /// The upstream handed to source channels.
    pub fn void() -> Self {
        HaltPull::new(())
    }
}

impl<A, E, Done> Pull for HaltPull<A, E, Done>
where
    Done: Clone + Send,
{
    type Out = A;
    type Err = E;
    type Done = Done;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, Done>> {
        let done = self.done.clone();
        Box::pin(async move { Ok(Step::Halt(done)) })
    }
}

impl<A, E, Done: fmt::Debug> fmt::Debug for HaltPull<A, E, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HaltPull").field("done", &self.done).finish()
    }
}

/// A pull that fails with the same cause on every call.
pub struct FailPull<A, E, Done> {
    cause: Cause<E>,
    _marker: PhantomData<fn() -> (A, Done)>,
}

impl<A, E, Done> FailPull<A, E, Done> {
    /// Fail with `cause` on every call.
    pub fn new(cause: Cause<E>) -> Self {
        FailPull {
            cause,
            _marker: PhantomData,
        }
    }
}

impl<A, E, Done> Pull for FailPull<A, E, Done>
where
    E: Clone + Send,
{
    type Out = A;
    type Err = E;
    type Done = Done;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, Done>> {
        let cause = self.cause.clone();
        Box::pin(async move { Err(cause) })
    }
}

impl<A, E: fmt::Debug, Done> fmt::Debug for FailPull<A, E, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailPull").field("cause", &self.cause).finish()
    }
}

// ===== Fused =====

/// Makes termination idempotent: once the inner pull halts, every later
/// call halts again with the same value without touching the inner pull.
pub struct Fused<P: Pull> {
    inner: P,
    halted: Option<P::Done>,
}

impl<P: Pull> Fused<P> {
    /// Wrap `inner`.
    pub fn new(inner: P) -> Self {
        Fused {
            inner,
            halted: None,
        }
    }

    /// Whether a halt has been observed.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }
}

impl<P> Pull for Fused<P>
where
    P: Pull,
    P::Done: Clone + Send,
{
    type Out = P::Out;
    type Err = P::Err;
    type Done = P::Done;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<P::Out, P::Err, P::Done>> {
        Box::pin(async move {
            if let Some(done) = &self.halted {
                return Ok(Step::Halt(done.clone()));
            }
            let result = self.inner.pull().await;
            if let Ok(Step::Halt(done)) = &result {
                self.halted = Some(done.clone());
            }
            result
        })
    }
}

impl<P: Pull> fmt::Debug for Fused<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fused")
            .field("halted", &self.halted.is_some())
            .finish()
    }
}

// ===== SharedPull =====

/// A pull shared by several consumers that take turns.
///
/// Calls are serialized; a halt observed by one consumer is observed by all
/// of them afterwards.
pub struct SharedPull<A, E, Done> {
    inner: Arc<tokio::sync::Mutex<Fused<BoxPull<A, E, Done>>>>,
}

impl<A, E, Done> SharedPull<A, E, Done> {
    /// Share `pull`.
    pub fn new(pull: BoxPull<A, E, Done>) -> Self {
        SharedPull {
            inner: Arc::new(tokio::sync::Mutex::new(Fused::new(pull))),
        }
    }
}

impl<A, E, Done> Clone for SharedPull<A, E, Done> {
    fn clone(&self) -> Self {
        SharedPull {
            inner: self.inner.clone(),
        }
    }
}

impl<A, E, Done> Pull for SharedPull<A, E, Done>
where
    A: 'static,
    E: 'static,
    Done: Clone + Send + 'static,
{
    type Out = A;
    type Err = E;
    type Done = Done;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, Done>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            guard.pull().await
        })
    }
}

impl<A, E, Done> fmt::Debug for SharedPull<A, E, Done> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPull")
            .field("consumers", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// The upstream of a channel that has no input.
pub(crate) fn void_upstream<A, E>() -> BoxPull<A, E, ()>
where
    A: 'static,
    E: 'static,
{
    Box::new(HaltPull::<A, E, ()>::void())
}
