//! Source channels and other leaf constructors.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Channel, Element, Signal, DEFAULT_CHUNK_SIZE};
use crate::cause::{Cause, Defect, Exit};
use crate::nonempty::NonEmptyVec;
use crate::pull::{FailPull, HaltPull, Pull, PullResult, Step};
use crate::runtime::{BoxFuture, Queue, ScopeExit};

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// A channel whose pull is produced by `make`, ignoring the upstream.
    ///
    /// `make` runs once per materialisation.
    pub fn from_pull<F, Fut, P>(make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<P, OutErr>> + Send + 'static,
        P: Pull<Out = Out, Err = OutErr, Done = OutDone> + 'static,
    {
        let make = Arc::new(make);
        Channel::from_transform(move |_upstream, _scope| {
            let make = make.clone();
            async move { Ok(make().await?.boxed()) }
        })
    }

    /// A channel that halts immediately with `done`.
    pub fn end(done: OutDone) -> Self {
        Channel::from_transform(move |_upstream, _scope| {
            let done = done.clone();
            async move { Ok(HaltPull::new(done).boxed()) }
        })
    }

    /// A channel whose first pull fails with `error`.
    pub fn fail(error: OutErr) -> Self {
        Channel::fail_cause(Cause::fail(error))
    }

    /// A channel whose first pull fails with `cause`.
    pub fn fail_cause(cause: Cause<OutErr>) -> Self {
        Channel::from_transform(move |_upstream, _scope| {
            let cause = cause.clone();
            async move { Ok(FailPull::new(cause).boxed()) }
        })
    }

    /// A channel whose first pull fails with a defect.
    pub fn die(defect: Defect) -> Self {
        Channel::fail_cause(Cause::die(defect))
    }

    /// A channel that never emits and never halts.
    pub fn never() -> Self {
        Channel::from_transform(|_upstream, _scope| async move { Ok(NeverPull(PhantomData).boxed()) })
    }

    /// A channel draining `queue`.
    ///
    /// Every materialisation reads from the same queue.
    pub fn from_queue(queue: Queue<Out, OutErr, OutDone>) -> Self {
        Channel::from_transform(move |_upstream, _scope| {
            let queue = queue.clone();
            async move { Ok(queue.into_pull().boxed()) }
        })
    }
}

impl<Out, OutErr, In, InErr, InDone> Channel<Out, OutErr, (), In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// A channel that halts immediately.
    pub fn empty() -> Self {
        Channel::end(())
    }

    /// Emit the items of `iterable` in batches of [`DEFAULT_CHUNK_SIZE`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let letters = Channel::<char>::from_iter("abc".chars().collect::<Vec<_>>());
    /// assert_eq!(letters.run_collect().await, Ok(vec!['a', 'b', 'c']));
    /// # });
    /// ```
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = Out> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Channel::from_iter_chunked(iterable, DEFAULT_CHUNK_SIZE)
    }

    /// Emit the items of `iterable` in batches of at most `chunk_size`.
    pub fn from_iter_chunked<I>(iterable: I, chunk_size: usize) -> Self
    where
        I: IntoIterator<Item = Out> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        let chunk_size = chunk_size.max(1);
        Channel::from_transform(move |_upstream, _scope| {
            let iter = iterable.clone().into_iter();
            async move {
                Ok(IterPull::<_, OutErr> {
                    iter: Some(iter),
                    chunk_size,
                    _marker: PhantomData,
                }
                .boxed())
            }
        })
    }

    /// Emit the elements of `items`.
    pub fn from_array(items: Vec<Out>) -> Self
    where
        Out: Clone + Sync,
    {
        Channel::from_iter(items)
    }

    /// Emit `batch` as a single step.
    pub fn from_chunk(batch: NonEmptyVec<Out>) -> Self
    where
        Out: Clone + Sync,
    {
        Channel::from_transform(move |_upstream, _scope| {
            let batch = batch.clone();
            async move { Ok(OncePull::<_, OutErr>::new(batch).boxed()) }
        })
    }

    /// Emit exactly one element.
    pub fn succeed(value: Out) -> Self
    where
        Out: Clone + Sync,
    {
        Channel::from_chunk(NonEmptyVec::singleton(value))
    }

    /// Emit the value produced by `effect`, or fail with its cause.
    ///
    /// `effect` runs on the first pull of each materialisation.
    pub fn from_effect<F, Fut>(effect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<Out, OutErr>> + Send + 'static,
    {
        let effect = Arc::new(effect);
        Channel::from_transform(move |_upstream, _scope| {
            let effect = effect.clone();
            async move {
                Ok(EffectPull {
                    effect: Some(effect),
                    _marker: PhantomData,
                }
                .boxed())
            }
        })
    }

    /// Acquire a resource, emit it once, and release it when the
    /// materialising scope closes.
    ///
    /// `release` receives the exit the scope was closed with.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let released = Arc::new(AtomicUsize::new(0));
    /// let counter = released.clone();
    ///
    /// let connection = Channel::<&str, String>::acquire_release(
    ///     || async { Ok("conn-1") },
    ///     move |_conn, _exit| {
    ///         let counter = counter.clone();
    ///         async move {
    ///             counter.fetch_add(1, Ordering::SeqCst);
    ///         }
    ///     },
    /// );
    ///
    /// assert_eq!(connection.run_collect().await, Ok(vec!["conn-1"]));
    /// assert_eq!(released.load(Ordering::SeqCst), 1);
    /// # });
    /// ```
    pub fn acquire_release<A, AFut, R, RFut>(acquire: A, release: R) -> Self
    where
        Out: Clone + Sync,
        A: Fn() -> AFut + Send + Sync + 'static,
        AFut: Future<Output = Exit<Out, OutErr>> + Send + 'static,
        R: Fn(Out, ScopeExit) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = ()> + Send + 'static,
    {
        let acquire = Arc::new(acquire);
        let release = Arc::new(release);
        Channel::from_transform(move |_upstream, scope| {
            let acquire = acquire.clone();
            let release = release.clone();
            async move {
                let resource = acquire().await?;
                let held = resource.clone();
                scope.add_finalizer(move |exit| release(held, exit));
                Ok(OncePull::<_, OutErr>::new(NonEmptyVec::singleton(resource)).boxed())
            }
        })
    }
}

impl<A, E, D> Channel<A, E, D, A, E, D>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    /// The channel that forwards its upstream unchanged.
    pub fn identity() -> Self {
        Channel::from_transform(|upstream, _scope| async move { Ok(upstream) })
    }
}

// ===== Source pulls =====

struct IterPull<I, E> {
    iter: Option<I>,
    chunk_size: usize,
    _marker: PhantomData<fn() -> E>,
}

impl<I, E> Pull for IterPull<I, E>
where
    I: Iterator + Send,
    I::Item: Send,
    E: Send,
{
    type Out = I::Item;
    type Err = E;
    type Done = ();

    fn pull(&mut self) -> BoxFuture<'_, PullResult<I::Item, E, ()>> {
        let chunk: Vec<I::Item> = match self.iter.as_mut() {
            Some(iter) => iter.by_ref().take(self.chunk_size).collect(),
            None => Vec::new(),
        };
        let step = match NonEmptyVec::from_vec(chunk) {
            Some(batch) => Step::Emit(batch),
            None => {
                self.iter = None;
                Step::Halt(())
            }
        };
        Box::pin(async move { Ok(step) })
    }
}

/// Emits one batch, then halts.
pub(crate) struct OncePull<A, E> {
    batch: Option<NonEmptyVec<A>>,
    _marker: PhantomData<fn() -> E>,
}

impl<A, E> OncePull<A, E> {
    pub(crate) fn new(batch: NonEmptyVec<A>) -> Self {
        OncePull {
            batch: Some(batch),
            _marker: PhantomData,
        }
    }
}

impl<A: Send, E: Send> Pull for OncePull<A, E> {
    type Out = A;
    type Err = E;
    type Done = ();

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, ()>> {
        let step = match self.batch.take() {
            Some(batch) => Step::Emit(batch),
            None => Step::Halt(()),
        };
        Box::pin(async move { Ok(step) })
    }
}

struct EffectPull<F, A, E> {
    effect: Option<Arc<F>>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<F, Fut, A, E> Pull for EffectPull<F, A, E>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Exit<A, E>> + Send,
    A: Send,
    E: Send,
{
    type Out = A;
    type Err = E;
    type Done = ();

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, ()>> {
        let effect = self.effect.take();
        Box::pin(async move {
            match effect {
                Some(effect) => Ok(Step::Emit(NonEmptyVec::singleton(effect().await?))),
                None => Ok(Step::Halt(())),
            }
        })
    }
}

struct NeverPull<A, E, D>(PhantomData<fn() -> (A, E, D)>);

impl<A: Send, E: Send, D: Send> Pull for NeverPull<A, E, D> {
    type Out = A;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, D>> {
        Box::pin(futures::future::pending())
    }
}

impl<I, E> fmt::Debug for IterPull<I, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterPull")
            .field("chunk_size", &self.chunk_size)
            .field("exhausted", &self.iter.is_none())
            .finish()
    }
}
