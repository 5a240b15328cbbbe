//! Pull-preserving transforms: the output pull drives the upstream pull
//! directly, one step at a time, without background work.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use super::{Channel, Element, Signal};
use crate::cause::{Cause, Exit};
use crate::nonempty::NonEmptyVec;
use crate::pull::{BoxPull, Pull, PullResult, Step};
use crate::runtime::{BoxFuture, ScopeExit};

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Transform every emitted element.
    pub fn map<Out2, F>(self, f: F) -> Channel<Out2, OutErr, OutDone, In, InErr, InDone>
    where
        Out2: Element,
        F: Fn(Out) -> Out2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            let f = f.clone();
            MapPull {
                upstream,
                step: move |step: Step<Out, OutDone>| step.map_emit(|batch| batch.map(|a| f(a))),
            }
            .boxed()
        })
    }

    /// Transform the completion value.
    pub fn map_done<OutDone2, F>(self, f: F) -> Channel<Out, OutErr, OutDone2, In, InErr, InDone>
    where
        OutDone2: Signal,
        F: Fn(OutDone) -> OutDone2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            let f = f.clone();
            MapPull {
                upstream,
                step: move |step: Step<Out, OutDone>| step.map_done(|done| f(done)),
            }
            .boxed()
        })
    }

    /// Transform the typed error of every failure, including failures to materialise.
    pub fn map_error<OutErr2, F>(self, f: F) -> Channel<Out, OutErr2, OutDone, In, InErr, InDone>
    where
        OutErr2: Signal,
        F: Fn(OutErr) -> OutErr2 + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let f = f.clone();
            async move {
                match this.materialize(upstream, scope).await {
                    Ok(pull) => Ok(MapErrorPull { upstream: pull, f }.boxed()),
                    Err(cause) => Err(cause.map(|e| f(e))),
                }
            }
        })
    }

    /// Keep only elements matching `predicate`.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&Out) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.filter_map_batch(move |batch| batch.filter(|a| predicate(a)))
    }

    /// Replace each emitted batch with `f(batch)`, skipping batches that come out empty.
    ///
    /// Works on whole batches, so per-element overhead stays out of the hot path.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let evens_as_text = Channel::<u32>::from_array(vec![1, 2, 3, 4])
    ///     .filter_map_batch(|batch| {
    ///         batch.into_iter().filter(|n| n % 2 == 0).map(|n| n.to_string()).collect()
    ///     });
    ///
    /// assert_eq!(evens_as_text.run_collect().await, Ok(vec!["2".to_string(), "4".to_string()]));
    /// # });
    /// ```
    pub fn filter_map_batch<Out2, F>(self, f: F) -> Channel<Out2, OutErr, OutDone, In, InErr, InDone>
    where
        Out2: Element,
        F: Fn(NonEmptyVec<Out>) -> Vec<Out2> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            FilterMapPull {
                upstream,
                f: f.clone(),
            }
            .boxed()
        })
    }

    /// Emit `init`, then every intermediate accumulation of `f`.
    pub fn scan<S, F>(self, init: S, f: F) -> Channel<S, OutErr, OutDone, In, InErr, InDone>
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S, Out) -> S + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            ScanPull {
                upstream,
                state: init.clone(),
                started: false,
                f: f.clone(),
            }
            .boxed()
        })
    }

    /// Like [`scan`](Self::scan) with an effectful step function.
    ///
    /// A failing step ends the channel: accumulations computed before the
    /// failure in the same batch are emitted first.
    pub fn scan_effect<S, F, Fut>(self, init: S, f: F) -> Channel<S, OutErr, OutDone, In, InErr, InDone>
    where
        S: Clone + Send + Sync + 'static,
        F: Fn(S, Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<S, OutErr>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            ScanEffectPull {
                upstream,
                state: init.clone(),
                started: false,
                pending: VecDeque::new(),
                failure: None,
                f: f.clone(),
            }
            .boxed()
        })
    }

    /// Thread state through whole batches.
    ///
    /// `f` receives the state and a batch and returns the next state and
    /// the elements to emit, which may be none.
    pub fn map_accum<S, Out2, F>(self, init: S, f: F) -> Channel<Out2, OutErr, OutDone, In, InErr, InDone>
    where
        S: Clone + Send + Sync + 'static,
        Out2: Element,
        F: Fn(S, NonEmptyVec<Out>) -> (S, Vec<Out2>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.wrap_pull(move |upstream| {
            MapAccumPull {
                upstream,
                state: init.clone(),
                f: f.clone(),
            }
            .boxed()
        })
    }

    /// Emit at most `n` elements.
    ///
    /// Halts with `Some(done)` if the upstream finished first, or `None`
    /// when it was cut short.
    pub fn take(self, n: usize) -> Channel<Out, OutErr, Option<OutDone>, In, InErr, InDone> {
        self.wrap_pull(move |upstream| {
            TakePull {
                upstream,
                remaining: n,
                halted: None,
            }
            .boxed()
        })
    }

    /// Re-batch the output into batches of exactly `size` elements, except
    /// for the last one.
    pub fn rechunk(self, size: usize) -> Self {
        let size = size.max(1);
        self.wrap_pull(move |upstream| {
            RechunkPull {
                upstream,
                size,
                buffer: VecDeque::new(),
                terminal: None,
            }
            .boxed()
        })
    }

    /// Run `f` once the channel terminates, with the outcome it terminated with.
    ///
    /// `f` also runs when the consumer stops early and the enclosing scope
    /// is closed, in which case it sees that scope's exit.
    pub fn on_exit<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ScopeExit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let f = Arc::new(f);
        Channel::from_transform_bracket(move |upstream, scope| {
            let this = self.clone();
            let f = f.clone();
            scope.add_finalizer(move |exit| f(exit));
            this.materialize(upstream, scope)
        })
    }

    /// Enter `span` while materialising and during every pull.
    #[cfg(feature = "tracing")]
    pub fn instrument(self, span: tracing::Span) -> Self {
        use tracing::Instrument as _;

        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let span = span.clone();
            async move {
                let pull = this
                    .materialize(upstream, scope)
                    .instrument(span.clone())
                    .await?;
                Ok(InstrumentedPull { upstream: pull, span }.boxed())
            }
        })
    }
}

// ===== Pulls =====

struct MapPull<A, E, D, F> {
    upstream: BoxPull<A, E, D>,
    step: F,
}

impl<A, B, E, D, D2, F> Pull for MapPull<A, E, D, F>
where
    A: Element,
    B: Send,
    E: Signal,
    D: Signal,
    D2: Send,
    F: Fn(Step<A, D>) -> Step<B, D2> + Send + Sync,
{
    type Out = B;
    type Err = E;
    type Done = D2;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E, D2>> {
        Box::pin(async move {
            let step = self.upstream.pull().await?;
            Ok((self.step)(step))
        })
    }
}

struct MapErrorPull<A, E, D, F> {
    upstream: BoxPull<A, E, D>,
    f: Arc<F>,
}

impl<A, E, E2, D, F> Pull for MapErrorPull<A, E, D, F>
where
    A: Element,
    E: Signal,
    E2: Send,
    D: Signal,
    F: Fn(E) -> E2 + Send + Sync,
{
    type Out = A;
    type Err = E2;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E2, D>> {
        Box::pin(async move {
            let f = &self.f;
            self.upstream.pull().await.map_err(|cause| cause.map(|e| f(e)))
        })
    }
}

struct FilterMapPull<A, E, D, F> {
    upstream: BoxPull<A, E, D>,
    f: Arc<F>,
}

impl<A, B, E, D, F> Pull for FilterMapPull<A, E, D, F>
where
    A: Element,
    B: Send,
    E: Signal,
    D: Signal,
    F: Fn(NonEmptyVec<A>) -> Vec<B> + Send + Sync,
{
    type Out = B;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E, D>> {
        Box::pin(async move {
            loop {
                match self.upstream.pull().await? {
                    Step::Emit(batch) => {
                        if let Some(out) = NonEmptyVec::from_vec((self.f)(batch)) {
                            return Ok(Step::Emit(out));
                        }
                    }
                    Step::Halt(done) => return Ok(Step::Halt(done)),
                }
            }
        })
    }
}

struct ScanPull<A, E, D, S, F> {
    upstream: BoxPull<A, E, D>,
    state: S,
    started: bool,
    f: Arc<F>,
}

impl<A, E, D, S, F> Pull for ScanPull<A, E, D, S, F>
where
    A: Element,
    E: Signal,
    D: Signal,
    S: Clone + Send + Sync,
    F: Fn(S, A) -> S + Send + Sync,
{
    type Out = S;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<S, E, D>> {
        Box::pin(async move {
            if !self.started {
                self.started = true;
                return Ok(Step::Emit(NonEmptyVec::singleton(self.state.clone())));
            }
            match self.upstream.pull().await? {
                Step::Emit(batch) => {
                    let f = &self.f;
                    let state = &mut self.state;
                    Ok(Step::Emit(batch.map(|a| {
                        *state = f(state.clone(), a);
                        state.clone()
                    })))
                }
                Step::Halt(done) => Ok(Step::Halt(done)),
            }
        })
    }
}

struct ScanEffectPull<A, E, D, S, F> {
    upstream: BoxPull<A, E, D>,
    state: S,
    started: bool,
    pending: VecDeque<A>,
    failure: Option<Cause<E>>,
    f: Arc<F>,
}

impl<A, E, D, S, F, Fut> Pull for ScanEffectPull<A, E, D, S, F>
where
    A: Element,
    E: Signal,
    D: Signal,
    S: Clone + Send + Sync,
    F: Fn(S, A) -> Fut + Send + Sync,
    Fut: Future<Output = Exit<S, E>> + Send,
{
    type Out = S;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<S, E, D>> {
        Box::pin(async move {
            if !self.started {
                self.started = true;
                return Ok(Step::Emit(NonEmptyVec::singleton(self.state.clone())));
            }
            if let Some(cause) = self.failure.take() {
                return Err(cause);
            }
            loop {
                if self.pending.is_empty() {
                    match self.upstream.pull().await? {
                        Step::Emit(batch) => self.pending.extend(batch),
                        Step::Halt(done) => return Ok(Step::Halt(done)),
                    }
                }
                let mut out = Vec::with_capacity(self.pending.len());
                while let Some(a) = self.pending.pop_front() {
                    match (self.f)(self.state.clone(), a).await {
                        Ok(next) => {
                            out.push(next.clone());
                            self.state = next;
                        }
                        Err(cause) => {
                            self.pending.clear();
                            if out.is_empty() {
                                return Err(cause);
                            }
                            self.failure = Some(cause);
                            break;
                        }
                    }
                }
                if let Some(batch) = NonEmptyVec::from_vec(out) {
                    return Ok(Step::Emit(batch));
                }
            }
        })
    }
}

struct MapAccumPull<A, E, D, S, F> {
    upstream: BoxPull<A, E, D>,
    state: S,
    f: Arc<F>,
}

impl<A, B, E, D, S, F> Pull for MapAccumPull<A, E, D, S, F>
where
    A: Element,
    B: Send,
    E: Signal,
    D: Signal,
    S: Clone + Send + Sync,
    F: Fn(S, NonEmptyVec<A>) -> (S, Vec<B>) + Send + Sync,
{
    type Out = B;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E, D>> {
        Box::pin(async move {
            loop {
                match self.upstream.pull().await? {
                    Step::Emit(batch) => {
                        let (next, out) = (self.f)(self.state.clone(), batch);
                        self.state = next;
                        if let Some(out) = NonEmptyVec::from_vec(out) {
                            return Ok(Step::Emit(out));
                        }
                    }
                    Step::Halt(done) => return Ok(Step::Halt(done)),
                }
            }
        })
    }
}

struct TakePull<A, E, D> {
    upstream: BoxPull<A, E, D>,
    remaining: usize,
    halted: Option<Option<D>>,
}

impl<A, E, D> Pull for TakePull<A, E, D>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    type Out = A;
    type Err = E;
    type Done = Option<D>;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, Option<D>>> {
        Box::pin(async move {
            if let Some(done) = &self.halted {
                return Ok(Step::Halt(done.clone()));
            }
            if self.remaining == 0 {
                self.halted = Some(None);
                return Ok(Step::Halt(None));
            }
            match self.upstream.pull().await? {
                Step::Emit(mut batch) => {
                    if batch.len() >= self.remaining {
                        batch.truncate(self.remaining);
                        self.remaining = 0;
                    } else {
                        self.remaining -= batch.len();
                    }
                    Ok(Step::Emit(batch))
                }
                Step::Halt(done) => {
                    self.halted = Some(Some(done.clone()));
                    Ok(Step::Halt(Some(done)))
                }
            }
        })
    }
}

struct RechunkPull<A, E, D> {
    upstream: BoxPull<A, E, D>,
    size: usize,
    buffer: VecDeque<A>,
    terminal: Option<Result<D, Cause<E>>>,
}

impl<A, E, D> RechunkPull<A, E, D> {
    fn split_off(&mut self, n: usize) -> Option<NonEmptyVec<A>> {
        let n = n.min(self.buffer.len());
        NonEmptyVec::from_vec(self.buffer.drain(..n).collect())
    }
}

impl<A, E, D> Pull for RechunkPull<A, E, D>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    type Out = A;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, D>> {
        Box::pin(async move {
            loop {
                if self.buffer.len() >= self.size {
                    if let Some(batch) = self.split_off(self.size) {
                        return Ok(Step::Emit(batch));
                    }
                }
                // Leftovers are flushed before the terminal outcome.
                if let Some(terminal) = self.terminal.clone() {
                    if let Some(batch) = self.split_off(self.size) {
                        return Ok(Step::Emit(batch));
                    }
                    return terminal.map(Step::Halt);
                }
                match self.upstream.pull().await {
                    Ok(Step::Emit(batch)) => self.buffer.extend(batch),
                    Ok(Step::Halt(done)) => self.terminal = Some(Ok(done)),
                    Err(cause) => self.terminal = Some(Err(cause)),
                }
            }
        })
    }
}

#[cfg(feature = "tracing")]
struct InstrumentedPull<A, E, D> {
    upstream: BoxPull<A, E, D>,
    span: tracing::Span,
}

#[cfg(feature = "tracing")]
impl<A, E, D> Pull for InstrumentedPull<A, E, D>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    type Out = A;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, D>> {
        use tracing::Instrument as _;

        let span = self.span.clone();
        Box::pin(self.upstream.pull().instrument(span))
    }
}
