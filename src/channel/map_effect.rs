//! Effectful mapping, sequential or on concurrent fibers, and buffering.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use super::{Channel, Element, MapEffectOptions, Signal};
use crate::cause::{Cause, Exit};
use crate::nonempty::NonEmptyVec;
use crate::pull::{BoxPull, Pull, PullResult, Step};
use crate::runtime::{fork, BoxFuture, Fiber, Queue, Scope, Semaphore, Take};

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Apply an effectful function to every element.
    ///
    /// - With a concurrency of one, elements are processed strictly in
    ///   order and the upstream is only pulled when the previous batch is
    ///   done.
    /// - With a higher limit and `unordered` set, up to that many effects
    ///   run at once and results are emitted as they complete.
    /// - Otherwise effects still run concurrently, but results are emitted
    ///   in input order.
    ///
    /// A failing effect fails the channel; results produced before the
    /// failure are emitted first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::channel::MapEffectOptions;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let squares = Channel::<u64, String>::from_array(vec![1, 2, 3, 4])
    ///     .map_effect(
    ///         |n| async move { Ok(n * n) },
    ///         MapEffectOptions::new().with_concurrency(3),
    ///     );
    ///
    /// assert_eq!(squares.run_collect().await, Ok(vec![1, 4, 9, 16]));
    /// # });
    /// ```
    pub fn map_effect<Out2, F, Fut>(
        self,
        f: F,
        options: MapEffectOptions,
    ) -> Channel<Out2, OutErr, OutDone, In, InErr, InDone>
    where
        Out2: Element,
        F: Fn(Out) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<Out2, OutErr>> + Send + 'static,
    {
        let f = Arc::new(f);
        let limit = options.concurrency().limit();
        if limit == 1 {
            return self.wrap_pull(move |upstream| {
                SequentialPull {
                    upstream,
                    f: f.clone(),
                    pending: VecDeque::new(),
                    failure: None,
                }
                .boxed()
            });
        }

        let buffer_size = options.buffer_size();
        let unordered = options.unordered();
        Channel::from_transform_bracket(move |upstream, scope| {
            let this = self.clone();
            let f = f.clone();
            async move {
                let pull = this.materialize(upstream, scope.clone()).await?;
                let output = Queue::bounded(buffer_size);
                if unordered {
                    fork(&scope, drive_unordered(pull, f, limit, output.clone(), scope.clone()));
                } else {
                    let fibers = Queue::bounded(limit.saturating_sub(2));
                    fork(&scope, drive_ordered(pull, f, fibers.clone(), scope.clone()));
                    fork(&scope, drain_in_order(fibers, output.clone()));
                }
                Ok(output.into_pull().boxed())
            }
        })
    }

    /// Run the channel ahead of its consumer, keeping up to `capacity`
    /// elements ready.
    pub fn buffer(self, capacity: usize) -> Self {
        Channel::from_transform_bracket(move |upstream, scope| {
            let this = self.clone();
            async move {
                let mut pull = this.materialize(upstream, scope.clone()).await?;
                let queue = Queue::bounded(capacity);
                let producer = queue.clone();
                fork(&scope, async move {
                    loop {
                        match pull.pull().await {
                            Ok(Step::Emit(batch)) => {
                                if !producer.offer_all(batch).await {
                                    break;
                                }
                            }
                            Ok(Step::Halt(done)) => {
                                producer.end(done);
                                break;
                            }
                            Err(cause) => {
                                producer.fail_cause(cause);
                                break;
                            }
                        }
                    }
                    Ok::<_, Cause<OutErr>>(())
                });
                Ok(queue.into_pull().boxed())
            }
        })
    }
}

/// Pulls upstream batches and hands each element to a worker fiber, holding
/// a permit per running worker.
async fn drive_unordered<A, B, E, D, F, Fut>(
    mut upstream: BoxPull<A, E, D>,
    f: Arc<F>,
    limit: usize,
    output: Queue<B, E, D>,
    scope: Scope,
) -> Exit<(), E>
where
    A: Element,
    B: Element,
    E: Signal,
    D: Signal,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Exit<B, E>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit));
    loop {
        match upstream.pull().await {
            Ok(Step::Emit(batch)) => {
                for a in batch {
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return Ok(());
                    };
                    let effect = f(a);
                    let output = output.clone();
                    fork(&scope, async move {
                        match effect.await {
                            Ok(b) => {
                                output.offer(b).await;
                            }
                            Err(cause) => {
                                output.fail_cause(cause);
                            }
                        }
                        drop(permit);
                        Ok::<_, Cause<E>>(())
                    });
                }
            }
            Ok(Step::Halt(done)) => {
                // Every worker has offered its result once all permits are back.
                let _all = permits.acquire_many(limit as u32).await;
                output.end(done);
                return Ok(());
            }
            Err(cause) => {
                output.fail_cause(cause);
                return Ok(());
            }
        }
    }
}

/// Forks one fiber per element and queues the fibers in input order. The
/// bounded fiber queue limits how many run at once.
async fn drive_ordered<A, B, E, D, F, Fut>(
    mut upstream: BoxPull<A, E, D>,
    f: Arc<F>,
    fibers: Queue<Fiber<B, E>, E, D>,
    scope: Scope,
) -> Exit<(), E>
where
    A: Element,
    B: Element,
    E: Signal,
    D: Signal,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Exit<B, E>> + Send + 'static,
{
    loop {
        match upstream.pull().await {
            Ok(Step::Emit(batch)) => {
                for a in batch {
                    let fiber = fork(&scope, f(a));
                    if !fibers.offer(fiber).await {
                        return Ok(());
                    }
                }
            }
            Ok(Step::Halt(done)) => {
                fibers.end(done);
                return Ok(());
            }
            Err(cause) => {
                fibers.fail_cause(cause);
                return Ok(());
            }
        }
    }
}

/// Joins queued fibers one by one, forwarding their results in order.
async fn drain_in_order<B, E, D>(fibers: Queue<Fiber<B, E>, E, D>, output: Queue<B, E, D>) -> Exit<(), E>
where
    B: Element,
    E: Signal,
    D: Signal,
{
    loop {
        match fibers.take().await {
            Ok(Take::Item(fiber)) => match fiber.join().await {
                Ok(b) => {
                    if !output.offer(b).await {
                        return Ok(());
                    }
                }
                Err(cause) => {
                    output.fail_cause(cause);
                    return Ok(());
                }
            },
            Ok(Take::Done(done)) => {
                output.end(done);
                return Ok(());
            }
            Err(cause) => {
                output.fail_cause(cause);
                return Ok(());
            }
        }
    }
}

struct SequentialPull<A, E, D, F> {
    upstream: BoxPull<A, E, D>,
    f: Arc<F>,
    pending: VecDeque<A>,
    failure: Option<Cause<E>>,
}

impl<A, B, E, D, F, Fut> Pull for SequentialPull<A, E, D, F>
where
    A: Element,
    B: Send,
    E: Signal,
    D: Signal,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Exit<B, E>> + Send,
{
    type Out = B;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<B, E, D>> {
        Box::pin(async move {
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
                    match (self.f)(a).await {
                        Ok(b) => out.push(b),
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
