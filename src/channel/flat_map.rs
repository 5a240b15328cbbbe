//! Sequencing: `flat_map`, `concat_with` and `concat`.

use std::collections::VecDeque;
use std::sync::Arc;

use super::{Channel, Element, FlatMapOptions, Signal};
use crate::cause::Cause;
use crate::pull::{halt_exit, void_upstream, BoxPull, Pull, PullResult, SharedPull, Step};
use crate::runtime::{BoxFuture, Scope};

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Replace every element with the output of the channel `f` builds from it.
    ///
    /// Sequentially (the default), each child runs to completion in its own
    /// scope before the next element is pulled. With a concurrency above one
    /// this is `self.map(f).merge_all(..)` and children interleave.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::channel::FlatMapOptions;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let repeated = Channel::<usize>::from_array(vec![1, 2, 3])
    ///     .flat_map(|n| Channel::from_array(vec![n; n]), FlatMapOptions::new());
    ///
    /// assert_eq!(repeated.run_collect().await, Ok(vec![1, 2, 2, 3, 3, 3]));
    /// # });
    /// ```
    pub fn flat_map<Out2, ChildDone, F>(
        self,
        f: F,
        options: FlatMapOptions,
    ) -> Channel<Out2, OutErr, OutDone, In, InErr, InDone>
    where
        Out2: Element,
        ChildDone: Signal,
        F: Fn(Out) -> Channel<Out2, OutErr, ChildDone> + Send + Sync + 'static,
    {
        if !options.concurrency().is_sequential() {
            return self.map(f).merge_all(options.into());
        }

        let f = Arc::new(f);
        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let f = f.clone();
            async move {
                let parent = this.materialize(upstream, scope.clone()).await?;
                Ok(FlatMapPull {
                    parent,
                    f,
                    scope,
                    pending: VecDeque::new(),
                    active: None,
                }
                .boxed())
            }
        })
    }

    /// Run this channel to completion, then the channel `f` builds from its
    /// completion value.
    ///
    /// Both halves share the same upstream. The first half runs in a child
    /// scope that is closed as soon as it halts.
    pub fn concat_with<OutDone2, F>(self, f: F) -> Channel<Out, OutErr, OutDone2, In, InErr, InDone>
    where
        OutDone2: Signal,
        F: Fn(OutDone) -> Channel<Out, OutErr, OutDone2, In, InErr, InDone> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Channel::from_transform(move |upstream, scope: Scope| {
            let this = self.clone();
            let f = f.clone();
            async move {
                let upstream = SharedPull::new(upstream);
                let first_scope = scope.fork();
                let first = match this
                    .materialize(upstream.clone().boxed(), first_scope.clone())
                    .await
                {
                    Ok(pull) => pull,
                    Err(cause) => {
                        first_scope.close(Err(cause.erase())).await;
                        return Err(cause);
                    }
                };
                Ok(ConcatPull {
                    phase: Phase::First(first, first_scope),
                    upstream,
                    scope,
                    f,
                }
                .boxed())
            }
        })
    }

    /// Run this channel, then `that`.
    pub fn concat<OutDone2>(
        self,
        that: Channel<Out, OutErr, OutDone2, In, InErr, InDone>,
    ) -> Channel<Out, OutErr, OutDone2, In, InErr, InDone>
    where
        OutDone2: Signal,
    {
        self.concat_with(move |_| that.clone())
    }
}

// ===== flat_map =====

struct ActiveChild<A, E> {
    pull: BoxPull<A, E, ()>,
    scope: Scope,
}

struct FlatMapPull<Out, Out2, E, D, F> {
    parent: BoxPull<Out, E, D>,
    f: Arc<F>,
    scope: Scope,
    pending: VecDeque<Out>,
    active: Option<ActiveChild<Out2, E>>,
}

impl<Out, Out2, E, D, ChildDone, F> Pull for FlatMapPull<Out, Out2, E, D, F>
where
    Out: Element,
    Out2: Element,
    E: Signal,
    D: Signal,
    ChildDone: Signal,
    F: Fn(Out) -> Channel<Out2, E, ChildDone> + Send + Sync,
{
    type Out = Out2;
    type Err = E;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<Out2, E, D>> {
        Box::pin(async move {
            loop {
                if let Some(active) = self.active.as_mut() {
                    let result = active.pull.pull().await;
                    if let Ok(Step::Emit(batch)) = result {
                        return Ok(Step::Emit(batch));
                    }
                    if let Some(finished) = self.active.take() {
                        finished.scope.close(halt_exit(&result)).await;
                    }
                    result?;
                    continue;
                }

                if let Some(element) = self.pending.pop_front() {
                    let child = (self.f)(element).map_done(|_| ());
                    let child_scope = self.scope.fork();
                    match child.materialize(void_upstream(), child_scope.clone()).await {
                        Ok(pull) => {
                            self.active = Some(ActiveChild {
                                pull,
                                scope: child_scope,
                            })
                        }
                        Err(cause) => {
                            child_scope.close(Err(cause.erase())).await;
                            return Err(cause);
                        }
                    }
                    continue;
                }

                match self.parent.pull().await? {
                    Step::Emit(batch) => self.pending.extend(batch),
                    Step::Halt(done) => return Ok(Step::Halt(done)),
                }
            }
        })
    }
}

// ===== concat_with =====

enum Phase<A, E, D1, D2> {
    First(BoxPull<A, E, D1>, Scope),
    Second(BoxPull<A, E, D2>),
    Failed(Cause<E>),
}

struct ConcatPull<A, E, D1, D2, In, InErr, InDone, F> {
    phase: Phase<A, E, D1, D2>,
    upstream: SharedPull<In, InErr, InDone>,
    scope: Scope,
    f: Arc<F>,
}

impl<A, E, D1, D2, In, InErr, InDone, F> Pull for ConcatPull<A, E, D1, D2, In, InErr, InDone, F>
where
    A: Element,
    E: Signal,
    D1: Signal,
    D2: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
    F: Fn(D1) -> Channel<A, E, D2, In, InErr, InDone> + Send + Sync,
{
    type Out = A;
    type Err = E;
    type Done = D2;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E, D2>> {
        Box::pin(async move {
            let (result, first_scope) = match &mut self.phase {
                Phase::Second(pull) => return pull.pull().await,
                Phase::Failed(cause) => return Err(cause.clone()),
                Phase::First(pull, first_scope) => (pull.pull().await, first_scope.clone()),
            };

            match result {
                Ok(Step::Emit(batch)) => Ok(Step::Emit(batch)),
                Ok(Step::Halt(done)) => {
                    first_scope.close(Ok(())).await;
                    let next = (self.f)(done);
                    match next
                        .materialize(self.upstream.clone().boxed(), self.scope.clone())
                        .await
                    {
                        Ok(mut pull) => {
                            let step = pull.pull().await;
                            self.phase = Phase::Second(pull);
                            step
                        }
                        Err(cause) => {
                            self.phase = Phase::Failed(cause.clone());
                            Err(cause)
                        }
                    }
                }
                Err(cause) => {
                    first_scope.close(Err(cause.erase())).await;
                    self.phase = Phase::Failed(cause.clone());
                    Err(cause)
                }
            }
        })
    }
}
