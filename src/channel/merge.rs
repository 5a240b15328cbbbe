//! Concurrent composition: `merge_all` over a channel of channels, and
//! two-way `merge`.

use std::sync::Arc;

use futures::future::{select, Either};
use tokio::sync::OwnedSemaphorePermit;

use super::{Channel, Element, HaltStrategy, MergeAllOptions, Signal};
use crate::cause::{Cause, Exit};
use crate::pull::{void_upstream, BoxPull, Pull, SharedPull, Step};
use crate::runtime::{fork, Fiber, Queue, Scope, Semaphore};

impl<A, ChildDone, OutErr, OutDone, In, InErr, InDone>
    Channel<Channel<A, OutErr, ChildDone>, OutErr, OutDone, In, InErr, InDone>
where
    A: Element,
    ChildDone: Signal,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Run the emitted channels concurrently and interleave their output.
    ///
    /// At most `concurrency` children run at once; each one gets its own
    /// scope, closed when the child finishes. The merged channel halts with
    /// this channel's completion value once every child has finished, and
    /// fails as soon as any child (or this channel) fails.
    ///
    /// In switch mode, a newly arrived child interrupts every child still
    /// running, so only the most recent one keeps producing. At most one
    /// child runs at a time and the concurrency limit has no effect.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::channel::MergeAllOptions;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let children = Channel::<Channel<i32>>::from_array(vec![
    ///     Channel::from_array(vec![1, 2]),
    ///     Channel::from_array(vec![3]),
    /// ]);
    ///
    /// let mut merged = children
    ///     .merge_all(MergeAllOptions::new())
    ///     .run_collect()
    ///     .await
    ///     .unwrap();
    /// merged.sort();
    /// assert_eq!(merged, vec![1, 2, 3]);
    /// # });
    /// ```
    pub fn merge_all(self, options: MergeAllOptions) -> Channel<A, OutErr, OutDone, In, InErr, InDone> {
        let limit = options.concurrency().limit();
        let buffer_size = options.buffer_size();
        let switch = options.switch();
        Channel::from_transform_bracket(move |upstream, scope| {
            let this = self.clone();
            async move {
                let children = this.materialize(upstream, scope.clone()).await?;
                let output = Queue::bounded(buffer_size);
                fork(
                    &scope,
                    drive_children(children, output.clone(), limit, switch, scope.clone()),
                );
                Ok(output.into_pull().boxed())
            }
        })
    }
}

/// Pulls child channels and starts one fiber per child.
async fn drive_children<A, E, D, CD>(
    mut children: BoxPull<Channel<A, E, CD>, E, D>,
    output: Queue<A, E, D>,
    limit: usize,
    switch: bool,
    scope: Scope,
) -> Exit<(), E>
where
    A: Element,
    E: Signal,
    D: Signal,
    CD: Signal,
{
    let permits = Arc::new(Semaphore::new(limit));
    let mut running: Vec<(Fiber<(), E>, Scope)> = Vec::new();
    loop {
        match children.pull().await {
            Ok(Step::Emit(batch)) => {
                for child in batch {
                    if switch {
                        for (fiber, child_scope) in running.drain(..) {
                            let id = fiber.id();
                            #[cfg(feature = "tracing")]
                            tracing::debug!(fiber = %id, "new child arrived, interrupting previous child");
                            let _ = fiber.interrupt().await;
                            child_scope.close(Err(Cause::interrupt(Some(id)))).await;
                        }
                    }
                    let Ok(permit) = permits.clone().acquire_owned().await else {
                        return Ok(());
                    };
                    let child_scope = scope.fork();
                    let fiber = fork(
                        &scope,
                        run_child(child, output.clone(), child_scope.clone(), permit),
                    );
                    if switch {
                        running.push((fiber, child_scope));
                    }
                }
            }
            Ok(Step::Halt(done)) => {
                // Every child has delivered its output once all permits are back.
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

async fn run_child<A, E, D, CD>(
    child: Channel<A, E, CD>,
    output: Queue<A, E, D>,
    scope: Scope,
    permit: OwnedSemaphorePermit,
) -> Exit<(), E>
where
    A: Element,
    E: Signal,
    D: Signal,
    CD: Signal,
{
    let exit = match child.materialize(void_upstream(), scope.clone()).await {
        Ok(mut pull) => loop {
            match pull.pull().await {
                Ok(Step::Emit(batch)) => {
                    if !output.offer_all(batch).await {
                        break Ok(());
                    }
                }
                Ok(Step::Halt(_)) => break Ok(()),
                Err(cause) => break Err(cause),
            }
        },
        Err(cause) => Err(cause),
    };
    match exit {
        Ok(()) => scope.close(Ok(())).await,
        Err(cause) => {
            scope.close(Err(cause.erase())).await;
            output.fail_cause(cause);
        }
    }
    drop(permit);
    Ok(())
}

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Run this channel and `that` concurrently, interleaving their output.
    ///
    /// Both sides read from the same upstream. `strategy` decides which
    /// side's completion ends the merge:
    ///
    /// - `Left` / `Right` - that side; the other is interrupted
    /// - `Either` - whichever finishes first; the other is interrupted
    /// - `Both` - the merge halts when both have, with the done value of the
    ///   side that finished last
    ///
    /// A failure on either side fails the merge immediately and interrupts
    /// the other side. Elements already emitted are still delivered first.
    pub fn merge(self, that: Self, strategy: HaltStrategy) -> Self {
        Channel::from_transform_bracket(move |upstream, scope| {
            let left = self.clone();
            let right = that.clone();
            async move {
                let upstream = SharedPull::new(upstream);
                let left = left.materialize(upstream.clone().boxed(), scope.clone()).await?;
                let right = right.materialize(upstream.boxed(), scope.clone()).await?;

                let output = Queue::bounded(0);
                let left = fork(&scope, run_side(left, output.clone()));
                let right = fork(&scope, run_side(right, output.clone()));
                fork(&scope, coordinate(left, right, strategy, output.clone()));
                Ok(output.into_pull().boxed())
            }
        })
    }
}

async fn run_side<A, E, D>(mut pull: BoxPull<A, E, D>, output: Queue<A, E, D>) -> Exit<D, E>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    loop {
        match pull.pull().await? {
            Step::Emit(batch) => {
                if !output.offer_all(batch).await {
                    return Err(Cause::interrupt(None));
                }
            }
            Step::Halt(done) => return Ok(done),
        }
    }
}

/// Waits for the sides of a merge and records its terminal outcome.
async fn coordinate<A, E, D>(
    left: Fiber<D, E>,
    right: Fiber<D, E>,
    strategy: HaltStrategy,
    output: Queue<A, E, D>,
) -> Exit<(), E>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    let left_abort = left.abort_handle();
    let right_abort = right.abort_handle();

    let (first, left_first, rest) = match select(Box::pin(left.join()), Box::pin(right.join())).await {
        Either::Left((exit, rest)) => (exit, true, rest),
        Either::Right((exit, rest)) => (exit, false, rest),
    };
    let abort_other = || {
        if left_first {
            right_abort.abort();
        } else {
            left_abort.abort();
        }
    };

    match first {
        Err(cause) => {
            abort_other();
            output.fail_cause(cause);
        }
        Ok(done) => {
            let decides = match strategy {
                HaltStrategy::Left => left_first,
                HaltStrategy::Right => !left_first,
                HaltStrategy::Either => true,
                HaltStrategy::Both => false,
            };
            if decides {
                #[cfg(feature = "tracing")]
                tracing::trace!(left_first, "merge halting, interrupting the other side");
                abort_other();
                output.end(done);
            } else {
                match rest.await {
                    Ok(done) => output.end(done),
                    Err(cause) => output.fail_cause(cause),
                };
            }
        }
    }
    Ok(())
}
