//! Sequential composition: feed one channel's output into another.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Channel, Element, Signal};
use crate::cause::Cause;
use crate::pull::{BoxPull, FailPull, Fused, Pull, PullResult, Step};
use crate::runtime::BoxFuture;

impl<Out, OutErr, OutDone, In, InErr, InDone> Channel<Out, OutErr, OutDone, In, InErr, InDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
{
    /// Feed this channel's output into `that`.
    ///
    /// `that` sees this channel's halt as its upstream halt, and its
    /// failures as upstream failures.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let halves = Channel::<i32, String, (), i32, String, ()>::identity().map(|x| x / 2);
    /// let piped = Channel::<i32, String>::from_array(vec![2, 4, 6]).pipe_to(halves);
    ///
    /// assert_eq!(piped.run_collect().await, Ok(vec![1, 2, 3]));
    /// # });
    /// ```
    pub fn pipe_to<Out2, OutErr2, OutDone2>(
        self,
        that: Channel<Out2, OutErr2, OutDone2, Out, OutErr, OutDone>,
    ) -> Channel<Out2, OutErr2, OutDone2, In, InErr, InDone>
    where
        Out2: Element,
        OutErr2: Signal,
        OutDone2: Signal,
    {
        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let that = that.clone();
            async move {
                let source: BoxPull<Out, OutErr, OutDone> =
                    match this.materialize(upstream, scope.clone()).await {
                        Ok(pull) => Fused::new(pull).boxed(),
                        Err(cause) => FailPull::new(cause).boxed(),
                    };
                that.materialize(source, scope).await
            }
        })
    }

    /// Feed this channel's output into `that`, which never observes this
    /// channel's failures.
    ///
    /// When this channel fails, `that` sees its upstream interrupted; the
    /// original cause is then reported by the composed channel, whatever
    /// `that` did with the interruption.
    pub fn pipe_to_or_fail<Out2, OutDone2>(
        self,
        that: Channel<Out2, OutErr, OutDone2, Out, Infallible, OutDone>,
    ) -> Channel<Out2, OutErr, OutDone2, In, InErr, InDone>
    where
        Out2: Element,
        OutDone2: Signal,
    {
        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let that = that.clone();
            async move {
                let stash: Stash<OutErr> = Arc::new(Mutex::new(None));
                let source: BoxPull<Out, OutErr, OutDone> =
                    match this.materialize(upstream, scope.clone()).await {
                        Ok(pull) => Fused::new(pull).boxed(),
                        Err(cause) => FailPull::new(cause).boxed(),
                    };
                let shielded = ShieldPull {
                    inner: source,
                    stash: stash.clone(),
                };
                match that.materialize(shielded.boxed(), scope).await {
                    Ok(inner) => Ok(UnshieldPull { inner, stash }.boxed()),
                    Err(cause) => {
                        let stashed = lock(&stash).clone();
                        Err(stashed.unwrap_or(cause))
                    }
                }
            }
        })
    }
}

type Stash<E> = Arc<Mutex<Option<Cause<E>>>>;

fn lock<E>(stash: &Stash<E>) -> MutexGuard<'_, Option<Cause<E>>> {
    stash.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Hides upstream failures from the downstream channel, keeping the first one.
struct ShieldPull<A, E, D> {
    inner: BoxPull<A, E, D>,
    stash: Stash<E>,
}

impl<A, E, D> Pull for ShieldPull<A, E, D>
where
    A: Element,
    E: Signal,
    D: Signal,
{
    type Out = A;
    type Err = Infallible;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, Infallible, D>> {
        Box::pin(async move {
            match self.inner.pull().await {
                Ok(step) => Ok(step),
                Err(cause) => {
                    lock(&self.stash).get_or_insert(cause);
                    Err(Cause::interrupt(None))
                }
            }
        })
    }
}

/// Reports a stashed upstream failure once the downstream terminates.
struct UnshieldPull<A, E, D> {
    inner: BoxPull<A, E, D>,
    stash: Stash<E>,
}

impl<A, E, D> Pull for UnshieldPull<A, E, D>
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
            let result = self.inner.pull().await;
            if matches!(result, Ok(Step::Emit(_))) {
                return result;
            }
            let stashed = lock(&self.stash).clone();
            match stashed {
                Some(cause) => Err(cause),
                None => result,
            }
        })
    }
}
