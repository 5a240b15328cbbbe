//! Recovery: splice in a replacement channel when this one fails.

use std::sync::Arc;

use super::{Channel, Element, Signal};
use crate::cause::Cause;
use crate::pull::{BoxPull, Pull, PullResult, SharedPull, Step};
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
    /// Recover from any failure by continuing with the channel `f` builds
    /// from the full cause.
    ///
    /// Elements emitted before the failure stay emitted. The replacement
    /// reads from the same upstream, picking up where this channel stopped.
    /// Resources this channel acquired are released before the replacement
    /// starts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let recovered = Channel::<i32, String>::from_array(vec![1, 2])
    ///     .concat(Channel::fail("boom".to_string()))
    ///     .catch_cause(|cause| {
    ///         assert!(cause.has_fails());
    ///         Channel::<i32, String>::from_array(vec![-1])
    ///     });
    ///
    /// assert_eq!(recovered.run_collect().await, Ok(vec![1, 2, -1]));
    /// # });
    /// ```
    pub fn catch_cause<OutErr2, F>(self, f: F) -> Channel<Out, OutErr2, OutDone, In, InErr, InDone>
    where
        OutErr2: Signal,
        F: Fn(Cause<OutErr>) -> Channel<Out, OutErr2, OutDone, In, InErr, InDone> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Channel::from_transform(move |upstream, scope: Scope| {
            let this = self.clone();
            let f = f.clone();
            async move {
                let upstream = SharedPull::new(upstream);
                let primary_scope = scope.fork();
                match this
                    .materialize(upstream.clone().boxed(), primary_scope.clone())
                    .await
                {
                    Ok(primary) => Ok(CatchPull {
                        state: CatchState::Primary(primary, primary_scope),
                        upstream,
                        scope,
                        f,
                    }
                    .boxed()),
                    Err(cause) => {
                        primary_scope.close(Err(cause.erase())).await;
                        f(cause).materialize(upstream.boxed(), scope).await
                    }
                }
            }
        })
    }

    /// Recover only from the causes `filter` selects.
    ///
    /// `filter` extracts a value from the causes it accepts; `f` receives it
    /// together with the cause. Every other cause is re-raised unchanged.
    pub fn catch_cause_filter<X, P, F>(self, filter: P, f: F) -> Self
    where
        P: Fn(&Cause<OutErr>) -> Option<X> + Send + Sync + 'static,
        F: Fn(X, Cause<OutErr>) -> Self + Send + Sync + 'static,
    {
        self.catch_cause(move |cause| match filter(&cause) {
            Some(extracted) => f(extracted, cause),
            None => Channel::fail_cause(cause),
        })
    }

    /// Recover from typed failures.
    ///
    /// `f` receives the first typed error in the cause. Causes without one
    /// (defects and interruptions) are re-raised.
    pub fn catch<OutErr2, F>(self, f: F) -> Channel<Out, OutErr2, OutDone, In, InErr, InDone>
    where
        OutErr2: Signal,
        F: Fn(OutErr) -> Channel<Out, OutErr2, OutDone, In, InErr, InDone> + Send + Sync + 'static,
    {
        self.catch_cause(move |cause| match cause.failure_or_cause() {
            Ok(error) => f(error),
            Err(cause) => Channel::fail_cause(cause.without_failures()),
        })
    }
}

enum CatchState<A, E, E2, D> {
    Primary(BoxPull<A, E, D>, Scope),
    Recovered(BoxPull<A, E2, D>),
    Halted(D),
    Failed(Cause<E2>),
}

struct CatchPull<A, E, E2, D, In, InErr, InDone, F> {
    state: CatchState<A, E, E2, D>,
    upstream: SharedPull<In, InErr, InDone>,
    scope: Scope,
    f: Arc<F>,
}

impl<A, E, E2, D, In, InErr, InDone, F> Pull for CatchPull<A, E, E2, D, In, InErr, InDone, F>
where
    A: Element,
    E: Signal,
    E2: Signal,
    D: Signal,
    In: Element,
    InErr: Signal,
    InDone: Signal,
    F: Fn(Cause<E>) -> Channel<A, E2, D, In, InErr, InDone> + Send + Sync,
{
    type Out = A;
    type Err = E2;
    type Done = D;

    fn pull(&mut self) -> BoxFuture<'_, PullResult<A, E2, D>> {
        Box::pin(async move {
            let (result, primary_scope) = match &mut self.state {
                CatchState::Recovered(pull) => return pull.pull().await,
                CatchState::Halted(done) => return Ok(Step::Halt(done.clone())),
                CatchState::Failed(cause) => return Err(cause.clone()),
                CatchState::Primary(pull, primary_scope) => (pull.pull().await, primary_scope.clone()),
            };

            match result {
                Ok(Step::Emit(batch)) => Ok(Step::Emit(batch)),
                Ok(Step::Halt(done)) => {
                    primary_scope.close(Ok(())).await;
                    self.state = CatchState::Halted(done.clone());
                    Ok(Step::Halt(done))
                }
                Err(cause) => {
                    primary_scope.close(Err(cause.erase())).await;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        fails = cause.has_fails(),
                        dies = cause.has_dies(),
                        interrupts = cause.has_interrupts(),
                        "recovering from channel failure"
                    );
                    let replacement = (self.f)(cause);
                    match replacement
                        .materialize(self.upstream.clone().boxed(), self.scope.clone())
                        .await
                    {
                        Ok(mut pull) => {
                            let step = pull.pull().await;
                            self.state = CatchState::Recovered(pull);
                            step
                        }
                        Err(cause) => {
                            self.state = CatchState::Failed(cause.clone());
                            Err(cause)
                        }
                    }
                }
            }
        })
    }
}
