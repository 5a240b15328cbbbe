//! Entry points that run a source channel to completion.
//!
//! Each one allocates a root [`Scope`], drives the channel's pull until it
//! halts or fails, and closes the scope with the matching exit before
//! returning. If the returned future is dropped early the scope is closed
//! as interrupted instead.

use std::future::Future;

use super::{Channel, Element, Signal};
use crate::cause::Exit;
use crate::pull::{BoxPull, Step};
use crate::runtime::Scope;

impl<Out, OutErr, OutDone> Channel<Out, OutErr, OutDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
{
    /// Fold every element into a state.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let total = Channel::<u32>::from_array(vec![1, 2, 3, 4])
    ///     .run_fold(0, |acc, x| acc + x)
    ///     .await;
    /// assert_eq!(total, Ok(10));
    /// # });
    /// ```
    pub async fn run_fold<S, F>(&self, init: S, mut f: F) -> Exit<S, OutErr>
    where
        F: FnMut(S, Out) -> S,
    {
        self.drive(move |mut pull| async move {
            let mut state = init;
            loop {
                match pull.pull().await? {
                    Step::Emit(batch) => {
                        for element in batch {
                            state = f(state, element);
                        }
                    }
                    Step::Halt(_) => return Ok(state),
                }
            }
        })
        .await
    }

    /// Collect every element, in emission order.
    pub async fn run_collect(&self) -> Exit<Vec<Out>, OutErr> {
        self.run_fold(Vec::new(), |mut collected, element| {
            collected.push(element);
            collected
        })
        .await
    }

    /// Run for the completion value, discarding elements.
    pub async fn run_done(&self) -> Exit<OutDone, OutErr> {
        self.drive(|mut pull| async move {
            loop {
                if let Step::Halt(done) = pull.pull().await? {
                    return Ok(done);
                }
            }
        })
        .await
    }

    /// Run for effects only.
    pub async fn run_drain(&self) -> Exit<(), OutErr> {
        self.run_done().await.map(|_| ())
    }

    /// Run an effect for every element, in order.
    ///
    /// The first failing effect stops the run and closes the scope with its
    /// cause.
    pub async fn run_for_each<F, Fut>(&self, mut f: F) -> Exit<(), OutErr>
    where
        F: FnMut(Out) -> Fut,
        Fut: Future<Output = Exit<(), OutErr>>,
    {
        self.drive(move |mut pull| async move {
            loop {
                match pull.pull().await? {
                    Step::Emit(batch) => {
                        for element in batch {
                            f(element).await?;
                        }
                    }
                    Step::Halt(_) => return Ok(()),
                }
            }
        })
        .await
    }

    async fn drive<T, F, Fut>(&self, consume: F) -> Exit<T, OutErr>
    where
        F: FnOnce(BoxPull<Out, OutErr, OutDone>) -> Fut,
        Fut: Future<Output = Exit<T, OutErr>>,
    {
        let scope = Scope::new();
        let guard = scope.guard();
        let exit = match self.to_pull(&scope).await {
            Ok(pull) => consume(pull).await,
            Err(cause) => Err(cause),
        };
        guard
            .close(match &exit {
                Ok(_) => Ok(()),
                Err(cause) => Err(cause.erase()),
            })
            .await;
        exit
    }
}
