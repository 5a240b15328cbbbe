//! Channels: lazy, composable transforms from an upstream pull to a downstream pull.
//!
//! A [`Channel`] wraps a single transform function
//! `(upstream pull, scope) -> future of downstream pull`. Building a channel
//! does nothing; the transform runs when the channel is *materialised* with
//! [`Channel::to_pull`] or one of the `run_*` entry points, and every
//! resource it acquires lives in the scope it was given.
//!
//! Channels come in two shapes:
//!
//! - **sources** ignore their input (`In = ()`, `InErr = Infallible`,
//!   `InDone = ()`) and can be run directly
//! - **transducers** consume an upstream, and are attached to one with
//!   [`Channel::pipe_to`] or [`Channel::to_pull_with`]
//!
//! # Example
//!
//! ```rust
//! use millrace::Channel;
//!
//! # tokio_test::block_on(async {
//! let doubled = Channel::<i32>::from_array(vec![1, 2, 3])
//!     .map(|x| x * 2)
//!     .concat(Channel::from_array(vec![100]));
//!
//! assert_eq!(doubled.run_collect().await, Ok(vec![2, 4, 6, 100]));
//! # });
//! ```

mod catch;
mod constructors;
mod flat_map;
mod map_effect;
mod merge;
mod options;
mod pipe;
mod run;
mod transform;

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use options::{
    Concurrency, FlatMapOptions, HaltStrategy, MapEffectOptions, MergeAllOptions,
    DEFAULT_BUFFER_SIZE, DEFAULT_CHUNK_SIZE, UNBOUNDED_CONCURRENCY,
};

use crate::cause::Exit;
use crate::pull::{halt_exit, BoxPull, Fused, Pull, PullResult, Step};
use crate::runtime::{BoxFuture, Scope};

/// Element types that can flow through a channel.
pub trait Element: Send + 'static {}

impl<T: Send + 'static> Element for T {}

/// Error and completion types of a channel.
///
/// Terminal values are cloned when a halt or failure has to be observed more
/// than once, for example by every consumer of a shared upstream.
pub trait Signal: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Signal for T {}

/// The transform function a [`Channel`] wraps.
pub type Transform<Out, OutErr, OutDone, In, InErr, InDone> = Arc<
    dyn Fn(BoxPull<In, InErr, InDone>, Scope) -> BoxFuture<'static, Exit<BoxPull<Out, OutErr, OutDone>, OutErr>>
        + Send
        + Sync,
>;

/// A lazy transform from an upstream pull of `In` to a downstream pull of `Out`.
///
/// Type parameters, output side first:
///
/// | Parameter | Meaning | Default |
/// |-----------|---------|---------|
/// | `Out` | emitted element | |
/// | `OutErr` | typed failure | `Infallible` |
/// | `OutDone` | completion value | `()` |
/// | `In` | upstream element | `()` |
/// | `InErr` | upstream failure | `Infallible` |
/// | `InDone` | upstream completion | `()` |
///
/// Cloning is cheap and shares the transform.
pub struct Channel<Out, OutErr = Infallible, OutDone = (), In = (), InErr = Infallible, InDone = ()> {
    transform: Transform<Out, OutErr, OutDone, In, InErr, InDone>,
}

impl<Out, OutErr, OutDone, In, InErr, InDone> Clone for Channel<Out, OutErr, OutDone, In, InErr, InDone> {
    fn clone(&self) -> Self {
        Channel {
            transform: self.transform.clone(),
        }
    }
}

impl<Out, OutErr, OutDone, In, InErr, InDone> fmt::Debug for Channel<Out, OutErr, OutDone, In, InErr, InDone> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("transform", &"<function>")
            .finish()
    }
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
    /// Wrap a transform function directly.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::pull::Pull;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// // A channel that forwards its upstream untouched.
    /// let passthrough: Channel<i32, String, (), i32, String, ()> =
    ///     Channel::from_transform(|upstream, _scope| async move { Ok(upstream) });
    ///
    /// let source = Channel::<i32, String>::from_array(vec![1, 2]);
    /// assert_eq!(source.pipe_to(passthrough).run_collect().await, Ok(vec![1, 2]));
    /// # });
    /// ```
    pub fn from_transform<F, Fut>(f: F) -> Self
    where
        F: Fn(BoxPull<In, InErr, InDone>, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<BoxPull<Out, OutErr, OutDone>, OutErr>> + Send + 'static,
    {
        let transform: Transform<Out, OutErr, OutDone, In, InErr, InDone> = Arc::new(
            move |upstream, scope| -> BoxFuture<'static, Exit<BoxPull<Out, OutErr, OutDone>, OutErr>> {
                Box::pin(f(upstream, scope))
            },
        );
        Channel { transform }
    }

    /// Like [`from_transform`](Self::from_transform), but runs `f` in a
    /// child scope that is closed exactly once, as soon as the resulting
    /// pull halts or fails (or `f` itself fails).
    ///
    /// Use this whenever the transform starts background fibers or acquires
    /// temporary resources: they are released when the pull terminates
    /// rather than when the enclosing scope eventually closes.
    pub fn from_transform_bracket<F, Fut>(f: F) -> Self
    where
        F: Fn(BoxPull<In, InErr, InDone>, Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Exit<BoxPull<Out, OutErr, OutDone>, OutErr>> + Send + 'static,
    {
        let f = Arc::new(f);
        Channel::from_transform(move |upstream, scope: Scope| {
            let f = f.clone();
            async move {
                let child = scope.fork();
                match f(upstream, child.clone()).await {
                    Ok(pull) => Ok(BracketPull {
                        inner: pull,
                        scope: Some(child),
                    }
                    .boxed()),
                    Err(cause) => {
                        child.close(Err(cause.erase())).await;
                        Err(cause)
                    }
                }
            }
        })
    }

    /// The wrapped transform.
    pub fn to_transform(&self) -> Transform<Out, OutErr, OutDone, In, InErr, InDone> {
        self.transform.clone()
    }

    /// Run the transform against `upstream` inside `scope`.
    pub(crate) fn materialize(
        &self,
        upstream: BoxPull<In, InErr, InDone>,
        scope: Scope,
    ) -> BoxFuture<'static, Exit<BoxPull<Out, OutErr, OutDone>, OutErr>> {
        (self.transform)(upstream, scope)
    }

    /// Materialise the channel against an explicit upstream.
    ///
    /// The returned pull is fused: after it halts it keeps halting.
    pub async fn to_pull_with<P>(
        &self,
        upstream: P,
        scope: &Scope,
    ) -> Exit<BoxPull<Out, OutErr, OutDone>, OutErr>
    where
        P: Pull<Out = In, Err = InErr, Done = InDone> + 'static,
    {
        let pull = self
            .materialize(Fused::new(upstream).boxed(), scope.clone())
            .await?;
        Ok(Fused::new(pull).boxed())
    }

    /// Build a new channel by wrapping the pull this one materialises to.
    pub(crate) fn wrap_pull<Out2, OutDone2, F>(
        self,
        wrap: F,
    ) -> Channel<Out2, OutErr, OutDone2, In, InErr, InDone>
    where
        Out2: Element,
        OutDone2: Signal,
        F: Fn(BoxPull<Out, OutErr, OutDone>) -> BoxPull<Out2, OutErr, OutDone2> + Send + Sync + 'static,
    {
        let wrap = Arc::new(wrap);
        Channel::from_transform(move |upstream, scope| {
            let this = self.clone();
            let wrap = wrap.clone();
            async move {
                let pull = this.materialize(upstream, scope).await?;
                Ok(wrap(pull))
            }
        })
    }
}

impl<Out, OutErr, OutDone> Channel<Out, OutErr, OutDone>
where
    Out: Element,
    OutErr: Signal,
    OutDone: Signal,
{
    /// Materialise a source channel inside `scope`.
    ///
    /// Resources acquired by the channel are released when `scope` closes.
    /// The returned pull is fused.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::pull::{Pull, Step};
    /// use millrace::runtime::Scope;
    /// use millrace::Channel;
    ///
    /// # tokio_test::block_on(async {
    /// let scope = Scope::new();
    /// let mut pull = Channel::<&str>::from_array(vec!["a", "b"])
    ///     .to_pull(&scope)
    ///     .await
    ///     .unwrap();
    ///
    /// assert!(matches!(pull.pull().await, Ok(Step::Emit(_))));
    /// assert!(matches!(pull.pull().await, Ok(Step::Halt(()))));
    /// assert!(matches!(pull.pull().await, Ok(Step::Halt(()))));
    /// scope.close(Ok(())).await;
    /// # });
    /// ```
    pub async fn to_pull(&self, scope: &Scope) -> Exit<BoxPull<Out, OutErr, OutDone>, OutErr> {
        let pull = self
            .materialize(crate::pull::void_upstream(), scope.clone())
            .await?;
        Ok(Fused::new(pull).boxed())
    }
}

/// Closes a bracket's child scope when the wrapped pull terminates.
struct BracketPull<A, E, D> {
    inner: BoxPull<A, E, D>,
    scope: Option<Scope>,
}

impl<A, E, D> Pull for BracketPull<A, E, D>
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
            if !matches!(result, Ok(Step::Emit(_))) {
                if let Some(scope) = self.scope.take() {
                    scope.close(halt_exit(&result)).await;
                }
            }
            result
        })
    }
}
