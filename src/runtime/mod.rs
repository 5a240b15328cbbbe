//! Runtime collaborators the channel engine is built on.
//!
//! - [`Scope`] - hierarchical finalization
//! - [`Fiber`] / [`fork`] - scope-bound background tasks
//! - [`Queue`] - bounded, closeable hand-off between fibers
//! - [`Semaphore`] - tokio's counting semaphore, used to bound concurrency
//!
//! All of them run on the ambient tokio runtime.

mod fiber;
mod queue;
mod scope;

use std::future::Future;
use std::pin::Pin;

pub use fiber::{fork, Fiber, FiberId};
pub use queue::{Queue, QueuePull, Take};
pub use scope::{FinalizerKey, Scope, ScopeExit, ScopeGuard};
pub use tokio::sync::Semaphore;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run `fut` to completion without waiting for it.
///
/// Inside a tokio runtime the future is spawned. Outside of one (for example
/// when a guard is dropped after the runtime shut down) it is driven on the
/// current thread instead, so finalizers are never silently skipped.
pub(crate) fn spawn_detached<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::debug!("no tokio runtime available, running cleanup inline");
            futures::executor::block_on(fut);
        }
    }
}
