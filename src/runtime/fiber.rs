//! Fibers: scope-bound background tasks on the tokio runtime.
//!
//! [`fork`] spawns a future as a tokio task and ties it to a [`Scope`]:
//! closing the scope interrupts the task. Joining a fiber always yields an
//! [`Exit`], with cancellation reported as an `Interrupt` reason and panics
//! reported as `Die` defects.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use super::scope::{FinalizerKey, Scope};
use crate::cause::{Cause, Defect, Exit};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FiberId(u64);

impl FiberId {
    /// Allocate a fresh identifier.
    pub fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identifier, e.g. one read back from a log.
    pub fn from_raw(raw: u64) -> Self {
        FiberId(raw)
    }

    /// The raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A running background computation producing an [`Exit<T, E>`].
pub struct Fiber<T, E> {
    id: FiberId,
    handle: JoinHandle<Exit<T, E>>,
}

/// Spawn `effect` as a fiber whose lifetime is bounded by `scope`.
///
/// Closing `scope` interrupts the fiber if it is still running. A fiber
/// that finishes on its own removes its interruption hook from the scope.
///
/// # Example
///
/// ```rust
/// use millrace::runtime::{fork, Scope};
///
/// # tokio_test::block_on(async {
/// let scope = Scope::new();
/// let fiber = fork(&scope, async { Ok::<_, millrace::Cause<String>>(21 * 2) });
/// assert_eq!(fiber.join().await, Ok(42));
/// # });
/// ```
pub fn fork<T, E, F>(scope: &Scope, effect: F) -> Fiber<T, E>
where
    F: Future<Output = Exit<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let id = FiberId::next();
    let (registered_tx, registered_rx) = oneshot::channel::<Option<FinalizerKey>>();
    let detach_from = scope.clone();

    // The task waits for its finalizer key so that it can always deregister.
    let handle = tokio::spawn(async move {
        let key = match registered_rx.await {
            Ok(Some(key)) => key,
            _ => return Err(Cause::interrupt(Some(id))),
        };
        let _deregister = Deregister {
            scope: detach_from,
            key,
        };
        effect.await
    });

    let abort = handle.abort_handle();
    let key = scope.add_finalizer(move |_| async move {
        #[cfg(feature = "tracing")]
        tracing::trace!(fiber = %id, "interrupting fiber on scope close");
        abort.abort();
    });
    let _ = registered_tx.send(key);

    Fiber { id, handle }
}

/// Removes a fiber's interruption hook however the task ends.
struct Deregister {
    scope: Scope,
    key: FinalizerKey,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.scope.remove_finalizer(self.key);
    }
}

impl<T, E> Fiber<T, E> {
    /// This fiber's identifier.
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Whether the fiber has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// A handle that can interrupt the fiber without owning it.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Wait for the fiber to finish.
    pub async fn join(self) -> Exit<T, E> {
        let id = self.id;
        match self.handle.await {
            Ok(exit) => exit,
            Err(error) => Err(cause_from_join_error(id, error)),
        }
    }

    /// Interrupt the fiber and wait for it to stop.
    ///
    /// A fiber that already finished reports its own exit instead.
    pub async fn interrupt(self) -> Exit<T, E> {
        self.handle.abort();
        self.join().await
    }
}

fn cause_from_join_error<E>(id: FiberId, error: JoinError) -> Cause<E> {
    if error.is_panic() {
        Cause::die(Defect::from_panic(error.into_panic()))
    } else {
        Cause::interrupt(Some(id))
    }
}

impl<T, E> fmt::Debug for Fiber<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn join_returns_exit() {
        let scope = Scope::new();
        let ok = fork(&scope, async { Ok::<_, Cause<String>>(1) });
        let err = fork(&scope, async { Err::<i32, _>(Cause::fail("bad".to_string())) });
        assert_eq!(ok.join().await, Ok(1));
        assert_eq!(err.join().await, Err(Cause::fail("bad".to_string())));
    }

    #[tokio::test]
    async fn interrupt_reports_interrupt_reason() {
        let scope = Scope::new();
        let fiber = fork(&scope, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Cause<()>>(())
        });
        let id = fiber.id();
        let exit = fiber.interrupt().await;
        let cause = exit.unwrap_err();
        assert!(cause.is_interrupted_only());
        assert!(cause.interruptors().contains(&id));
    }

    #[tokio::test]
    async fn panics_become_defects() {
        let scope = Scope::new();
        let fiber = fork(&scope, async {
            if true {
                panic!("fiber exploded");
            }
            Ok::<(), Cause<()>>(())
        });
        let cause = fiber.join().await.unwrap_err();
        assert_eq!(
            cause.defects().next().map(Defect::message),
            Some("panicked: fiber exploded")
        );
    }

    #[tokio::test]
    async fn closing_scope_interrupts_fiber() {
        let scope = Scope::new();
        let fiber = fork(&scope, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Cause<()>>(())
        });
        scope.close(Ok(())).await;
        let exit = tokio::time::timeout(Duration::from_secs(1), fiber.join())
            .await
            .unwrap();
        assert!(exit.unwrap_err().is_interrupted_only());
    }

    #[tokio::test]
    async fn fork_into_closed_scope_is_interrupted() {
        let scope = Scope::new();
        scope.close(Ok(())).await;
        let fiber = fork(&scope, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, Cause<()>>(())
        });
        let exit = tokio::time::timeout(Duration::from_secs(1), fiber.join())
            .await
            .unwrap();
        assert!(exit.is_err());
    }

    #[test]
    fn fiber_ids_are_unique_and_display_with_hash() {
        let a = FiberId::next();
        let b = FiberId::next();
        assert_ne!(a, b);
        assert_eq!(FiberId::from_raw(12).to_string(), "#12");
        assert_eq!(FiberId::from_raw(12).as_u64(), 12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn finished_fibers_deregister_from_scope() {
        let scope = Scope::new();
        for n in 0..5_000u32 {
            let fiber = fork(&scope, async move { Ok::<_, Cause<()>>(n) });
            assert_eq!(fiber.join().await, Ok(n));
        }
        assert_eq!(scope.finalizer_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn running_fibers_stay_registered_until_done() {
        let scope = Scope::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let fiber = fork(&scope, async move {
            let _ = release_rx.await;
            Ok::<_, Cause<()>>(())
        });
        tokio::task::yield_now().await;
        assert_eq!(scope.finalizer_count(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(fiber.join().await, Ok(()));
        assert_eq!(scope.finalizer_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicked_fibers_deregister_from_scope() {
        let scope = Scope::new();
        let fiber = fork(&scope, async {
            if true {
                panic!("worker failed");
            }
            Ok::<(), Cause<()>>(())
        });
        assert!(fiber.join().await.unwrap_err().has_dies());
        assert_eq!(scope.finalizer_count(), 0);
    }
}
