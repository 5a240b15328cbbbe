//! Hierarchical resource lifetimes with guaranteed finalization.
//!
//! A [`Scope`] owns a stack of finalizers. Closing it runs them in reverse
//! registration order, exactly once, handing each the [`ScopeExit`] the scope
//! was closed with so that cleanup can branch on success, failure or
//! interruption.
//!
//! Scopes nest: [`Scope::fork`] creates a child whose closing is registered
//! as a finalizer of the parent. A child closed early detaches itself, so
//! long-running parents do not accumulate finished children.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use millrace::runtime::Scope;
//!
//! # tokio_test::block_on(async {
//! let log = Arc::new(Mutex::new(Vec::new()));
//! let parent = Scope::new();
//! let child = parent.fork();
//!
//! let l = log.clone();
//! parent.add_finalizer(move |_| async move { l.lock().unwrap().push("parent") });
//! let l = log.clone();
//! child.add_finalizer(move |_| async move { l.lock().unwrap().push("child") });
//!
//! parent.close(Ok(())).await;
//! assert_eq!(*log.lock().unwrap(), vec!["parent", "child"]);
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use futures::FutureExt;

use super::{spawn_detached, BoxFuture};
use crate::cause::{Cause, Defect, Exit};

/// How a scope was closed. Error values are erased; the shape of the cause is kept.
pub type ScopeExit = Exit<(), ()>;

type Finalizer = Box<dyn FnOnce(ScopeExit) -> BoxFuture<'static, ()> + Send>;

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a registered finalizer so that it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinalizerKey(u64);

enum ScopeState {
    Open {
        finalizers: Vec<(FinalizerKey, Finalizer)>,
        next_key: u64,
    },
    Closed(ScopeExit),
}

struct ScopeInner {
    id: u64,
    state: Mutex<ScopeState>,
    parent: Option<Weak<ScopeInner>>,
    key_in_parent: OnceLock<FinalizerKey>,
}

impl ScopeInner {
    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        // Finalizers never run under the lock, so a poisoned lock still holds
        // consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A handle to a resource lifetime. Cloning shares the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    /// Create a new root scope.
    pub fn new() -> Self {
        Scope::with_parent(None)
    }

    fn with_parent(parent: Option<Weak<ScopeInner>>) -> Self {
        Scope {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ScopeState::Open {
                    finalizers: Vec::new(),
                    next_key: 0,
                }),
                parent,
                key_in_parent: OnceLock::new(),
            }),
        }
    }

    /// Process-unique identifier, useful in logs.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.lock(), ScopeState::Closed(_))
    }

    /// Register a finalizer.
    ///
    /// Returns the key of the registration. If the scope is already closed
    /// the finalizer runs straight away with the recorded exit and `None` is
    /// returned.
    pub fn add_finalizer<F, Fut>(&self, finalizer: F) -> Option<FinalizerKey>
    where
        F: FnOnce(ScopeExit) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Finalizer = Box::new(move |exit| Box::pin(finalizer(exit)));
        let exit = {
            let mut state = self.inner.lock();
            match &mut *state {
                ScopeState::Open {
                    finalizers,
                    next_key,
                } => {
                    let key = FinalizerKey(*next_key);
                    *next_key += 1;
                    finalizers.push((key, boxed));
                    return Some(key);
                }
                ScopeState::Closed(exit) => exit.clone(),
            }
        };
        spawn_detached(boxed(exit));
        None
    }

    #[cfg(test)]
    pub(crate) fn finalizer_count(&self) -> usize {
        match &*self.inner.lock() {
            ScopeState::Open { finalizers, .. } => finalizers.len(),
            ScopeState::Closed(_) => 0,
        }
    }

    /// Remove a finalizer without running it. Returns whether it was still registered.
    pub fn remove_finalizer(&self, key: FinalizerKey) -> bool {
        let mut state = self.inner.lock();
        match &mut *state {
            ScopeState::Open { finalizers, .. } => {
                let before = finalizers.len();
                finalizers.retain(|(k, _)| *k != key);
                finalizers.len() != before
            }
            ScopeState::Closed(_) => false,
        }
    }

    /// Create a child scope that is closed no later than this one.
    ///
    /// Forking a closed scope yields a child that is already being closed
    /// with the parent's exit.
    pub fn fork(&self) -> Scope {
        let child = Scope::with_parent(Some(Arc::downgrade(&self.inner)));
        let closing = child.clone();
        let key = self.add_finalizer(move |exit| async move { closing.close(exit).await });
        if let Some(key) = key {
            let _ = child.inner.key_in_parent.set(key);
        }
        child
    }

    /// Close the scope, running every finalizer in reverse registration order.
    ///
    /// Idempotent: only the first call runs finalizers, later calls return
    /// immediately. A child scope detaches from its parent when closed. A
    /// panicking finalizer is reported and the remaining ones still run.
    pub async fn close(&self, exit: ScopeExit) {
        let finalizers = {
            let mut state = self.inner.lock();
            match std::mem::replace(&mut *state, ScopeState::Closed(exit.clone())) {
                ScopeState::Open { finalizers, .. } => finalizers,
                closed @ ScopeState::Closed(_) => {
                    *state = closed;
                    return;
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            scope = self.inner.id,
            finalizers = finalizers.len(),
            success = exit.is_ok(),
            "closing scope"
        );

        if let (Some(parent), Some(key)) = (
            self.inner.parent.as_ref().and_then(Weak::upgrade),
            self.inner.key_in_parent.get(),
        ) {
            Scope { inner: parent }.remove_finalizer(*key);
        }

        for (_, finalizer) in finalizers.into_iter().rev() {
            let exit = exit.clone();
            let run = AssertUnwindSafe(async move { finalizer(exit).await }).catch_unwind();
            if let Err(payload) = run.await {
                let defect = Defect::from_panic(payload);
                #[cfg(feature = "tracing")]
                tracing::warn!(scope = self.inner.id, "Finalizer panicked: {}", defect);
                #[cfg(not(feature = "tracing"))]
                eprintln!("Finalizer panicked: {}", defect);
            }
        }
    }

    /// An owned close handle: dropping it unclosed closes the scope with an interruption.
    pub fn guard(&self) -> ScopeGuard {
        ScopeGuard {
            scope: Some(self.clone()),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes its scope exactly once: explicitly through [`ScopeGuard::close`],
/// or with an interruption exit when dropped.
///
/// Dropping happens when the future that owns the guard is cancelled, for
/// example when a task running a channel is aborted. The finalizers then run
/// on the ambient tokio runtime.
pub struct ScopeGuard {
    scope: Option<Scope>,
}

impl ScopeGuard {
    /// The guarded scope.
    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Close the guarded scope with `exit`.
    pub async fn close(mut self, exit: ScopeExit) {
        if let Some(scope) = self.scope.take() {
            scope.close(exit).await;
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            if scope.is_closed() {
                return;
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(scope = scope.id(), "scope dropped while open, closing as interrupted");
            spawn_detached(async move { scope.close(Err(Cause::interrupt(None))).await });
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("scope", &self.scope)
            .finish()
    }
}
