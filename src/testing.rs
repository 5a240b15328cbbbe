//! Testing utilities for channels and causes
//!
//! This module provides helpers for asserting on pull results and exits, a
//! probe that observes scope finalization, and property-based testing
//! support for the failure algebra.
//!
//! # Examples
//!
//! ## Finalizer Probe
//!
//! ```rust
//! use millrace::testing::FinalizerProbe;
//! use millrace::Channel;
//!
//! # tokio_test::block_on(async {
//! let probe = FinalizerProbe::new();
//! let channel = probe.attach(Channel::<i32>::from_array(vec![1, 2]));
//!
//! assert_eq!(channel.run_collect().await, Ok(vec![1, 2]));
//! assert_eq!(probe.count(), 1);
//! assert!(probe.exits()[0].is_ok());
//! # });
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use millrace::{assert_fail, assert_halted, Cause};
//! use millrace::pull::{halt, PullResult};
//!
//! let halted: PullResult<i32, String, &str> = halt("done");
//! assert_halted!(halted, "done");
//!
//! let failed: Result<(), Cause<String>> = Err(Cause::fail("boom".to_string()));
//! assert_fail!(failed, "boom".to_string());
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::channel::{Channel, Element, Signal};
use crate::runtime::{Scope, ScopeExit};

/// Records every scope close it is registered with.
///
/// Clones share the same record, so a probe can be moved into a channel and
/// inspected from the test.
#[derive(Debug, Clone, Default)]
pub struct FinalizerProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    exits: Mutex<Vec<ScopeExit>>,
    changed: Notify,
}

impl FinalizerProbe {
    /// Create a probe that has seen nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finalizer on `scope` that records its exit.
    ///
    /// Returns `false` if the scope was already closed.
    pub fn register(&self, scope: &Scope) -> bool {
        let inner = self.inner.clone();
        scope
            .add_finalizer(move |exit| async move { inner.record(exit) })
            .is_some()
    }

    /// Wrap `channel` so the probe records how each materialisation ended.
    pub fn attach<Out, OutErr, OutDone, In, InErr, InDone>(
        &self,
        channel: Channel<Out, OutErr, OutDone, In, InErr, InDone>,
    ) -> Channel<Out, OutErr, OutDone, In, InErr, InDone>
    where
        Out: Element,
        OutErr: Signal,
        OutDone: Signal,
        In: Element,
        InErr: Signal,
        InDone: Signal,
    {
        let inner = self.inner.clone();
        channel.on_exit(move |exit| {
            let inner = inner.clone();
            async move { inner.record(exit) }
        })
    }

    /// How many finalizers have run.
    pub fn count(&self) -> usize {
        self.inner.exits().len()
    }

    /// The exits seen so far, in the order the finalizers ran.
    pub fn exits(&self) -> Vec<ScopeExit> {
        self.inner.exits().clone()
    }

    /// Wait until at least `n` finalizers have run.
    pub fn wait_for(&self, n: usize) -> impl Future<Output = ()> + Send + 'static {
        let inner = self.inner.clone();
        async move {
            loop {
                let notified = inner.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if inner.exits().len() >= n {
                    return;
                }
                notified.await;
            }
        }
    }
}

impl ProbeInner {
    fn exits(&self) -> MutexGuard<'_, Vec<ScopeExit>> {
        self.exits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, exit: ScopeExit) {
        self.exits().push(exit);
        self.changed.notify_waiters();
    }
}

/// Assert that a pull result is a halt, optionally with a given value.
///
/// # Example
///
/// ```rust
/// use millrace::assert_halted;
/// use millrace::pull::{halt_void, PullResult};
///
/// let result: PullResult<u8, String, ()> = halt_void();
/// assert_halted!(result);
/// ```
#[macro_export]
macro_rules! assert_halted {
    ($result:expr) => {
        match $result {
            Ok($crate::pull::Step::Halt(_)) => {}
            Ok($crate::pull::Step::Emit(batch)) => {
                panic!("Expected Halt, got Emit with {} element(s)", batch.len());
            }
            Err(cause) => {
                panic!("Expected Halt, got failure: {:?}", cause);
            }
        }
    };
    ($result:expr, $done:expr) => {
        match $result {
            Ok($crate::pull::Step::Halt(done)) => {
                assert_eq!(done, $done);
            }
            Ok($crate::pull::Step::Emit(batch)) => {
                panic!("Expected Halt, got Emit with {} element(s)", batch.len());
            }
            Err(cause) => {
                panic!("Expected Halt, got failure: {:?}", cause);
            }
        }
    };
}

/// Assert that an exit failed with the given typed error as its first failure.
#[macro_export]
macro_rules! assert_fail {
    ($exit:expr, $error:expr) => {
        match $exit {
            Err(cause) => match cause.failures().next() {
                Some(error) => assert_eq!(*error, $error),
                None => panic!("Expected a typed failure, got: {:?}", cause),
            },
            Ok(_) => panic!("Expected failure {:?}, got success", $error),
        }
    };
}

/// Assert that an exit failed with a defect.
#[macro_export]
macro_rules! assert_die {
    ($exit:expr) => {
        match $exit {
            Err(cause) => {
                if !cause.has_dies() {
                    panic!("Expected a defect, got: {:?}", cause);
                }
            }
            Ok(_) => panic!("Expected a defect, got success"),
        }
    };
}

/// Assert that an exit failed with nothing but interruptions.
#[macro_export]
macro_rules! assert_interrupted {
    ($exit:expr) => {
        match $exit {
            Err(cause) => {
                if !cause.is_interrupted_only() {
                    panic!("Expected an interruption, got: {:?}", cause);
                }
            }
            Ok(_) => panic!("Expected an interruption, got success"),
        }
    };
}

#[cfg(feature = "proptest")]
mod arbitrary {
    use proptest::prelude::*;

    use crate::cause::{Cause, Defect, Reason};
    use crate::runtime::FiberId;

    impl<E> Arbitrary for Reason<E>
    where
        E: Arbitrary + 'static,
    {
        type Parameters = E::Parameters;
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
            prop_oneof![
                any_with::<E>(args).prop_map(Reason::fail),
                "[a-z ]{1,16}".prop_map(|message| Reason::die(Defect::new(message))),
                proptest::option::of(any::<u64>())
                    .prop_map(|id| Reason::interrupt(id.map(FiberId::from_raw))),
            ]
            .boxed()
        }
    }

    impl<E> Arbitrary for Cause<E>
    where
        E: Arbitrary + 'static,
    {
        type Parameters = E::Parameters;
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
            proptest::collection::vec(any_with::<Reason<E>>(args), 0..6)
                .prop_map(Cause::from_reasons)
                .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::{Cause, Defect};
    use crate::nonempty::NonEmptyVec;
    use crate::pull::{emit, halt, PullResult};

    #[tokio::test]
    async fn probe_records_scope_exits() {
        let probe = FinalizerProbe::new();
        let scope = Scope::new();
        assert!(probe.register(&scope));
        assert_eq!(probe.count(), 0);

        scope.close(Err(Cause::interrupt(None))).await;
        assert_eq!(probe.count(), 1);
        assert_eq!(probe.exits(), vec![Err(Cause::interrupt(None))]);

        assert!(!probe.register(&scope));
    }

    #[tokio::test]
    async fn probe_wait_for_returns_once_reached() {
        let probe = FinalizerProbe::new();
        let scope = Scope::new();
        probe.register(&scope);

        let waiting = tokio::spawn(probe.wait_for(1));
        scope.close(Ok(())).await;
        waiting.await.unwrap();
        assert_eq!(probe.count(), 1);
    }

    #[test]
    fn assert_halted_macro() {
        let result: PullResult<i32, String, u8> = halt(3);
        assert_halted!(result, 3);
    }

    #[test]
    #[should_panic(expected = "Expected Halt, got Emit")]
    fn assert_halted_panics_on_emit() {
        let result: PullResult<i32, String, ()> = emit(NonEmptyVec::singleton(1));
        assert_halted!(result);
    }

    #[test]
    fn assert_fail_and_die_macros() {
        let failed: Result<(), Cause<&str>> = Err(Cause::fail("bad"));
        assert_fail!(failed, "bad");

        let died: Result<(), Cause<&str>> = Err(Cause::die(Defect::new("bug")));
        assert_die!(died);
    }

    #[test]
    #[should_panic(expected = "Expected an interruption")]
    fn assert_interrupted_panics_on_failure() {
        let failed: Result<(), Cause<&str>> = Err(Cause::fail("bad"));
        assert_interrupted!(failed);
    }

    #[cfg(feature = "proptest")]
    mod proptest_tests {
        use crate::cause::Cause;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_causes_report_their_reasons(cause in any::<Cause<i32>>()) {
                let reasons = cause.reasons().len();
                prop_assert_eq!(cause.is_empty(), reasons == 0);
                prop_assert_eq!(
                    cause.has_fails(),
                    cause.failures().count() > 0
                );
            }
        }
    }
}
