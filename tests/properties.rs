//! Property-based tests for the failure algebra and channel laws

use proptest::prelude::*;

use millrace::channel::MapEffectOptions;
use millrace::pull::{Pull, Step};
use millrace::runtime::{FiberId, Scope};
use millrace::{Cause, Channel, Defect, Reason};

fn reason() -> impl Strategy<Value = Reason<i32>> {
    prop_oneof![
        any::<i32>().prop_map(Reason::fail),
        "[a-z]{1,8}".prop_map(|message| Reason::die(Defect::new(message))),
        proptest::option::of(0u64..64).prop_map(|id| Reason::interrupt(id.map(FiberId::from_raw))),
    ]
}

fn cause() -> impl Strategy<Value = Cause<i32>> {
    prop::collection::vec(reason(), 0..5).prop_map(Cause::from_reasons)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

proptest! {
    #[test]
    fn prop_combine_is_associative_and_concatenative(a in cause(), b in cause(), c in cause()) {
        let expected: Vec<Reason<i32>> = a
            .reasons()
            .iter()
            .chain(b.reasons())
            .chain(c.reasons())
            .cloned()
            .collect();

        let left = a.clone().combine(b.clone()).combine(c.clone());
        let right = a.combine(b.combine(c));

        prop_assert_eq!(left.reasons(), expected.as_slice());
        prop_assert_eq!(right.reasons(), expected.as_slice());
    }

    #[test]
    fn prop_empty_is_identity(a in cause()) {
        prop_assert_eq!(a.clone().combine(Cause::empty()), a.clone());
        prop_assert_eq!(Cause::empty().combine(a.clone()), a);
    }

    #[test]
    fn prop_failure_predicates_agree_with_reasons(a in cause()) {
        prop_assert_eq!(a.has_fails(), a.reasons().iter().any(Reason::is_fail));
        prop_assert_eq!(a.has_dies(), a.reasons().iter().any(Reason::is_die));
        prop_assert_eq!(
            a.is_interrupted_only(),
            !a.is_empty() && a.reasons().iter().all(Reason::is_interrupt)
        );
    }

    #[test]
    fn prop_halt_is_idempotent(items in prop::collection::vec(any::<i16>(), 0..40), chunk in 1usize..8) {
        let steps = runtime().block_on(async move {
            let scope = Scope::new();
            let mut pull = Channel::<i16>::from_iter_chunked(items, chunk)
                .to_pull(&scope)
                .await
                .unwrap();
            while pull.pull().await.unwrap().is_emit() {}
            let mut after = Vec::new();
            for _ in 0..3 {
                after.push(pull.pull().await.unwrap());
            }
            scope.close(Ok(())).await;
            after
        });
        prop_assert!(steps.iter().all(|step| matches!(step, Step::Halt(()))));
    }

    #[test]
    fn prop_map_identity(items in prop::collection::vec(any::<i32>(), 0..64)) {
        let (mapped, plain) = runtime().block_on(async {
            let channel = Channel::<i32>::from_iter_chunked(items.clone(), 5);
            (channel.clone().map(|x| x).run_collect().await, channel.run_collect().await)
        });
        prop_assert_eq!(mapped, plain);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_ordered_concurrency_matches_sequential(
        items in prop::collection::vec(0u8..16, 0..24),
        concurrency in 1usize..6,
    ) {
        let (sequential, concurrent) = runtime().block_on(async {
            let effect = |x: u8| async move {
                // Vary completion order between elements.
                for _ in 0..(x % 4) {
                    tokio::task::yield_now().await;
                }
                Ok(u32::from(x) * 3)
            };
            let source = Channel::<u8, String>::from_iter_chunked(items.clone(), 3);
            let sequential = source
                .clone()
                .map_effect(effect, MapEffectOptions::new())
                .run_collect()
                .await;
            let concurrent = source
                .map_effect(effect, MapEffectOptions::new().with_concurrency(concurrency))
                .run_collect()
                .await;
            (sequential, concurrent)
        });
        let expected: Vec<u32> = items.iter().map(|x| u32::from(*x) * 3).collect();
        prop_assert_eq!(sequential.clone(), Ok(expected));
        prop_assert_eq!(concurrent, sequential);
    }

    #[test]
    fn prop_unordered_is_a_permutation(
        items in prop::collection::vec(0u8..16, 0..24),
        concurrency in 2usize..6,
    ) {
        let collected = runtime().block_on(async {
            Channel::<u8, String>::from_iter_chunked(items.clone(), 4)
                .map_effect(
                    |x| async move {
                        for _ in 0..(x % 3) {
                            tokio::task::yield_now().await;
                        }
                        Ok(x)
                    },
                    MapEffectOptions::new()
                        .with_concurrency(concurrency)
                        .with_unordered(true),
                )
                .run_collect()
                .await
        });
        let mut collected = collected.unwrap();
        let mut expected = items;
        collected.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(collected, expected);
    }

    #[test]
    fn prop_rechunk_preserves_elements(
        items in prop::collection::vec(any::<u16>(), 0..50),
        size in 1usize..7,
    ) {
        let collected = runtime().block_on(async {
            Channel::<u16>::from_iter_chunked(items.clone(), 3)
                .rechunk(size)
                .run_collect()
                .await
        });
        prop_assert_eq!(collected, Ok(items));
    }

    #[test]
    fn prop_take_is_a_prefix(items in prop::collection::vec(any::<i8>(), 0..30), n in 0usize..40) {
        let collected = runtime().block_on(async {
            Channel::<i8>::from_iter_chunked(items.clone(), 4)
                .take(n)
                .run_collect()
                .await
        });
        let expected: Vec<i8> = items.into_iter().take(n).collect();
        prop_assert_eq!(collected, Ok(expected));
    }
}
