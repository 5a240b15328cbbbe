use super::*;
use crate::runtime::FiberId;

fn id(n: u64) -> FiberId {
    FiberId::from_raw(n)
}

// ==================== Construction ====================

#[test]
fn empty_cause_has_no_reasons() {
    let cause = Cause::<String>::empty();
    assert!(cause.is_empty());
    assert!(!cause.has_fails());
    assert!(!cause.has_dies());
    assert!(!cause.has_interrupts());
    assert_eq!(cause, Cause::default());
}

#[test]
fn from_reasons_keeps_order() {
    let cause = Cause::from_reasons(vec![
        Reason::interrupt(Some(id(1))),
        Reason::fail("a"),
        Reason::die(Defect::new("boom")),
    ]);
    assert!(cause.reasons()[0].is_interrupt());
    assert!(cause.reasons()[1].is_fail());
    assert!(cause.reasons()[2].is_die());
}

// ==================== Combine ====================

#[test]
fn combine_concatenates_reasons() {
    let a = Cause::fail(1);
    let b = Cause::interrupt(Some(id(7)));
    let combined = a.clone().combine(b.clone());

    let mut expected = a.into_reasons();
    expected.extend(b.into_reasons());
    assert_eq!(combined.into_reasons(), expected);
}

#[test]
fn combine_is_associative() {
    let a = Cause::fail("a");
    let b = Cause::die(Defect::new("b"));
    let c = Cause::fail("c");

    let left = a.clone().combine(b.clone()).combine(c.clone());
    let right = a.combine(b.combine(c));
    assert_eq!(left, right);
}

#[test]
fn empty_is_identity_for_combine() {
    let cause = Cause::fail("x");
    assert_eq!(cause.clone().combine(Cause::empty()), cause);
    assert_eq!(Cause::empty().combine(cause.clone()), cause);
}

#[test]
fn semigroup_combine_matches_inherent_combine() {
    let via_trait = Semigroup::combine(Cause::fail(1), Cause::fail(2));
    assert_eq!(via_trait, Cause::fail(1).combine(Cause::fail(2)));
}

// ==================== Map ====================

#[test]
fn map_only_touches_fail_reasons() {
    let cause = Cause::fail(2)
        .combine(Cause::die(Defect::new("defect")))
        .combine(Cause::interrupt(Some(id(3))));

    let mapped = cause.map(|n| n * 10);
    assert_eq!(mapped.failures().copied().collect::<Vec<_>>(), vec![20]);
    assert_eq!(mapped.defects().next().map(Defect::message), Some("defect"));
    assert!(mapped.interruptors().contains(&id(3)));
}

// ==================== Queries ====================

#[test]
fn filters_return_first_match() {
    let cause = Cause::fail("first")
        .combine(Cause::fail("second"))
        .combine(Cause::interrupt(Some(id(1))))
        .combine(Cause::interrupt(Some(id(2))));

    assert_eq!(cause.filter_fail(), Some(&Reason::fail("first")));
    assert_eq!(cause.filter_interrupt(), Some(&Reason::interrupt(Some(id(1)))));
    assert_eq!(cause.filter_die(), None);
}

#[test]
fn interruptors_skip_anonymous_interrupts() {
    let cause = Cause::<()>::interrupt(None)
        .combine(Cause::interrupt(Some(id(4))))
        .combine(Cause::interrupt(Some(id(2))))
        .combine(Cause::interrupt(Some(id(4))));

    let ids: Vec<_> = cause.interruptors().into_iter().collect();
    assert_eq!(ids, vec![id(2), id(4)]);
}

#[test]
fn interrupted_only() {
    assert!(Cause::<()>::interrupt(None).is_interrupted_only());
    assert!(!Cause::<()>::empty().is_interrupted_only());
    assert!(!Cause::interrupt(None).combine(Cause::fail(())).is_interrupted_only());
}

#[test]
fn failure_or_cause_splits_first_error() {
    let cause = Cause::interrupt(None).combine(Cause::fail("e1")).combine(Cause::fail("e2"));
    assert_eq!(cause.failure_or_cause(), Ok("e1"));

    let no_fail = Cause::<&str>::die(Defect::new("boom"));
    assert_eq!(no_fail.clone().failure_or_cause(), Err(no_fail));
}

#[test]
fn without_failures_retypes_defects_and_interrupts() {
    let cause = Cause::fail("dropped")
        .combine(Cause::die(Defect::new("kept")))
        .combine(Cause::interrupt(Some(id(9))));

    let retyped: Cause<u64> = cause.without_failures();
    assert_eq!(retyped.reasons().len(), 2);
    assert!(!retyped.has_fails());
    assert!(retyped.has_dies());
    assert!(retyped.has_interrupts());
}

#[test]
fn erase_preserves_shape() {
    let cause = Cause::fail("x").combine(Cause::interrupt(Some(id(5))));
    let erased = cause.erase();
    assert_eq!(erased.reasons().len(), 2);
    assert_eq!(erased.filter_fail(), Some(&Reason::fail(())));
    assert!(erased.interruptors().contains(&id(5)));
}

// ==================== Annotations ====================

#[test]
fn annotations_do_not_affect_equality() {
    let plain = Reason::fail("e");
    let annotated = Reason::fail("e").annotate(&Annotations::new().with("span", "pull"), false);
    assert_eq!(plain, annotated);
    assert_eq!(annotated.annotations().get::<&str>("span"), Some(&"pull"));
}

#[test]
fn annotate_respects_overwrite_flag() {
    let base = Annotations::new().with("stage", 1u32);
    let extra = Annotations::new().with("stage", 2u32).with("op", "map");

    let kept = base.merge(&extra, false);
    assert_eq!(kept.get::<u32>("stage"), Some(&1));
    assert_eq!(kept.get::<&str>("op"), Some(&"map"));

    let replaced = base.merge(&extra, true);
    assert_eq!(replaced.get::<u32>("stage"), Some(&2));
}

#[test]
fn cause_annotate_reaches_every_reason() {
    let cause = Cause::fail("e")
        .combine(Cause::interrupt(None))
        .annotate(&Annotations::new().with("channel", "merge"), true);
    assert!(cause
        .reasons()
        .iter()
        .all(|reason| reason.annotations().contains_key("channel")));
}

// ==================== Squash ====================

#[test]
fn squash_prefers_defect() {
    let cause = Cause::fail("error")
        .combine(Cause::die(Defect::new("first defect")))
        .combine(Cause::die(Defect::new("second defect")));
    assert_eq!(cause.squash().message(), "first defect");
}

#[test]
fn squash_uses_first_failure_as_payload() {
    let cause = Cause::fail(10).combine(Cause::fail(20));
    let defect = cause.squash();
    assert_eq!(defect.downcast_ref::<i32>(), Some(&10));
    assert!(!defect.is_interruption());
}

#[test]
fn squash_synthesizes_interruption() {
    let cause = Cause::<String>::interrupt(Some(id(3))).combine(Cause::interrupt(Some(id(1))));
    let defect = cause.squash();
    assert!(defect.is_interruption());
    assert_eq!(defect.message(), "interrupted by fibers: #1, #3");
}

#[test]
fn squash_of_empty_cause() {
    assert_eq!(Cause::<String>::empty().squash().message(), "empty cause");
}

// ==================== Rendering ====================

#[test]
fn display_renders_each_reason() {
    let cause = Cause::fail("bad input")
        .combine(Cause::die(Defect::new("boom")))
        .combine(Cause::interrupt(Some(id(2))));
    assert_eq!(
        cause.to_string(),
        "Fail: bad input\nDie: boom\nInterrupt: by fiber #2"
    );
    assert_eq!(Cause::<String>::empty().to_string(), "empty cause");
}

#[test]
fn defect_from_panic_payload() {
    let payload: Box<dyn std::any::Any + Send> = Box::new("kaboom");
    assert_eq!(Defect::from_panic(payload).message(), "panicked: kaboom");

    let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
    assert_eq!(Defect::from_panic(payload).message(), "panicked: owned");
}
