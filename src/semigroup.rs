//! Associative accumulation.
//!
//! Two things in this crate grow by appending: a [`Cause`](crate::Cause)
//! gathers the reasons a computation went wrong, and a
//! [`NonEmptyVec`](crate::NonEmptyVec) batch absorbs the batch after it.
//! [`Semigroup`] names that operation so code that folds failures or
//! batches can be written once.
//!
//! ```
//! use millrace::{Cause, Semigroup};
//!
//! let both = Cause::fail("disk full").combine(Cause::interrupt(None));
//!
//! assert_eq!(both.reasons().len(), 2);
//! assert!(both.has_fails());
//! assert!(both.has_interrupts());
//! ```

/// A type with an associative, order-preserving `combine`.
///
/// `a.combine(b).combine(c)` must equal `a.combine(b.combine(c))`.
pub trait Semigroup: Sized {
    /// Append `other` after `self`.
    ///
    /// ```
    /// use millrace::{NonEmptyVec, Semigroup};
    ///
    /// let a = NonEmptyVec::new(1, vec![2]);
    /// assert_eq!(a.combine(NonEmptyVec::singleton(3)).into_vec(), vec![1, 2, 3]);
    /// ```
    fn combine(self, other: Self) -> Self;

    /// Fold `rest` onto `self`, left to right.
    fn combine_all<I>(self, rest: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        rest.into_iter().fold(self, Semigroup::combine)
    }
}

impl<T> Semigroup for Vec<T> {
    #[inline]
    fn combine(mut self, other: Self) -> Self {
        self.extend(other);
        self
    }
}

// Absent values are skipped, so an optional cause can be folded without
// first inventing an empty one.
impl<S: Semigroup> Semigroup for Option<S> {
    fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Some(a), Some(b)) => Some(a.combine(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::{Cause, Reason};

    #[test]
    fn vec_appends_in_order() {
        assert_eq!(vec![1, 2].combine(vec![3]), vec![1, 2, 3]);
        assert_eq!(Vec::<u8>::new().combine(vec![4]), vec![4]);
    }

    #[test]
    fn option_skips_missing_causes() {
        let first: Option<Cause<&str>> = Some(Cause::fail("a"));
        let missing: Option<Cause<&str>> = None;

        let folded = first.combine(missing).combine(Some(Cause::fail("b")));
        let reasons = folded.map(|cause| cause.reasons().to_vec());
        assert_eq!(reasons, Some(vec![Reason::fail("a"), Reason::fail("b")]));

        assert_eq!(None::<Cause<&str>>.combine(None), None);
    }

    #[test]
    fn combine_all_folds_left_to_right() {
        let cause = Cause::fail(1).combine_all(vec![Cause::fail(2), Cause::empty(), Cause::fail(3)]);
        let errors: Vec<i32> = cause.failures().copied().collect();
        assert_eq!(errors, vec![1, 2, 3]);
    }
}
