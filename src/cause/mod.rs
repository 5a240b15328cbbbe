//! The failure algebra: everything that went wrong in one computation.
//!
//! A [`Cause`] is an ordered list of [`Reason`]s. Each reason is one of:
//!
//! - **Fail** - a typed, expected error the caller can handle
//! - **Die** - a [`Defect`], usually a programming error or panic
//! - **Interrupt** - cooperative cancellation, optionally naming a fiber
//!
//! Causes accumulate rather than short-circuit: when a channel fails while
//! its background work is being interrupted, both facts are kept, in the
//! order they happened.
//!
//! # Example
//!
//! ```rust
//! use millrace::{Cause, Defect, Reason};
//!
//! let cause = Cause::fail("timeout")
//!     .combine(Cause::die(Defect::new("index out of bounds")));
//!
//! assert!(cause.has_fails());
//! assert!(cause.has_dies());
//! assert_eq!(cause.reasons()[0], Reason::fail("timeout"));
//!
//! // A defect wins when collapsing to a single representative.
//! assert_eq!(cause.squash().message(), "index out of bounds");
//! ```

mod defect;
mod reason;

use std::collections::BTreeSet;
use std::fmt;

pub use defect::Defect;
pub use reason::{AnnotationValue, Annotations, Reason};

use crate::runtime::FiberId;
use crate::Semigroup;

/// The outcome of a computation: a value, or the cause of its failure.
pub type Exit<A, E> = Result<A, Cause<E>>;

/// An ordered collection of failure reasons.
///
/// A cause with no reasons is the canonical "no failure" value
/// ([`Cause::empty`]). Combining two causes concatenates their reasons,
/// preserving each side's internal order.
#[derive(Clone, PartialEq)]
pub struct Cause<E> {
    reasons: Vec<Reason<E>>,
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Cause::empty()
    }
}

impl<E> Cause<E> {
    /// The cause with no reasons.
    pub fn empty() -> Self {
        Cause {
            reasons: Vec::new(),
        }
    }

    /// Build a cause from reasons, keeping their order.
    pub fn from_reasons<I>(reasons: I) -> Self
    where
        I: IntoIterator<Item = Reason<E>>,
    {
        Cause {
            reasons: reasons.into_iter().collect(),
        }
    }

    /// A cause holding one typed failure.
    pub fn fail(error: E) -> Self {
        Cause {
            reasons: vec![Reason::fail(error)],
        }
    }

    /// A cause holding one defect.
    pub fn die(defect: Defect) -> Self {
        Cause {
            reasons: vec![Reason::die(defect)],
        }
    }

    /// A cause holding one interruption.
    pub fn interrupt(fiber_id: Option<FiberId>) -> Self {
        Cause {
            reasons: vec![Reason::interrupt(fiber_id)],
        }
    }

    /// The reasons, first to last.
    pub fn reasons(&self) -> &[Reason<E>] {
        &self.reasons
    }

    /// Consume the cause, returning its reasons.
    pub fn into_reasons(self) -> Vec<Reason<E>> {
        self.reasons
    }

    /// Whether this is the "no failure" cause.
    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Concatenate two causes: `self`'s reasons first, then `other`'s.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Cause;
    ///
    /// let combined = Cause::fail(1).combine(Cause::fail(2));
    /// let errors: Vec<_> = combined.failures().copied().collect();
    /// assert_eq!(errors, vec![1, 2]);
    /// ```
    pub fn combine(mut self, other: Cause<E>) -> Self {
        self.reasons.extend(other.reasons);
        self
    }

    /// Apply `f` to every `Fail` error, leaving defects and interruptions untouched.
    pub fn map<E2, F>(self, mut f: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        Cause {
            reasons: self
                .reasons
                .into_iter()
                .map(|reason| reason.map(&mut f))
                .collect(),
        }
    }

    /// Whether any reason is a `Fail`.
    pub fn has_fails(&self) -> bool {
        self.reasons.iter().any(Reason::is_fail)
    }

    /// Whether any reason is a `Die`.
    pub fn has_dies(&self) -> bool {
        self.reasons.iter().any(Reason::is_die)
    }

    /// Whether any reason is an `Interrupt`.
    pub fn has_interrupts(&self) -> bool {
        self.reasons.iter().any(Reason::is_interrupt)
    }

    /// Whether the cause is non-empty and holds nothing but interruptions.
    pub fn is_interrupted_only(&self) -> bool {
        !self.reasons.is_empty() && self.reasons.iter().all(Reason::is_interrupt)
    }

    /// The first `Fail` reason, if any.
    pub fn filter_fail(&self) -> Option<&Reason<E>> {
        self.reasons.iter().find(|reason| reason.is_fail())
    }

    /// The first `Die` reason, if any.
    pub fn filter_die(&self) -> Option<&Reason<E>> {
        self.reasons.iter().find(|reason| reason.is_die())
    }

    /// The first `Interrupt` reason, if any.
    pub fn filter_interrupt(&self) -> Option<&Reason<E>> {
        self.reasons.iter().find(|reason| reason.is_interrupt())
    }

    /// All `Fail` errors, in order.
    pub fn failures(&self) -> impl Iterator<Item = &E> {
        self.reasons.iter().filter_map(|reason| match reason {
            Reason::Fail { error, .. } => Some(error),
            _ => None,
        })
    }

    /// All defects, in order.
    pub fn defects(&self) -> impl Iterator<Item = &Defect> {
        self.reasons.iter().filter_map(|reason| match reason {
            Reason::Die { defect, .. } => Some(defect),
            _ => None,
        })
    }

    /// Every fiber named by an `Interrupt` reason. Anonymous interruptions are skipped.
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.reasons
            .iter()
            .filter_map(|reason| match reason {
                Reason::Interrupt {
                    fiber_id: Some(id), ..
                } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Split off the first typed error.
    ///
    /// Returns `Ok(error)` for the first `Fail` reason, or the unchanged
    /// cause when there is none.
    pub fn failure_or_cause(self) -> Result<E, Cause<E>> {
        if !self.has_fails() {
            return Err(self);
        }
        self.reasons
            .into_iter()
            .find_map(|reason| match reason {
                Reason::Fail { error, .. } => Some(error),
                _ => None,
            })
            .ok_or_else(Cause::empty)
    }

    /// Drop every `Fail` reason, keeping defects and interruptions.
    ///
    /// Lossless for causes where [`has_fails`](Self::has_fails) is false,
    /// which makes it the way to re-raise such a cause under a new error type.
    pub fn without_failures<E2>(self) -> Cause<E2> {
        Cause {
            reasons: self
                .reasons
                .into_iter()
                .filter_map(Reason::retype)
                .collect(),
        }
    }

    /// Copy the cause with every error value erased.
    ///
    /// Scopes record how they were closed as an erased cause, so that
    /// finalizers can branch on the shape of a failure without knowing its type.
    pub fn erase(&self) -> Cause<()> {
        Cause {
            reasons: self.reasons.iter().map(Reason::erase).collect(),
        }
    }

    /// Merge `extra` into the annotations of every reason.
    pub fn annotate(self, extra: &Annotations, overwrite: bool) -> Self {
        Cause {
            reasons: self
                .reasons
                .into_iter()
                .map(|reason| reason.annotate(extra, overwrite))
                .collect(),
        }
    }

    /// Collapse the cause to one representative defect.
    ///
    /// The first `Die` defect wins. Otherwise the first `Fail` error becomes
    /// the defect's payload. A cause holding only interruptions produces an
    /// interruption defect naming every interruptor.
    ///
    /// # Example
    ///
    /// ```rust
    /// use millrace::Cause;
    ///
    /// let defect = Cause::fail("first").combine(Cause::fail("second")).squash();
    /// assert_eq!(defect.downcast_ref::<&str>(), Some(&"first"));
    ///
    /// let interrupted = Cause::<String>::interrupt(None).squash();
    /// assert!(interrupted.is_interruption());
    /// ```
    pub fn squash(&self) -> Defect
    where
        E: Clone + fmt::Debug + Send + Sync + 'static,
    {
        if let Some(defect) = self.defects().next() {
            return defect.clone();
        }
        if let Some(error) = self.failures().next() {
            return Defect::from_value(error.clone());
        }
        if self.has_interrupts() {
            return Defect::interruption(self.interruptors());
        }
        Defect::new("empty cause")
    }
}

impl<E> Semigroup for Cause<E> {
    fn combine(self, other: Self) -> Self {
        Cause::combine(self, other)
    }
}

impl<E> From<Reason<E>> for Cause<E> {
    fn from(reason: Reason<E>) -> Self {
        Cause {
            reasons: vec![reason],
        }
    }
}

impl<E> From<Defect> for Cause<E> {
    fn from(defect: Defect) -> Self {
        Cause::die(defect)
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cause").field(&self.reasons).finish()
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reasons.is_empty() {
            return f.write_str("empty cause");
        }
        for (index, reason) in self.reasons.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", reason)?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for Cause<E> where E: fmt::Debug + fmt::Display {}

#[cfg(test)]
mod tests;
