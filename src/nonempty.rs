//! Non-empty batches of emitted elements
//!
//! Every successful pull emits at least one element. `NonEmptyVec<T>` makes
//! that guarantee part of the type, so consumers never have to handle an
//! "empty emission" case and producers cannot accidentally create one.
//!
//! # Examples
//!
//! ```
//! use millrace::NonEmptyVec;
//!
//! let batch = NonEmptyVec::new(1, vec![2, 3, 4]);
//! assert_eq!(batch.head(), &1);
//! assert_eq!(batch.last(), &4);
//! assert_eq!(batch.len(), 4);
//! ```

use crate::Semigroup;

/// A vector guaranteed to contain at least one element.
///
/// Backed by a single `Vec<T>` so that batches can be built, split and
/// flattened without re-shuffling a separate head element.
///
/// # Example
///
/// ```
/// use millrace::NonEmptyVec;
///
/// let batch = NonEmptyVec::from_vec(vec![1, 2, 3]).unwrap();
/// assert_eq!(batch.as_slice(), &[1, 2, 3]);
/// assert!(NonEmptyVec::from_vec(Vec::<i32>::new()).is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyVec<T> {
    items: Vec<T>,
}

impl<T> NonEmptyVec<T> {
    /// Create a batch from a head element and the rest.
    pub fn new(head: T, tail: Vec<T>) -> Self {
        let mut items = Vec::with_capacity(tail.len() + 1);
        items.push(head);
        items.extend(tail);
        Self { items }
    }

    /// Create a batch holding exactly one element.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::NonEmptyVec;
    ///
    /// let batch = NonEmptyVec::singleton(42);
    /// assert_eq!(batch.len(), 1);
    /// ```
    pub fn singleton(value: T) -> Self {
        Self { items: vec![value] }
    }

    /// Try to create a batch from a `Vec`.
    ///
    /// Returns `None` if the vector is empty.
    pub fn from_vec(items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            None
        } else {
            Some(Self { items })
        }
    }

    /// Collect an iterator into a batch, or `None` if it yields nothing.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::NonEmptyVec;
    ///
    /// let batch = NonEmptyVec::try_from_iter(1..=3).unwrap();
    /// assert_eq!(batch.into_vec(), vec![1, 2, 3]);
    /// assert!(NonEmptyVec::try_from_iter(std::iter::empty::<i32>()).is_none());
    /// ```
    pub fn try_from_iter<I>(iter: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
    {
        Self::from_vec(iter.into_iter().collect())
    }

    /// Create a batch from a `Vec` without checking.
    ///
    /// # Panics
    ///
    /// Panics if the vector is empty.
    pub fn from_vec_unchecked(items: Vec<T>) -> Self {
        Self::from_vec(items).expect("NonEmptyVec::from_vec_unchecked called on empty Vec")
    }

    /// First element.
    pub fn head(&self) -> &T {
        &self.items[0]
    }

    /// All elements except the first.
    pub fn tail(&self) -> &[T] {
        &self.items[1..]
    }

    /// Last element.
    pub fn last(&self) -> &T {
        &self.items[self.items.len() - 1]
    }

    /// Number of elements. Always >= 1.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false`; present to satisfy clippy's `len_without_is_empty` lint.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// View the batch as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Append an element.
    pub fn push(&mut self, value: T) {
        self.items.push(value);
    }

    /// Keep at most `len` elements.
    ///
    /// `len` is clamped to at least one so the batch stays non-empty.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::NonEmptyVec;
    ///
    /// let mut batch = NonEmptyVec::new(1, vec![2, 3]);
    /// batch.truncate(0);
    /// assert_eq!(batch.into_vec(), vec![1]);
    /// ```
    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len.max(1));
    }

    /// Map a function over all elements.
    ///
    /// # Example
    ///
    /// ```
    /// use millrace::NonEmptyVec;
    ///
    /// let doubled = NonEmptyVec::new(1, vec![2, 3]).map(|x| x * 2);
    /// assert_eq!(doubled.into_vec(), vec![2, 4, 6]);
    /// ```
    pub fn map<U, F>(self, f: F) -> NonEmptyVec<U>
    where
        F: FnMut(T) -> U,
    {
        NonEmptyVec {
            items: self.items.into_iter().map(f).collect(),
        }
    }

    /// Filter elements. Since filtering might remove everything, this returns `Vec<T>`.
    pub fn filter<F>(self, predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.items.into_iter().filter(predicate).collect()
    }

    /// Convert to a regular `Vec`.
    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    /// Iterate over all elements.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

// Semigroup: concatenation
impl<T> Semigroup for NonEmptyVec<T> {
    fn combine(mut self, other: Self) -> Self {
        self.items.extend(other.items);
        self
    }
}

impl<T> IntoIterator for NonEmptyVec<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a NonEmptyVec<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> From<NonEmptyVec<T>> for Vec<T> {
    fn from(batch: NonEmptyVec<T>) -> Self {
        batch.items
    }
}

impl<T> std::ops::Index<usize> for NonEmptyVec<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton() {
        let nev = NonEmptyVec::singleton(42);
        assert_eq!(nev.head(), &42);
        assert_eq!(nev.tail(), &[] as &[i32]);
        assert_eq!(nev.len(), 1);
    }

    #[test]
    fn test_new() {
        let nev = NonEmptyVec::new(1, vec![2, 3]);
        assert_eq!(nev.head(), &1);
        assert_eq!(nev.tail(), &[2, 3]);
        assert_eq!(nev.len(), 3);
    }

    #[test]
    fn test_from_vec() {
        let nev = NonEmptyVec::from_vec(vec![1, 2, 3]).unwrap();
        assert_eq!(nev.as_slice(), &[1, 2, 3]);
        assert!(NonEmptyVec::from_vec(Vec::<i32>::new()).is_none());
    }

    #[test]
    #[should_panic(expected = "NonEmptyVec::from_vec_unchecked called on empty Vec")]
    fn test_from_vec_unchecked_panics() {
        NonEmptyVec::from_vec_unchecked(Vec::<i32>::new());
    }

    #[test]
    fn test_last() {
        assert_eq!(NonEmptyVec::new(1, vec![2, 3]).last(), &3);
        assert_eq!(NonEmptyVec::singleton(42).last(), &42);
    }

    #[test]
    fn test_truncate_keeps_one() {
        let mut nev = NonEmptyVec::new(1, vec![2, 3]);
        nev.truncate(2);
        assert_eq!(nev.as_slice(), &[1, 2]);
        nev.truncate(0);
        assert_eq!(nev.as_slice(), &[1]);
    }

    #[test]
    fn test_filter_may_empty() {
        let evens = NonEmptyVec::new(1, vec![2, 3, 4]).filter(|x| x % 2 == 0);
        assert_eq!(evens, vec![2, 4]);
        let none = NonEmptyVec::singleton(1).filter(|x| x % 2 == 0);
        assert!(none.is_empty());
    }

    #[test]
    fn test_semigroup() {
        let combined = NonEmptyVec::new(1, vec![2]).combine(NonEmptyVec::new(3, vec![4]));
        assert_eq!(combined.into_vec(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_iterators() {
        let nev = NonEmptyVec::new(1, vec![2, 3]);
        let sum: i32 = nev.iter().sum();
        assert_eq!(sum, 6);
        let by_ref: Vec<_> = (&nev).into_iter().copied().collect();
        assert_eq!(by_ref, vec![1, 2, 3]);
        let owned: Vec<_> = nev.into_iter().collect();
        assert_eq!(owned, vec![1, 2, 3]);
    }

    #[test]
    fn test_index() {
        let nev = NonEmptyVec::new(1, vec![2, 3]);
        assert_eq!(nev[0], 1);
        assert_eq!(nev[2], 3);
    }
}
