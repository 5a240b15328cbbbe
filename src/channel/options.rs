//! Per-call configuration for the concurrent operators.
//!
//! Options are plain data with builder-style setters, so they can be built
//! once, cloned and inspected.
//!
//! # Example
//!
//! ```rust
//! use millrace::channel::{Concurrency, MapEffectOptions};
//!
//! let options = MapEffectOptions::new()
//!     .with_concurrency(Concurrency::Bounded(8))
//!     .with_unordered(true);
//!
//! assert_eq!(options.concurrency().limit(), 8);
//! assert!(options.unordered());
//! assert_eq!(options.buffer_size(), millrace::channel::DEFAULT_BUFFER_SIZE);
//! ```

use tokio::sync::Semaphore;

/// Default number of elements per batch for constructors that must choose one.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default capacity of the internal queues of concurrent operators.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// The concurrency limit used for [`Concurrency::Unbounded`].
pub const UNBOUNDED_CONCURRENCY: usize = u32::MAX as usize;

/// An upper bound on simultaneously running child fibers.
///
/// The bound is a limit, not a promise of parallel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Concurrency {
    /// At most this many. Zero is treated as one.
    Bounded(usize),
    /// As many as the input provides.
    Unbounded,
}

impl Concurrency {
    /// The resolved limit, clamped to at least one.
    ///
    /// ```rust
    /// use millrace::channel::Concurrency;
    ///
    /// assert_eq!(Concurrency::Bounded(0).limit(), 1);
    /// assert_eq!(Concurrency::Bounded(4).limit(), 4);
    /// assert!(Concurrency::Unbounded.limit() > 1_000_000);
    /// ```
    pub fn limit(&self) -> usize {
        let requested = match self {
            Concurrency::Bounded(n) => *n,
            Concurrency::Unbounded => UNBOUNDED_CONCURRENCY,
        };
        requested
            .clamp(1, UNBOUNDED_CONCURRENCY)
            .min(Semaphore::MAX_PERMITS)
    }

    /// Whether the operator should run one element at a time.
    pub fn is_sequential(&self) -> bool {
        self.limit() == 1
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Bounded(1)
    }
}

impl From<usize> for Concurrency {
    fn from(n: usize) -> Self {
        Concurrency::Bounded(n)
    }
}

/// Options for [`Channel::map_effect`](crate::Channel::map_effect).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MapEffectOptions {
    concurrency: Concurrency,
    unordered: bool,
    buffer_size: usize,
}

impl MapEffectOptions {
    /// Sequential, ordered, default buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency limit.
    pub fn with_concurrency(mut self, concurrency: impl Into<Concurrency>) -> Self {
        self.concurrency = concurrency.into();
        self
    }

    /// Emit results as they complete instead of in input order.
    pub fn with_unordered(mut self, unordered: bool) -> Self {
        self.unordered = unordered;
        self
    }

    /// Set the capacity of the output buffer.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// The concurrency limit.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Whether results may be reordered.
    pub fn unordered(&self) -> bool {
        self.unordered
    }

    /// Output buffer capacity.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for MapEffectOptions {
    fn default() -> Self {
        MapEffectOptions {
            concurrency: Concurrency::default(),
            unordered: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Options for [`Channel::flat_map`](crate::Channel::flat_map).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlatMapOptions {
    concurrency: Concurrency,
    buffer_size: usize,
}

impl FlatMapOptions {
    /// Sequential, default buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many child channels may run at once.
    pub fn with_concurrency(mut self, concurrency: impl Into<Concurrency>) -> Self {
        self.concurrency = concurrency.into();
        self
    }

    /// Set the capacity of the shared output buffer.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// The concurrency limit.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Output buffer capacity.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for FlatMapOptions {
    fn default() -> Self {
        FlatMapOptions {
            concurrency: Concurrency::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Options for [`Channel::merge_all`](crate::Channel::merge_all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MergeAllOptions {
    concurrency: Concurrency,
    buffer_size: usize,
    switch: bool,
}

impl MergeAllOptions {
    /// Unbounded concurrency, default buffer, no switching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many children may run at once.
    pub fn with_concurrency(mut self, concurrency: impl Into<Concurrency>) -> Self {
        self.concurrency = concurrency.into();
        self
    }

    /// Set the capacity of the shared output buffer.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Interrupt running children whenever a new child arrives.
    pub fn with_switch(mut self, switch: bool) -> Self {
        self.switch = switch;
        self
    }

    /// The concurrency limit.
    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Output buffer capacity.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether latest-wins switching is on.
    ///
    /// When it is, [`concurrency`](Self::concurrency) is ignored.
    pub fn switch(&self) -> bool {
        self.switch
    }
}

impl Default for MergeAllOptions {
    fn default() -> Self {
        MergeAllOptions {
            concurrency: Concurrency::Unbounded,
            buffer_size: DEFAULT_BUFFER_SIZE,
            switch: false,
        }
    }
}

impl From<FlatMapOptions> for MergeAllOptions {
    fn from(options: FlatMapOptions) -> Self {
        MergeAllOptions {
            concurrency: options.concurrency,
            buffer_size: options.buffer_size,
            switch: false,
        }
    }
}

/// Decides when [`Channel::merge`](crate::Channel::merge) halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum HaltStrategy {
    /// Halt when the left side halts; the right side is interrupted.
    Left,
    /// Halt when the right side halts; the left side is interrupted.
    Right,
    /// Halt once both sides have halted.
    #[default]
    Both,
    /// Halt as soon as either side halts; the other is interrupted.
    Either,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_limit_clamps() {
        assert_eq!(Concurrency::Bounded(0).limit(), 1);
        assert!(Concurrency::Bounded(1).is_sequential());
        assert!(!Concurrency::Bounded(3).is_sequential());
        assert!(Concurrency::Unbounded.limit() <= Semaphore::MAX_PERMITS);
        assert!(Concurrency::Unbounded.limit() <= u32::MAX as usize);
    }

    #[test]
    fn defaults() {
        let map = MapEffectOptions::default();
        assert_eq!(map.concurrency(), Concurrency::Bounded(1));
        assert!(!map.unordered());
        assert_eq!(map.buffer_size(), DEFAULT_BUFFER_SIZE);

        let merge = MergeAllOptions::default();
        assert_eq!(merge.concurrency(), Concurrency::Unbounded);
        assert!(!merge.switch());

        assert_eq!(HaltStrategy::default(), HaltStrategy::Both);
    }

    #[test]
    fn builders_set_fields() {
        let options = MergeAllOptions::new()
            .with_concurrency(2)
            .with_buffer_size(4)
            .with_switch(true);
        assert_eq!(options.concurrency(), Concurrency::Bounded(2));
        assert_eq!(options.buffer_size(), 4);
        assert!(options.switch());

        let from_flat: MergeAllOptions = FlatMapOptions::new().with_concurrency(3).into();
        assert_eq!(from_flat.concurrency(), Concurrency::Bounded(3));
        assert!(!from_flat.switch());
    }
}
