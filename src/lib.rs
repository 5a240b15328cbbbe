//! # Millrace
//!
//! > *A millrace feeds the wheel only as fast as it turns.*
//!
//! Pull-based, resource-safe channels for async Rust.
//!
//! ## Philosophy
//!
//! A [`Channel`] is a lazy transform from an upstream pull to a downstream
//! pull. Nothing runs until a consumer pulls, so backpressure is the default
//! rather than an add-on:
//! - **Pull** = one step of demand: emit a batch, halt with a value, or fail
//! - **Cause** = everything that went wrong, kept in order, never just the first error
//! - **Scope** = where resources live; closing it releases them, exactly once
//!
//! ## Quick Example
//!
//! ```rust
//! use millrace::channel::MapEffectOptions;
//! use millrace::{Cause, Channel};
//!
//! # tokio_test::block_on(async {
//! let lengths = Channel::<&str, String>::from_array(vec!["wheel", "", "water"])
//!     .map_effect(
//!         |word| async move {
//!             if word.is_empty() {
//!                 Err(Cause::fail("empty word".to_string()))
//!             } else {
//!                 Ok(word.len())
//!             }
//!         },
//!         MapEffectOptions::new().with_concurrency(2),
//!     )
//!     .catch(|error| Channel::<usize, String>::from_array(vec![error.len()]));
//!
//! assert_eq!(lengths.run_collect().await, Ok(vec![5, 10]));
//! # });
//! ```
//!
//! Failures carry a full [`Cause`]: typed errors, defects and interruptions
//! side by side, so recovery code can see all of them at once.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cause;
pub mod channel;
pub mod nonempty;
pub mod pull;
pub mod runtime;
pub mod semigroup;
pub mod testing;

// Re-exports
pub use cause::{AnnotationValue, Annotations, Cause, Defect, Exit, Reason};
pub use channel::Channel;
pub use nonempty::NonEmptyVec;
pub use pull::{BoxPull, Pull, PullResult, Step};
pub use runtime::{FiberId, Scope};
pub use semigroup::Semigroup;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cause::{Cause, Defect, Exit, Reason};
    pub use crate::channel::{
        Channel, Concurrency, FlatMapOptions, HaltStrategy, MapEffectOptions, MergeAllOptions,
    };
    pub use crate::nonempty::NonEmptyVec;
    pub use crate::pull::{Pull, Step};
    pub use crate::runtime::Scope;
    pub use crate::semigroup::Semigroup;
}
