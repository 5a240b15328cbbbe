//! Defects - unrecoverable failures carried by `Die` reasons.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::runtime::FiberId;

/// An unrecoverable failure: a programming error, a panic, or an error value
/// that was promoted to a defect by [`Cause::squash`](crate::Cause::squash).
///
/// A defect always has a human-readable message. When it was built from a
/// value with [`Defect::from_value`], the original value can be recovered
/// with [`Defect::downcast_ref`].
///
/// # Example
///
/// ```rust
/// use millrace::Defect;
///
/// let defect = Defect::from_value(404u16);
/// assert_eq!(defect.message(), "404");
/// assert_eq!(defect.downcast_ref::<u16>(), Some(&404));
/// ```
#[derive(Clone)]
pub struct Defect {
    message: Arc<str>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
    interruption: bool,
}

impl Defect {
    /// Create a defect from a message.
    pub fn new(message: impl fmt::Display) -> Self {
        Defect {
            message: Arc::from(message.to_string()),
            payload: None,
            interruption: false,
        }
    }

    /// Create a defect that keeps `value` as its payload.
    ///
    /// The message is the value's `Debug` rendering.
    pub fn from_value<T>(value: T) -> Self
    where
        T: fmt::Debug + Send + Sync + 'static,
    {
        Defect {
            message: Arc::from(format!("{:?}", value)),
            payload: Some(Arc::new(value)),
            interruption: false,
        }
    }

    /// Create a defect from a panic payload, as returned by a panicked task.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Defect::new(format!("panicked: {}", message))
    }

    /// The defect synthesized when a cause holds nothing but interruptions.
    pub fn interruption<I>(fiber_ids: I) -> Self
    where
        I: IntoIterator<Item = FiberId>,
    {
        let ids: Vec<String> = fiber_ids.into_iter().map(|id| id.to_string()).collect();
        let message = if ids.is_empty() {
            "interrupted".to_string()
        } else {
            format!("interrupted by fibers: {}", ids.join(", "))
        };
        Defect {
            message: Arc::from(message),
            payload: None,
            interruption: true,
        }
    }

    /// Human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Borrow the payload if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    /// Whether this defect stands in for an interruption.
    pub fn is_interruption(&self) -> bool {
        self.interruption
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defect")
            .field("message", &self.message)
            .field("interruption", &self.interruption)
            .finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.interruption == other.interruption
    }
}

impl Eq for Defect {}

impl std::error::Error for Defect {}
