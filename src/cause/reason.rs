//! Individual failure reasons and their diagnostic annotations.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::Defect;
use crate::runtime::FiberId;

/// A type-erased annotation value.
pub type AnnotationValue = Arc<dyn Any + Send + Sync>;

/// Diagnostic metadata attached to a [`Reason`].
///
/// Annotations hold things like a captured span name or the operator that
/// produced the failure. They never participate in equality: two reasons
/// with the same content but different annotations compare equal.
///
/// # Example
///
/// ```rust
/// use millrace::Annotations;
///
/// let annotations = Annotations::new()
///     .with("operator", "map_effect")
///     .with("attempt", 3u32);
///
/// assert_eq!(annotations.get::<&str>("operator"), Some(&"map_effect"));
/// assert_eq!(annotations.get::<u32>("attempt"), Some(&3));
/// assert_eq!(annotations.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Annotations {
    entries: Arc<BTreeMap<String, AnnotationValue>>,
}

impl Annotations {
    /// An empty annotation map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy with `key` set to `value`, replacing any previous entry.
    pub fn with<T>(mut self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.entries).insert(key.into(), Arc::new(value));
        self
    }

    /// Borrow the value under `key` if it has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.entries.get(key)?.downcast_ref::<T>()
    }

    /// Whether an entry exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merge `extra` into a copy of these annotations.
    ///
    /// Keys already present are only replaced when `overwrite` is set.
    pub fn merge(&self, extra: &Annotations, overwrite: bool) -> Annotations {
        if extra.is_empty() {
            return self.clone();
        }
        let mut entries = (*self.entries).clone();
        for (key, value) in extra.entries.iter() {
            if overwrite || !entries.contains_key(key) {
                entries.insert(key.clone(), value.clone());
            }
        }
        Annotations {
            entries: Arc::new(entries),
        }
    }
}

impl fmt::Debug for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys()).finish()
    }
}

/// One entry in a [`Cause`](crate::Cause).
///
/// - `Fail` - a typed, expected, recoverable error
/// - `Die` - an unrecoverable defect
/// - `Interrupt` - cooperative cancellation, optionally naming the fiber
#[derive(Clone)]
pub enum Reason<E> {
    /// A typed, expected error.
    Fail {
        /// The error value.
        error: E,
        /// Diagnostic metadata.
        annotations: Annotations,
    },
    /// An unrecoverable defect.
    Die {
        /// The defect.
        defect: Defect,
        /// Diagnostic metadata.
        annotations: Annotations,
    },
    /// A cancellation signal.
    Interrupt {
        /// The fiber this interruption is attributed to, if known.
        fiber_id: Option<FiberId>,
        /// Diagnostic metadata.
        annotations: Annotations,
    },
}

impl<E> Reason<E> {
    /// A `Fail` reason without annotations.
    pub fn fail(error: E) -> Self {
        Reason::Fail {
            error,
            annotations: Annotations::new(),
        }
    }

    /// A `Die` reason without annotations.
    pub fn die(defect: Defect) -> Self {
        Reason::Die {
            defect,
            annotations: Annotations::new(),
        }
    }

    /// An `Interrupt` reason without annotations.
    pub fn interrupt(fiber_id: Option<FiberId>) -> Self {
        Reason::Interrupt {
            fiber_id,
            annotations: Annotations::new(),
        }
    }

    /// The annotations attached to this reason.
    pub fn annotations(&self) -> &Annotations {
        match self {
            Reason::Fail { annotations, .. }
            | Reason::Die { annotations, .. }
            | Reason::Interrupt { annotations, .. } => annotations,
        }
    }

    /// Return this reason with `extra` merged into its annotations.
    pub fn annotate(self, extra: &Annotations, overwrite: bool) -> Self {
        match self {
            Reason::Fail { error, annotations } => Reason::Fail {
                error,
                annotations: annotations.merge(extra, overwrite),
            },
            Reason::Die {
                defect,
                annotations,
            } => Reason::Die {
                defect,
                annotations: annotations.merge(extra, overwrite),
            },
            Reason::Interrupt {
                fiber_id,
                annotations,
            } => Reason::Interrupt {
                fiber_id,
                annotations: annotations.merge(extra, overwrite),
            },
        }
    }

    /// Whether this is a `Fail` reason.
    pub fn is_fail(&self) -> bool {
        matches!(self, Reason::Fail { .. })
    }

    /// Whether this is a `Die` reason.
    pub fn is_die(&self) -> bool {
        matches!(self, Reason::Die { .. })
    }

    /// Whether this is an `Interrupt` reason.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Reason::Interrupt { .. })
    }

    /// Transform the error of a `Fail` reason; other variants pass through.
    pub fn map<E2, F>(self, f: F) -> Reason<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Reason::Fail { error, annotations } => Reason::Fail {
                error: f(error),
                annotations,
            },
            Reason::Die {
                defect,
                annotations,
            } => Reason::Die {
                defect,
                annotations,
            },
            Reason::Interrupt {
                fiber_id,
                annotations,
            } => Reason::Interrupt {
                fiber_id,
                annotations,
            },
        }
    }

    /// Re-type a `Die` or `Interrupt` reason. Returns `None` for `Fail`.
    pub fn retype<E2>(self) -> Option<Reason<E2>> {
        match self {
            Reason::Fail { .. } => None,
            Reason::Die {
                defect,
                annotations,
            } => Some(Reason::Die {
                defect,
                annotations,
            }),
            Reason::Interrupt {
                fiber_id,
                annotations,
            } => Some(Reason::Interrupt {
                fiber_id,
                annotations,
            }),
        }
    }

    /// Copy this reason with the error value of a `Fail` erased.
    pub fn erase(&self) -> Reason<()> {
        match self {
            Reason::Fail { annotations, .. } => Reason::Fail {
                error: (),
                annotations: annotations.clone(),
            },
            Reason::Die {
                defect,
                annotations,
            } => Reason::Die {
                defect: defect.clone(),
                annotations: annotations.clone(),
            },
            Reason::Interrupt {
                fiber_id,
                annotations,
            } => Reason::Interrupt {
                fiber_id: *fiber_id,
                annotations: annotations.clone(),
            },
        }
    }
}

impl<E: PartialEq> PartialEq for Reason<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Reason::Fail { error: a, .. }, Reason::Fail { error: b, .. }) => a == b,
            (Reason::Die { defect: a, .. }, Reason::Die { defect: b, .. }) => a == b,
            (Reason::Interrupt { fiber_id: a, .. }, Reason::Interrupt { fiber_id: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl<E: Eq> Eq for Reason<E> {}

impl<E: fmt::Debug> fmt::Debug for Reason<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Fail { error, .. } => f.debug_struct("Fail").field("error", error).finish(),
            Reason::Die { defect, .. } => f.debug_struct("Die").field("defect", defect).finish(),
            Reason::Interrupt { fiber_id, .. } => f
                .debug_struct("Interrupt")
                .field("fiber_id", fiber_id)
                .finish(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Reason<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Fail { error, .. } => write!(f, "Fail: {}", error),
            Reason::Die { defect, .. } => write!(f, "Die: {}", defect),
            Reason::Interrupt {
                fiber_id: Some(id), ..
            } => write!(f, "Interrupt: by fiber {}", id),
            Reason::Interrupt { fiber_id: None, .. } => write!(f, "Interrupt"),
        }
    }
}
