//! Releasable resources.
//!
//! A [`Disposable`] wraps the cleanup action of something that was installed,
//! such as a listener subscription on a channel or a capability pairing.
//! [`Disposable::dispose`] consumes the value, so a resource can only be
//! released once.
//!
//! Dropping a `Disposable` without disposing it keeps the resource installed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Disposable
// ============================================================================

type Action = Box<dyn FnOnce() + Send + 'static>;

/// A resource that can be released exactly once.
///
/// # Example
///
/// ```ignore
/// let subscription = channel.on_notification("liveLog.logExpression", |params| {
///     println!("{params}");
/// });
///
/// // Later
/// subscription.dispose();
/// ```
#[must_use = "a Disposable does nothing unless disposed or stored"]
#[derive(Default)]
pub struct Disposable {
    actions: Vec<Action>,
}

impl Disposable {
    /// Creates a disposable running `action` on release.
    #[inline]
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// Creates a disposable with nothing to release.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Combines several disposables into one.
    ///
    /// Members are released in reverse order of insertion.
    pub fn combine(items: impl IntoIterator<Item = Disposable>) -> Self {
        let mut combined = Self::empty();
        for item in items {
            combined.track(item);
        }
        combined
    }

    /// Adds another disposable to be released together with this one.
    pub fn track(&mut self, other: Disposable) {
        self.actions.extend(other.actions);
    }

    /// Returns `true` if releasing this disposable does nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Releases the resource.
    pub fn dispose(self) {
        for action in self.actions.into_iter().rev() {
            action();
        }
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl From<Vec<Disposable>> for Disposable {
    fn from(items: Vec<Disposable>) -> Self {
        Self::combine(items)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    #[test]
    fn test_dispose_runs_action() {
        let hits = Arc::new(Mutex::new(0));
        let hits_clone = Arc::clone(&hits);
        let disposable = Disposable::new(move || *hits_clone.lock() += 1);

        disposable.dispose();
        assert_eq!(*hits.lock(), 1);
    }

    #[test]
    fn test_drop_does_not_dispose() {
        let hits = Arc::new(Mutex::new(0));
        let hits_clone = Arc::clone(&hits);
        drop(Disposable::new(move || *hits_clone.lock() += 1));
        assert_eq!(*hits.lock(), 0);
    }

    #[test]
    fn test_combine_releases_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let items = (0..3).map(|i| {
            let order = Arc::clone(&order);
            Disposable::new(move || order.lock().push(i))
        });

        Disposable::combine(items).dispose();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_empty() {
        assert!(Disposable::empty().is_empty());
        assert!(!Disposable::new(|| {}).is_empty());
    }
}
