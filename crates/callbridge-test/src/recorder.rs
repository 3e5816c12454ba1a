//! Callback capture.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Collects the values passed to host callbacks.
///
/// Every callback created by [`Recorder::callback`] appends to the same
/// list, so a test can hand several of them out and inspect the results
/// after the queue has been drained.
///
/// # Example
///
/// ```
/// use callbridge_test::Recorder;
///
/// let recorder = Recorder::new();
/// let callback = recorder.callback();
/// callback(7);
///
/// assert_eq!(recorder.len(), 1);
/// assert_eq!(recorder.take(), vec![7]);
/// assert!(recorder.is_empty());
/// ```
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
}

impl<T: 'static> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self {
            values: Rc::default(),
        }
    }

    /// Returns a callback that records its argument.
    pub fn callback(&self) -> impl FnOnce(T) + 'static {
        let values = Rc::clone(&self.values);
        move |value| values.borrow_mut().push(value)
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    /// Removes and returns every recorded value, oldest first.
    pub fn take(&self) -> Vec<T> {
        self.values.borrow_mut().drain(..).collect()
    }

    /// Removes and returns the only recorded value.
    ///
    /// # Panics
    ///
    /// Panics unless exactly one value was recorded.
    pub fn take_one(&self) -> T {
        let mut values = self.take();
        assert_eq!(values.len(), 1, "expected exactly one recorded value");
        values.remove(0)
    }
}

impl<T: 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: Rc::clone(&self.values),
        }
    }
}

impl<T> fmt::Debug for Recorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("len", &self.values.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callbacks_share_storage() {
        let recorder = Recorder::new();
        let first = recorder.callback();
        let second = recorder.clone().callback();
        second("b");
        first("a");
        assert_eq!(recorder.take(), vec!["b", "a"]);
    }

    #[test]
    #[should_panic(expected = "exactly one")]
    fn test_take_one_panics_on_empty() {
        let recorder: Recorder<u8> = Recorder::new();
        recorder.take_one();
    }
}
