//! The host execution context.
//!
//! Every public callbridge operation and every user callback runs on one
//! thread, the host. `HostContext` is that thread's scheduler: a FIFO of
//! deferred callbacks plus a root set of values that must stay alive without
//! any other owner (a started server keeps itself alive this way).
//!
//! Nothing here is `Send`. State reached only from the host needs no locks.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

type Task = Box<dyn FnOnce()>;

/// Handle to an entry in the host root set.
///
/// Not `Clone`: a root is released at most once.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a root that is never released keeps its value alive forever"]
pub struct RootToken(u64);

impl RootToken {
    /// Identifier of the root entry.
    pub fn id(&self) -> u64 {
        self.0
    }
}

struct HostInner {
    tasks: RefCell<VecDeque<Task>>,
    roots: RefCell<HashMap<u64, Rc<dyn Any>>>,
    next_root: Cell<u64>,
}

/// Scheduler and root set for the single host thread.
///
/// Cloning is cheap; clones share the same queue and roots.
///
/// # Example
///
/// ```
/// use callbridge_server::HostContext;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let host = HostContext::new();
/// let ran = Rc::new(Cell::new(false));
/// let flag = Rc::clone(&ran);
/// host.schedule(move || flag.set(true));
///
/// assert!(!ran.get());
/// assert_eq!(host.run_pending(), 1);
/// assert!(ran.get());
/// ```
#[derive(Clone)]
pub struct HostContext {
    inner: Rc<HostInner>,
}

impl HostContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(HostInner {
                tasks: RefCell::new(VecDeque::new()),
                roots: RefCell::new(HashMap::new()),
                next_root: Cell::new(1),
            }),
        }
    }

    /// Defers `task` until the next [`run_pending`](Self::run_pending).
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.inner.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Runs deferred tasks in order, including tasks scheduled while running.
    ///
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Adds `value` to the root set.
    pub fn retain(&self, value: Rc<dyn Any>) -> RootToken {
        let id = self.inner.next_root.get();
        self.inner.next_root.set(id + 1);
        self.inner.roots.borrow_mut().insert(id, value);
        RootToken(id)
    }

    /// Removes a root. Returns `false` if the token was not in the set.
    pub fn release(&self, token: RootToken) -> bool {
        // Dropping the value may run destructors that touch the host again.
        let removed = self.inner.roots.borrow_mut().remove(&token.0);
        removed.is_some()
    }

    /// Number of live roots.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.inner.roots.borrow().len()
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("pending_tasks", &self.pending_tasks())
            .field("roots", &self.root_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_run_in_order() {
        let host = HostContext::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = Rc::clone(&log);
            host.schedule(move || log.borrow_mut().push(i));
        }
        assert_eq!(host.pending_tasks(), 3);
        assert_eq!(host.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(host.run_pending(), 0);
    }

    #[test]
    fn test_tasks_scheduled_while_running_also_run() {
        let host = HostContext::new();
        let count = Rc::new(Cell::new(0));

        let inner_host = host.clone();
        let inner_count = Rc::clone(&count);
        host.schedule(move || {
            inner_count.set(inner_count.get() + 1);
            let nested = Rc::clone(&inner_count);
            inner_host.schedule(move || nested.set(nested.get() + 10));
        });

        assert_eq!(host.run_pending(), 2);
        assert_eq!(count.get(), 11);
    }

    #[test]
    fn test_root_keeps_value_alive() {
        let host = HostContext::new();
        let value = Rc::new(42_u32);
        let weak = Rc::downgrade(&value);

        let token = host.retain(value);
        assert_eq!(host.root_count(), 1);
        assert!(weak.upgrade().is_some());

        assert!(host.release(token));
        assert_eq!(host.root_count(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_release_unknown_token() {
        let host = HostContext::new();
        assert!(!host.release(RootToken(99)));
    }
}
