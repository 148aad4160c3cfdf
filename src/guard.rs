//! Per-thread call depth counters.
//!
//! One counter per (thread, operation type). The operation type is any
//! `'static` marker type, so independent operations never see each other's
//! depth.
//!
//! ```
//! use indy_linker::guard::{self, ReentrancyGuard};
//!
//! struct Linking;
//!
//! let outer = ReentrancyGuard::enter::<Linking>();
//! assert!(!outer.is_nested());
//! {
//!     let inner = ReentrancyGuard::enter::<Linking>();
//!     assert!(inner.is_nested());
//!     assert_eq!(guard::depth::<Linking>(), 2);
//! }
//! assert_eq!(guard::depth::<Linking>(), 1);
//! ```

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

thread_local! {
    static DEPTHS: RefCell<HashMap<TypeId, usize>> = RefCell::new(HashMap::new());
}

/// Increments the counter of `Op` and returns its value before the
/// increment. Every call must be paired with [`exit`].
pub fn enter<Op: 'static>() -> usize {
    DEPTHS.with(|d| {
        let mut depths = d.borrow_mut();
        let depth = depths.entry(TypeId::of::<Op>()).or_insert(0);
        let before = *depth;
        *depth += 1;
        before
    })
}

pub fn exit<Op: 'static>() {
    DEPTHS.with(|d| {
        let mut depths = d.borrow_mut();
        if let Some(depth) = depths.get_mut(&TypeId::of::<Op>()) {
            *depth = depth.saturating_sub(1);
            if *depth == 0 {
                depths.remove(&TypeId::of::<Op>());
            }
        }
    })
}

pub fn depth<Op: 'static>() -> usize {
    DEPTHS.with(|d| d.borrow().get(&TypeId::of::<Op>()).copied().unwrap_or(0))
}

/// RAII form of [`enter`] / [`exit`]; the counter is decremented when the
/// guard drops, on every exit path. Not `Send`.
#[must_use = "the depth is released as soon as the guard is dropped"]
pub struct ReentrancyGuard {
    exit: fn(),
    before: usize,
    _thread_bound: PhantomData<*const ()>,
}

impl ReentrancyGuard {
    pub fn enter<Op: 'static>() -> Self {
        Self { exit: exit::<Op>, before: enter::<Op>(), _thread_bound: PhantomData }
    }

    /// Depth observed before this guard entered.
    pub fn depth_before(&self) -> usize {
        self.before
    }

    pub fn is_nested(&self) -> bool {
        self.before > 0
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        (self.exit)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Linking;
    struct Other;

    #[test]
    fn counters_are_per_operation() {
        let _a = ReentrancyGuard::enter::<Linking>();
        let b = ReentrancyGuard::enter::<Other>();
        assert!(!b.is_nested());
        assert_eq!(depth::<Linking>(), 1);
        assert_eq!(depth::<Other>(), 1);
    }

    #[test]
    fn counters_are_per_thread() {
        let _outer = ReentrancyGuard::enter::<Linking>();
        let nested = thread::spawn(|| ReentrancyGuard::enter::<Linking>().is_nested()).join().unwrap();
        assert!(!nested);
    }

    #[test]
    fn released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _g = ReentrancyGuard::enter::<Linking>();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(depth::<Linking>(), 0);
    }

    #[test]
    fn manual_pairing() {
        assert_eq!(enter::<Other>(), 0);
        assert_eq!(enter::<Other>(), 1);
        exit::<Other>();
        exit::<Other>();
        exit::<Other>();
        assert_eq!(depth::<Other>(), 0);
    }
}
