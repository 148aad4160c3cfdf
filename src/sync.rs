//! Lock helpers and keyed exclusive sections.
//!
//! Poisoned locks are recovered: every critical section in this crate
//! leaves its data consistent before anything that can panic runs.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) enum Claim<'a, K: Eq + Hash + Clone> {
    /// The caller owns the section for `K` until the guard drops.
    Owned(InFlightGuard<'a, K>),
    /// `done` reported the work as finished.
    Finished,
    /// The current thread already owns the section for `K`.
    Recursive,
}

/// Per-key exclusive sections that know their owning thread.
///
/// Unlike a plain per-key mutex this lets a thread detect that it is
/// re-entering its own section instead of deadlocking on it.
pub(crate) struct InFlight<K> {
    owners: Mutex<HashMap<K, ThreadId>>,
    released: Condvar,
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub(crate) fn new() -> Self {
        Self { owners: Mutex::new(HashMap::new()), released: Condvar::new() }
    }

    /// Enters the section for `key`. `done` is evaluated under the internal
    /// lock; when it reports the work as already finished, nobody needs the
    /// section and [`Claim::Finished`] is returned.
    pub(crate) fn claim(&self, key: &K, done: impl Fn() -> bool) -> Claim<'_, K> {
        let me = thread::current().id();
        let mut owners = lock(&self.owners);
        loop {
            if done() {
                return Claim::Finished;
            }
            match owners.get(key) {
                Some(owner) if *owner == me => return Claim::Recursive,
                Some(_) => {
                    owners = self.released.wait(owners).unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    owners.insert(key.clone(), me);
                    return Claim::Owned(InFlightGuard { sections: self, key: key.clone() });
                }
            }
        }
    }

    pub(crate) fn is_owned(&self, key: &K) -> bool {
        lock(&self.owners).contains_key(key)
    }
}

pub(crate) struct InFlightGuard<'a, K: Eq + Hash + Clone> {
    sections: &'a InFlight<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for InFlightGuard<'_, K> {
    fn drop(&mut self) {
        lock(&self.sections.owners).remove(&self.key);
        self.sections.released.notify_all();
    }
}
