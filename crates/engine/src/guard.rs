//! Whole-ledger lock with reentrancy detection.
//!
//! Engine calls serialize on one mutex. A collaborator that calls back into the
//! engine from inside an action would otherwise deadlock on it; instead the
//! guard remembers which thread holds the lock and fails the nested call with
//! [`EngineError::ReentrantCall`].

use std::ops::{Deref, DerefMut};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, MutexGuard};

use pegvault_common::error::EngineError;

#[derive(Debug, Default)]
pub struct Guarded<T> {
    holder: Mutex<Option<ThreadId>>,
    value: Mutex<T>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            holder: Mutex::new(None),
            value: Mutex::new(value),
        }
    }

    /// Lock the value, blocking while another thread holds it.
    pub fn enter(&self) -> Result<Entered<'_, T>, EngineError> {
        let me = thread::current().id();
        if *self.holder.lock() == Some(me) {
            tracing::warn!("Reentrant engine call rejected");
            return Err(EngineError::ReentrantCall);
        }

        let value = self.value.lock();
        *self.holder.lock() = Some(me);
        Ok(Entered {
            holder: &self.holder,
            value,
        })
    }

    pub fn is_entered(&self) -> bool {
        self.holder.lock().is_some()
    }
}

/// Exclusive access to the guarded value; released on drop.
pub struct Entered<'a, T> {
    holder: &'a Mutex<Option<ThreadId>>,
    value: MutexGuard<'a, T>,
}

impl<T> Deref for Entered<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Entered<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Entered<'_, T> {
    fn drop(&mut self) {
        // cleared while the value lock is still held
        *self.holder.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_nested_enter_rejected() {
        let guarded = Guarded::new(0u32);
        let outer = guarded.enter().unwrap();
        assert!(guarded.is_entered());
        assert_eq!(guarded.enter().err(), Some(EngineError::ReentrantCall));
        drop(outer);

        assert!(!guarded.is_entered());
        *guarded.enter().unwrap() += 1;
        assert_eq!(*guarded.enter().unwrap(), 1);
    }

    #[test]
    fn test_other_threads_wait() {
        let guarded = Arc::new(Guarded::new(0u64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guarded = guarded.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *guarded.enter().unwrap() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*guarded.enter().unwrap(), 8000);
    }
}
