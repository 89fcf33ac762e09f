use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

/// Process-wide service shared by every session of a backend
///
/// The first [`SharedService::acquire`] builds the value, every lease bumps the
/// reference count, and dropping the last lease tears the value down.
#[derive(Debug)]
pub struct SharedService<T> {
    state: Mutex<SharedState<T>>,
}

#[derive(Debug)]
struct SharedState<T> {
    refs: usize,
    value: Option<Arc<T>>,
}

impl<T> Default for SharedService<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedService<T> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SharedState {
                refs: 0,
                value: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes a lease, running `init` if no lease is outstanding.
    /// A failed `init` leaves the count untouched.
    pub fn acquire<E, F>(&'static self, init: F) -> Result<SharedLease<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let mut state = self.lock();
        let value = match &state.value {
            Some(value) => Arc::clone(value),
            None => {
                let value = Arc::new(init()?);
                state.value = Some(Arc::clone(&value));
                value
            }
        };
        state.refs += 1;
        Ok(SharedLease {
            service: self,
            value: Some(value),
        })
    }

    pub fn ref_count(&self) -> usize {
        self.lock().refs
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().value.is_some()
    }

    fn release(&self) {
        let torn_down = {
            let mut state = self.lock();
            state.refs = state.refs.saturating_sub(1);
            if state.refs == 0 {
                state.value.take()
            } else {
                None
            }
        };
        // Drop outside the lock so a slow teardown never blocks new acquirers
        drop(torn_down);
    }
}

/// One reference to a [`SharedService`] value
#[derive(Debug)]
pub struct SharedLease<T: 'static> {
    service: &'static SharedService<T>,
    value: Option<Arc<T>>,
}

impl<T> Deref for SharedLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("lease value is only taken in drop"),
        }
    }
}

impl<T> Drop for SharedLease<T> {
    fn drop(&mut self) {
        self.value.take();
        self.service.release();
    }
}
