use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// One lock per device id, created on first use and never removed.
///
/// The outer map is only held long enough to clone the inner `Arc`, so an
/// async lock handed out here can be held across awaits without blocking
/// other devices.
pub struct KeyedLocks<L> {
    locks: Shared<HashMap<String, Arc<L>>>,
}

impl<L: Default> KeyedLocks<L> {
    pub fn new() -> Self {
        Self { locks: new_state(HashMap::new()) }
    }

    pub fn get(&self, key: &str) -> Arc<L> {
        let mut locks = self.locks.lock();
        locks.entry(key.to_string()).or_default().clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl<L> Clone for KeyedLocks<L> {
    fn clone(&self) -> Self {
        Self { locks: self.locks.clone() }
    }
}

impl<L: Default> Default for KeyedLocks<L> {
    fn default() -> Self {
        Self::new()
    }
}
