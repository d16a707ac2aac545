//! Keyed expiry timers with single-call cancellation.
//!
//! A timer either fires its callback or is cancelled, never both; once the
//! owner is torn down `cancel_all` stops every outstanding timer at once.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::sync::lock;

pub struct TimerSet<K> {
    timers: Arc<Mutex<HashMap<K, JoinHandle<()>>>>,
}

impl<K> TimerSet<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `on_expiry` after `delay` unless cancelled first.
    ///
    /// Scheduling an existing key replaces its timer.
    pub fn schedule<F>(&self, key: K, delay: Duration, on_expiry: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let timers = Arc::clone(&self.timers);
        let task_key = key.clone();

        // The table lock is held until the handle is stored, so a timer
        // that fires immediately still finds its own entry.
        let mut table = lock(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = lock(&timers).remove(&task_key).is_some();
            if fired {
                on_expiry();
            }
        });
        if let Some(previous) = table.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancels a timer; returns whether it was still pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.timers).remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in lock(&self.timers).drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for TimerSet<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.timers).drain() {
            handle.abort();
        }
    }
}
