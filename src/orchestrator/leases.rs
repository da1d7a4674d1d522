use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::internal::DayKey;

/// In-process leases on summary keys. At most one generation per key runs at
/// a time; the lease is released when its guard drops.
#[derive(Default, Clone)]
pub struct KeyLeases {
    held: Arc<Mutex<HashSet<DayKey>>>,
}

pub struct LeaseGuard {
    key: DayKey,
    held: Arc<Mutex<HashSet<DayKey>>>,
}

fn lock(held: &Mutex<HashSet<DayKey>>) -> MutexGuard<'_, HashSet<DayKey>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl KeyLeases {
    pub fn try_acquire(&self, key: DayKey) -> Option<LeaseGuard> {
        if !lock(&self.held).insert(key) {
            return None;
        }
        Some(LeaseGuard {
            key,
            held: self.held.clone(),
        })
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.key);
    }
}
