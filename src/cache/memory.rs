use crate::cache::{CacheEntry, CacheError, CacheStore};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Slot {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// MemoryCache is a `HashMap` behind a `RwLock`, with lazy expiry and an optional entry cap.
///
/// Expired entries stay in the map until a write needs the room or `entries()` sweeps them.
pub struct MemoryCache {
    slots: RwLock<HashMap<Bytes, Slot>>,
    capacity: Option<usize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache {
            slots: RwLock::new(HashMap::new()),
            capacity: None,
        }
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        MemoryCache {
            slots: RwLock::new(HashMap::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &[u8]) -> Option<Bytes> {
        let slots = self.slots.read().expect("MemoryCache.get() lock poison");
        let now = Instant::now();

        slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone())
    }

    fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut slots = self.slots.write().expect("MemoryCache.set() lock poison");
        let now = Instant::now();

        if let Some(capacity) = self.capacity {
            if !slots.contains_key(&key) && slots.len() >= capacity {
                slots.retain(|_, slot| slot.is_live(now));
                if slots.len() >= capacity {
                    return Err(CacheError::CapacityExceeded { capacity });
                }
            }
        }

        let expires_at = ttl.map(|ttl| now + ttl);
        slots.insert(key, Slot { value, expires_at });
        Ok(())
    }

    fn entries(&self) -> Vec<CacheEntry> {
        let mut slots = self.slots.write().expect("MemoryCache.entries() lock poison");
        let now = Instant::now();
        slots.retain(|_, slot| slot.is_live(now));

        slots
            .iter()
            .map(|(key, slot)| CacheEntry {
                key: key.clone(),
                value: slot.value.clone(),
                ttl: slot.expires_at.map(|deadline| deadline.saturating_duration_since(now)),
            })
            .collect()
    }

    fn clear(&self) {
        self.slots.write().expect("MemoryCache.clear() lock poison").clear();
    }

    fn len(&self) -> usize {
        let slots = self.slots.read().expect("MemoryCache.len() lock poison");
        let now = Instant::now();
        slots.values().filter(|slot| slot.is_live(now)).count()
    }
}
