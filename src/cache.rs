// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thread-safe memoization of expensive computations, where a cached value
//! can be replaced by a more precise one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Storage for one cache key. The slot's lock is held while building a value,
/// so that at most one build is in flight per key.
type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

/// A value obtained from an [`UpgradableCache`].
#[derive(Debug)]
pub struct Fetched<V> {
    /// Shared cached value.
    pub value: Arc<V>,
    /// Whether the value was built by this request, rather than found in the
    /// cache.
    pub rebuilt: bool,
}

/// Cache mapping keys to shared values. A cached value is returned as long as
/// it is precise enough for the request, and otherwise replaced by a newly
/// built one. Values are never evicted.
pub struct UpgradableCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for UpgradableCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> UpgradableCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        UpgradableCache {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Returns the cached value for the given key if `is_sufficient` accepts
    /// it. Otherwise, builds a new value, replaces the cached one with it and
    /// returns it.
    ///
    /// Concurrent requests for the same key wait for each other, so that
    /// readers never observe a value that is about to be replaced.
    pub fn get_or_build(
        &self,
        key: &K,
        is_sufficient: impl FnOnce(&V) -> bool,
        build: impl FnOnce() -> V,
    ) -> Fetched<V> {
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = guard.as_ref() {
            if is_sufficient(value) {
                return Fetched {
                    value: value.clone(),
                    rebuilt: false,
                };
            }
        }
        let value = Arc::new(build());
        *guard = Some(value.clone());
        Fetched {
            value,
            rebuilt: true,
        }
    }

    /// Stores the given value unless the cached one is at least as precise,
    /// according to `is_finer(new, cached)`. Returns whether the value was
    /// stored.
    pub fn insert_if_finer(
        &self,
        key: &K,
        value: V,
        is_finer: impl FnOnce(&V, &V) -> bool,
    ) -> bool {
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let replace = match guard.as_ref() {
            None => true,
            Some(cached) => is_finer(&value, cached),
        };
        if replace {
            *guard = Some(Arc::new(value));
        }
        replace
    }

    /// Returns the cached value for the given key, if any.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slot = self.slot(key);
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    /// Whether no value is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all cached values.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_build_caches() {
        let cache = UpgradableCache::<u32, String>::new();
        assert!(cache.is_empty());

        let first = cache.get_or_build(&1, |_| true, || "one".to_owned());
        assert!(first.rebuilt);
        assert_eq!(*first.value, "one");

        let second = cache.get_or_build(&1, |_| true, || panic!("must not rebuild"));
        assert!(!second.rebuilt);
        assert!(Arc::ptr_eq(&first.value, &second.value));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_or_build_upgrades() {
        let cache = UpgradableCache::<u32, usize>::new();
        let coarse = cache.get_or_build(&1, |&v| v >= 10, || 10);
        let same = cache.get_or_build(&1, |&v| v >= 5, || 5);
        assert!(!same.rebuilt);
        assert!(Arc::ptr_eq(&coarse.value, &same.value));

        let fine = cache.get_or_build(&1, |&v| v >= 20, || 20);
        assert!(fine.rebuilt);
        assert_eq!(*fine.value, 20);
        assert_eq!(cache.get(&1).as_deref(), Some(&20));
    }

    #[test]
    fn test_insert_if_finer() {
        let cache = UpgradableCache::<&str, usize>::new();
        assert!(cache.insert_if_finer(&"a", 10, |new, old| new > old));
        assert!(!cache.insert_if_finer(&"a", 5, |new, old| new > old));
        assert!(cache.insert_if_finer(&"a", 15, |new, old| new > old));
        assert_eq!(cache.get(&"a").as_deref(), Some(&15));
        assert_eq!(cache.get(&"b"), None);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_builds_are_deduplicated() {
        let cache = UpgradableCache::<u32, usize>::new();
        let builds = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let fetched = cache.get_or_build(
                        &7,
                        |_| true,
                        || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            42
                        },
                    );
                    assert_eq!(*fetched.value, 42);
                });
            }
        });
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
