// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-pool keyed mutex for serializing per-id read-modify-write
//!
//! Operations on distinct ids should proceed concurrently while
//! operations on the same id are serialized.  Rather than maintaining
//! one lock per live id (and the attendant cleanup problem), we keep a
//! fixed pool of async mutexes and pick a slot by hashing the key.
//! Unrelated ids may collide onto one slot; that only costs some
//! unnecessary serialization, never correctness.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use tokio::sync::Mutex;
use tokio::sync::MutexGuard;

const DEFAULT_POOL_SIZE: usize = 512;

pub struct KeyedMutex {
    slots: Box<[Mutex<()>]>,
}

impl Default for KeyedMutex {
    fn default() -> KeyedMutex {
        KeyedMutex::new(DEFAULT_POOL_SIZE)
    }
}

impl KeyedMutex {
    /// Creates a pool with `size` slots (minimum 1)
    pub fn new(size: usize) -> KeyedMutex {
        let size = size.max(1);
        let slots =
            (0..size).map(|_| Mutex::new(())).collect::<Vec<_>>();
        KeyedMutex { slots: slots.into_boxed_slice() }
    }

    fn slot_for<K: Hash + ?Sized>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.slots.len()
    }

    /// Acquires the lock covering `key`, waiting if it is held
    ///
    /// The guard must not be held across calls that themselves take a
    /// keyed lock on this pool, or two colliding keys can deadlock.
    pub async fn lock<K: Hash + ?Sized>(
        &self,
        key: &K,
    ) -> MutexGuard<'_, ()> {
        self.slots[self.slot_for(key)].lock().await
    }
}
