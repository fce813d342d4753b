// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sharded LRU cache of authenticated principals.
//!
//! Keyed by credential fingerprint so a repeated credential skips
//! verification. An entry lives for `min(ttl, credential lifetime)` and is
//! never returned past that deadline; stale entries are dropped on lookup
//! or by [`PrincipalCache::sweep`].

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::claims::Principal;
use super::credential::Fingerprint;

/// Default number of independently locked shards.
pub const DEFAULT_SHARDS: usize = 16;

struct CacheEntry {
    principal: Principal,
    deadline: Instant,
}

/// In-process principal cache.
pub struct PrincipalCache {
    shards: Vec<Mutex<LruCache<Fingerprint, CacheEntry>>>,
}

impl PrincipalCache {
    /// Create a cache holding about `capacity` principals across
    /// [`DEFAULT_SHARDS`] shards.
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARDS)
    }

    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let shards = shards.max(1);
        let per_shard = NonZeroUsize::new(capacity.div_ceil(shards)).unwrap_or(NonZeroUsize::MIN);
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
        }
    }

    fn shard(&self, fingerprint: &Fingerprint) -> &Mutex<LruCache<Fingerprint, CacheEntry>> {
        &self.shards[fingerprint.shard(self.shards.len())]
    }

    /// Cached principal for a fingerprint.
    ///
    /// Returns `None` if not cached or past its deadline.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Principal> {
        let mut shard = self.shard(fingerprint).lock().ok()?;
        if let Some(entry) = shard.get(fingerprint) {
            if Instant::now() < entry.deadline {
                return Some(entry.principal.clone());
            }
            shard.pop(fingerprint);
        }
        None
    }

    /// Store a principal for at most `ttl`, capped by its remaining
    /// lifetime. Principals that have already expired are not stored.
    pub fn put(&self, fingerprint: Fingerprint, principal: Principal, ttl: Duration) {
        let remaining = principal.remaining_lifetime(chrono::Utc::now().timestamp());
        let effective = ttl.min(Duration::from_secs(remaining));
        if effective.is_zero() {
            return;
        }
        if let Ok(mut shard) = self.shard(&fingerprint).lock() {
            shard.put(
                fingerprint,
                CacheEntry {
                    principal,
                    deadline: Instant::now() + effective,
                },
            );
        }
    }

    /// Drop every entry past its deadline. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        for shard in &self.shards {
            let Ok(mut shard) = shard.lock() else {
                continue;
            };
            let stale: Vec<Fingerprint> = shard
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(fingerprint, _)| *fingerprint)
                .collect();
            for fingerprint in &stale {
                shard.pop(fingerprint);
            }
            evicted += stale.len();
        }
        evicted
    }

    /// Number of stored entries, including ones not yet swept.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|shard| shard.lock().ok().map(|s| s.len()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            if let Ok(mut shard) = shard.lock() {
                shard.clear();
            }
        }
    }
}
