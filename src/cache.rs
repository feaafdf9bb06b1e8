use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::identity::Fingerprint;
use crate::term::CanonicalTerm;

const DEFAULT_WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Run-scoped memo of normalized terms. A miss always falls back to full
/// normalization, so eviction never affects results.
pub struct ConversionCache {
    state: Mutex<CacheState>,
    ready: Condvar,
    wait_limit: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheState {
    entries: LruCache<Fingerprint, Arc<CanonicalTerm>>,
    in_flight: HashSet<Fingerprint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub enum Lookup<'c> {
    Hit(Arc<CanonicalTerm>),
    /// The caller computes the term and hands it back through [`Claim::fulfill`].
    Miss(Claim<'c>),
}

/// Ownership of an in-flight fingerprint. Dropping an unfulfilled claim
/// releases waiters so they can compute the term themselves.
pub struct Claim<'c> {
    cache: &'c ConversionCache,
    fingerprint: Fingerprint,
    owned: bool,
}

impl ConversionCache {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        let entries = match capacity {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            state: Mutex::new(CacheState {
                entries,
                in_flight: HashSet::new(),
            }),
            ready: Condvar::new(),
            wait_limit: DEFAULT_WAIT_LIMIT,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn with_wait_limit(mut self, wait_limit: Duration) -> Self {
        self.wait_limit = wait_limit;
        self
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<CanonicalTerm>> {
        let found = self.state.lock().entries.get(fingerprint).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, fingerprint: Fingerprint, term: Arc<CanonicalTerm>) {
        self.state.lock().entries.put(fingerprint, term);
    }

    /// Single-flight lookup: if another worker is computing the same
    /// fingerprint, wait for it (up to the wait limit) instead of
    /// normalizing the entity twice.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Lookup<'_> {
        let deadline = Instant::now() + self.wait_limit;
        let mut state = self.state.lock();
        loop {
            if let Some(term) = state.entries.get(fingerprint) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Hit(term.clone());
            }
            if !state.in_flight.contains(fingerprint) {
                state.in_flight.insert(*fingerprint);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss(Claim {
                    cache: self,
                    fingerprint: *fingerprint,
                    owned: true,
                });
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                tracing::warn!(fingerprint = %fingerprint, "cache wait timed out; computing locally");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Lookup::Miss(Claim {
                    cache: self,
                    fingerprint: *fingerprint,
                    owned: false,
                });
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
        drop(state);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn release(&self, fingerprint: &Fingerprint, term: Option<Arc<CanonicalTerm>>) {
        let mut state = self.state.lock();
        if let Some(term) = term {
            state.entries.put(*fingerprint, term);
        }
        state.in_flight.remove(fingerprint);
        drop(state);
        self.ready.notify_all();
    }
}

impl Default for ConversionCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl Claim<'_> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn fulfill(mut self, term: Arc<CanonicalTerm>) {
        if self.owned {
            self.owned = false;
            self.cache.release(&self.fingerprint, Some(term));
        } else {
            self.cache.put(self.fingerprint, term);
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.cache.release(&self.fingerprint, None);
        }
    }
}
