use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::BelError;
use crate::identity::Identity;
use crate::statement::Nanopub;

const LOCK_STRIPES: usize = 64;

/// Backend the adapter writes through. Implementations report transient
/// failures as `StoreUnavailable` and permanent ones as `StoreRejected`.
pub trait GraphStore: Send + Sync {
    fn fetch(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError>;
    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError>;
    fn len(&self) -> Result<usize, BelError>;

    fn is_empty(&self) -> Result<bool, BelError> {
        Ok(self.len()? == 0)
    }
}

impl<G: GraphStore + ?Sized> GraphStore for Box<G> {
    fn fetch(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        (**self).fetch(identity)
    }

    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError> {
        (**self).write(nanopub)
    }

    fn len(&self) -> Result<usize, BelError> {
        (**self).len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Stored record carries a newer `gd_updateTS`; the write was dropped.
    Stale,
    /// Identity already written during this run.
    Duplicate,
}

impl UpsertOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Updated)
    }
}

pub struct PersistenceAdapter<G: GraphStore + ?Sized> {
    retry: RetryPolicy,
    stripes: Vec<Mutex<()>>,
    written: Mutex<HashSet<Identity>>,
    store: G,
}

impl<G: GraphStore> PersistenceAdapter<G> {
    pub fn new(store: G) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: G, retry: RetryPolicy) -> Self {
        Self {
            retry,
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            written: Mutex::new(HashSet::new()),
            store,
        }
    }

    pub fn into_inner(self) -> G {
        self.store
    }
}

impl<G: GraphStore + ?Sized> PersistenceAdapter<G> {
    pub fn store(&self) -> &G {
        &self.store
    }

    /// Forgets which identities were written, so the next run starts clean.
    pub fn begin_run(&self) {
        self.written.lock().clear();
    }

    pub fn exists(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        self.retrying(|| self.store.fetch(identity))
    }

    pub fn len(&self) -> Result<usize, BelError> {
        self.retrying(|| self.store.len())
    }

    pub fn upsert(&self, nanopub: &Nanopub) -> Result<UpsertOutcome, BelError> {
        let _guard = self.stripe(&nanopub.identity).lock();
        if self.written.lock().contains(&nanopub.identity) {
            return Ok(UpsertOutcome::Duplicate);
        }

        let outcome = match self.exists(&nanopub.identity)? {
            None => {
                self.retrying(|| self.store.write(nanopub))?;
                UpsertOutcome::Inserted
            }
            Some(stored) if stored.same_content(nanopub) => UpsertOutcome::Unchanged,
            Some(stored) if nanopub.updated_at < stored.updated_at => {
                tracing::debug!(
                    identity = %nanopub.identity,
                    stored = %stored.updated_at,
                    incoming = %nanopub.updated_at,
                    "dropping stale upsert"
                );
                UpsertOutcome::Stale
            }
            Some(stored) => {
                let mut replacement = nanopub.clone();
                replacement.created_at = stored.created_at.min(nanopub.created_at);
                replacement.updated_at = replacement.updated_at.max(replacement.created_at);
                self.retrying(|| self.store.write(&replacement))?;
                UpsertOutcome::Updated
            }
        };

        self.written.lock().insert(nanopub.identity);
        Ok(outcome)
    }

    fn stripe(&self, identity: &Identity) -> &Mutex<()> {
        let index = (identity.prefix_u64() % self.stripes.len() as u64) as usize;
        &self.stripes[index]
    }

    fn retrying<T, F>(&self, mut op: F) -> Result<T, BelError>
    where
        F: FnMut() -> Result<T, BelError>,
    {
        let mut attempt = 0usize;
        loop {
            match op() {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.retry.base_delay, attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "graph store unavailable; retrying"
                    );
                    std::thread::sleep(delay);
                }
                result => return result,
            }
        }
    }
}

/// Linear backoff, saturating instead of overflowing on large configured delays.
fn backoff_delay(base: Duration, attempt: usize) -> Duration {
    base.saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
}

/// In-process store used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Identity, Nanopub>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls since construction.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, identity: &Identity) -> Option<Nanopub> {
        self.records.lock().get(identity).cloned()
    }

    /// All records ordered by identity.
    pub fn records(&self) -> Vec<Nanopub> {
        let mut records = self.records.lock().values().cloned().collect::<Vec<_>>();
        records.sort_by(|left, right| left.identity.cmp(&right.identity));
        records
    }
}

impl GraphStore for MemoryStore {
    fn fetch(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        Ok(self.get(identity))
    }

    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(nanopub.identity, nanopub.clone());
        Ok(())
    }

    fn len(&self) -> Result<usize, BelError> {
        Ok(self.records.lock().len())
    }
}
