use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::error::Error;
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// The request identity duplicate calls coalesce on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DedupeKey {
    #[default]
    Url,
    MethodAndUrl,
}

/// When an in-flight entry leaves the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DedupeEviction {
    /// The execution core removes the entry as soon as the shared outcome
    /// settles, so the next call issues a fresh request.
    #[default]
    OnSettle,
    /// Entries persist until [`DedupeRegistry::clear_if_elapsed`] removes
    /// them, giving duplicate calls shortly after completion the previous
    /// result.
    Manual,
}

pub(crate) type SharedOutcome = Shared<BoxFuture<'static, Result<Response, Arc<Error>>>>;

struct DedupeEntry {
    outcome: SharedOutcome,
    created_at: Instant,
}

/// A single-flight registry: at most one in-flight entry per key, every
/// concurrent caller handed the same shared outcome.
///
/// Owned by a client by default; clone one into several builders to share
/// a coalescing domain intentionally.
#[derive(Clone, Default)]
pub struct DedupeRegistry {
    entries: Arc<Mutex<BTreeMap<String, DedupeEntry>>>,
}

impl DedupeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the in-flight outcome for `key`, creating it from `make` on
    /// first observation. The bool reports whether this call created the
    /// entry. Check-and-insert happens under the lock with no await inside.
    pub(crate) fn join<F>(&self, key: &str, make: impl FnOnce() -> F) -> (SharedOutcome, bool)
    where
        F: Future<Output = Result<Response, Arc<Error>>> + Send + 'static,
    {
        let mut entries = lock_unpoisoned(&self.entries);
        if let Some(entry) = entries.get(key) {
            return (entry.outcome.clone(), false);
        }
        let outcome = make().boxed().shared();
        entries.insert(
            key.to_owned(),
            DedupeEntry {
                outcome: outcome.clone(),
                created_at: Instant::now(),
            },
        );
        (outcome, true)
    }

    pub fn remove(&self, key: &str) -> bool {
        lock_unpoisoned(&self.entries).remove(key).is_some()
    }

    /// Removes the entry for `key` only once it is at least `min_elapsed`
    /// old. Returns whether a removal happened.
    pub fn clear_if_elapsed(&self, key: &str, min_elapsed: Duration) -> bool {
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.created_at.elapsed() >= min_elapsed => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        lock_unpoisoned(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_unpoisoned(&self.entries).is_empty()
    }
}

impl std::fmt::Debug for DedupeRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DedupeRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
