use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::util::lock_unpoisoned;

#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub aborts: u64,
    pub dedupe_hits: u64,
    pub in_flight: u64,
    pub status_counts: BTreeMap<u16, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    aborts: AtomicU64,
    dedupe_hits: AtomicU64,
    in_flight: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_success(&self) {
        self.inner
            .requests_succeeded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.inner.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dedupe_hit(&self) {
        self.inner.dedupe_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self, status: u16) {
        let mut counts = lock_unpoisoned(&self.inner.status_counts);
        *counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            aborts: self.inner.aborts.load(Ordering::Relaxed),
            dedupe_hits: self.inner.dedupe_hits.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
        }
    }
}
