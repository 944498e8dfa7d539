use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub pending: usize,
}

impl PipelineStats {
    /// Records handed to the sink, whatever the outcome.
    pub fn attempts(&self) -> u64 {
        self.delivered + self.failed
    }
}

/// Sequence numbers of accepted records not yet completed.
#[derive(Debug, Default)]
struct Ledger {
    next: u64,
    in_flight: BTreeSet<u64>,
}

/// Shared counters plus the completion barrier used by drain.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    ledger: Mutex<Ledger>,
    progress: Notify,
    submitted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub(crate) enum Outcome {
    Delivered,
    Failed,
    Dropped,
}

impl Tracker {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new record and returns its sequence number.
    pub(crate) fn accept(&self) -> u64 {
        let mut ledger = self.ledger();
        let seq = ledger.next;
        ledger.next += 1;
        ledger.in_flight.insert(seq);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        seq
    }

    /// Undoes `accept` for a record that never reached the queue.
    pub(crate) fn reject(&self, seq: u64) {
        self.submitted.fetch_sub(1, Ordering::Relaxed);
        self.release(|ledger| {
            ledger.in_flight.remove(&seq);
        });
    }

    pub(crate) fn complete(&self, seq: u64, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Delivered => &self.delivered,
            Outcome::Failed => &self.failed,
            Outcome::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.release(|ledger| {
            ledger.in_flight.remove(&seq);
        });
    }

    /// Forgets every queued record; none of them will be processed.
    pub(crate) fn discard_all(&self) -> usize {
        let mut discarded = 0;
        self.release(|ledger| {
            discarded = ledger.in_flight.len();
            ledger.in_flight.clear();
        });
        self.dropped.fetch_add(discarded as u64, Ordering::Relaxed);
        discarded
    }

    fn release(&self, update: impl FnOnce(&mut Ledger)) {
        update(&mut self.ledger());
        self.progress.notify_waiters();
    }

    pub(crate) fn pending(&self) -> usize {
        self.ledger().in_flight.len()
    }

    /// Sequence number of the most recently accepted record.
    pub(crate) fn ticket(&self) -> Option<u64> {
        self.ledger().next.checked_sub(1)
    }

    /// Resolves once no record numbered `ticket` or lower is queued or in
    /// flight. Records accepted later do not hold it back.
    pub(crate) async fn wait_through(&self, ticket: u64) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let oldest = self.ledger().in_flight.first().copied();
            match oldest {
                Some(seq) if seq <= ticket => notified.await,
                _ => return,
            }
        }
    }

    /// Waits for every record accepted so far.
    pub(crate) async fn wait_current(&self) {
        if let Some(ticket) = self.ticket() {
            self.wait_through(ticket).await;
        }
    }

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}
