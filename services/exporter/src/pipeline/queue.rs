use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use flow_record::{FlowValue, RecordNormalizer};
use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::hooks::FlowHook;
use crate::sink::DeliverySink;

use super::stats::{Outcome, Tracker};
use super::{PipelineError, PipelineState, PipelineStats};

struct Job {
    seq: u64,
    hook: FlowHook,
    record: FlowValue,
}

type SharedReceiver = Arc<tokio::sync::Mutex<UnboundedReceiver<Job>>>;

struct Inner {
    state: PipelineState,
    sender: Option<UnboundedSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

/// Unbounded work queue drained by a fixed pool of delivery workers.
///
/// Each submitted record is taken by exactly one worker. With more than one
/// worker, delivery order is not submission order.
pub struct DeliveryPipeline {
    normalizer: Arc<RecordNormalizer>,
    inner: Mutex<Inner>,
    receiver: SharedReceiver,
    tracker: Arc<Tracker>,
}

impl DeliveryPipeline {
    pub fn new(normalizer: RecordNormalizer) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            normalizer: Arc::new(normalizer),
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                sender: Some(sender),
                workers: Vec::new(),
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            tracker: Arc::new(Tracker::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, PipelineError> {
        self.inner.lock().map_err(|_| PipelineError::Poisoned)
    }

    pub fn state(&self) -> PipelineState {
        self.lock()
            .map(|inner| inner.state)
            .unwrap_or(PipelineState::Stopped)
    }

    pub fn stats(&self) -> PipelineStats {
        self.tracker.snapshot()
    }

    /// Queues `record` for delivery. Never blocks; only fails once shutdown
    /// has begun.
    pub fn submit(&self, hook: FlowHook, record: FlowValue) -> Result<(), PipelineError> {
        let inner = self.lock()?;
        let sender = match (inner.state, &inner.sender) {
            (PipelineState::Idle | PipelineState::Running, Some(sender)) => sender,
            (state, _) => return Err(PipelineError::Closed(state)),
        };

        let seq = self.tracker.accept();
        if sender.send(Job { seq, hook, record }).is_err() {
            self.tracker.reject(seq);
            return Err(PipelineError::Closed(inner.state));
        }
        Ok(())
    }

    /// Spawns `worker_count` workers delivering to `sink`. Must be called
    /// from within a tokio runtime.
    pub fn start(
        &self,
        worker_count: usize,
        sink: Arc<dyn DeliverySink>,
    ) -> Result<(), PipelineError> {
        if worker_count == 0 {
            return Err(PipelineError::NoWorkers);
        }

        let mut inner = self.lock()?;
        if inner.state != PipelineState::Idle {
            return Err(PipelineError::InvalidState(inner.state, PipelineState::Idle));
        }

        for id in 0..worker_count {
            let worker = Worker {
                id,
                receiver: Arc::clone(&self.receiver),
                normalizer: Arc::clone(&self.normalizer),
                sink: Arc::clone(&sink),
                tracker: Arc::clone(&self.tracker),
            };
            inner.workers.push(tokio::spawn(worker.run()));
        }
        inner.state = PipelineState::Running;

        info!(
            workers = worker_count,
            sink = %sink.kind(),
            queued = self.tracker.pending(),
            "delivery pipeline started"
        );
        Ok(())
    }

    /// Waits until every record submitted before this call has been
    /// normalized and handed to the sink, successfully or not. Records
    /// submitted while it waits are not waited for.
    pub async fn drain(&self) -> Result<(), PipelineError> {
        let ticket = {
            let inner = self.lock()?;
            if inner.state == PipelineState::Idle && self.tracker.pending() > 0 {
                return Err(PipelineError::InvalidState(inner.state, PipelineState::Running));
            }
            self.tracker.ticket()
        };

        if let Some(ticket) = ticket {
            self.tracker.wait_through(ticket).await;
        }
        Ok(())
    }

    /// Stops intake, drains the queue and joins the workers.
    pub async fn shutdown(&self) -> Result<PipelineStats, PipelineError> {
        {
            let mut inner = self.lock()?;
            match inner.state {
                PipelineState::Running => inner.state = PipelineState::Draining,
                PipelineState::Idle => {
                    inner.state = PipelineState::Stopped;
                    inner.sender = None;
                    let discarded = self.tracker.discard_all();
                    if discarded > 0 {
                        warn!(discarded, "pipeline stopped before start; queued records discarded");
                    }
                    return Ok(self.tracker.snapshot());
                }
                state => return Err(PipelineError::Closed(state)),
            }
        }

        info!(pending = self.tracker.pending(), "draining delivery pipeline");
        self.tracker.wait_current().await;

        let workers = {
            let mut inner = self.lock()?;
            inner.sender = None;
            std::mem::take(&mut inner.workers)
        };
        for result in join_all(workers).await {
            if let Err(err) = result {
                error!(error = %err, "delivery worker terminated abnormally");
            }
        }

        self.lock()?.state = PipelineState::Stopped;

        let stats = self.tracker.snapshot();
        info!(
            submitted = stats.submitted,
            delivered = stats.delivered,
            failed = stats.failed,
            dropped = stats.dropped,
            "delivery pipeline stopped"
        );
        Ok(stats)
    }
}

struct Worker {
    id: usize,
    receiver: SharedReceiver,
    normalizer: Arc<RecordNormalizer>,
    sink: Arc<dyn DeliverySink>,
    tracker: Arc<Tracker>,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "delivery worker started");

        loop {
            let job = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = job else {
                break;
            };

            let seq = job.seq;
            let outcome = match AssertUnwindSafe(self.process(job)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(worker = self.id, "record processing panicked; record dropped");
                    Outcome::Dropped
                }
            };
            self.tracker.complete(seq, outcome);
        }

        debug!(worker = self.id, "delivery worker stopped");
    }

    async fn process(&self, job: Job) -> Outcome {
        let Job { hook, record, .. } = job;

        let document = match self.normalizer.normalize(record) {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    worker = self.id,
                    %hook,
                    error = %err,
                    "dropping record that failed normalization"
                );
                return Outcome::Dropped;
            }
        };

        match self.sink.deliver(&document).await {
            Ok(()) => {
                debug!(worker = self.id, %hook, sink = %self.sink.kind(), "record delivered");
                Outcome::Delivered
            }
            Err(err) => {
                warn!(
                    worker = self.id,
                    %hook,
                    sink = %self.sink.kind(),
                    error = %err,
                    "document delivery failed; dropping"
                );
                Outcome::Failed
            }
        }
    }
}
