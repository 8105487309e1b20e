//! Bounded dispatch queue and its worker pool.
//!
//! Sessions hand accepted messages to the queue and reply at once; workers
//! deliver them in the background and record the outcome.

use async_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::dispatch::{Deliver, ForwardRequest};
use crate::error::DeliveryError;
use crate::recorder::Recorder;
use crate::store::{LogId, RuleId};

/// One accepted message awaiting delivery.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// Log row opened when the message was accepted.
    pub log_id: LogId,
    /// Rule the recipient matched.
    pub rule_id: RuleId,
    /// What to send.
    pub request: ForwardRequest,
}

/// Producer side of the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: Sender<DispatchJob>,
}

impl DispatchQueue {
    /// Whether a job would be refused right now.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.sender.is_full() || self.sender.is_closed()
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Whether no job is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    /// Queues `job` without waiting.
    ///
    /// # Errors
    ///
    /// Hands the job back when the queue is full or closed.
    pub fn try_enqueue(&self, job: DispatchJob) -> std::result::Result<(), Box<DispatchJob>> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Closed(job) => Box::new(job),
        })
    }

    /// Stops accepting jobs. Workers drain what is queued and exit.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// Handles of the running workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit. Call after [`DispatchQueue::close`].
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Dispatch worker ended abnormally: {e}");
            }
        }
    }

    /// Stops every worker immediately.
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Starts `workers` tasks consuming a queue of `capacity` jobs.
///
/// Both counts are raised to at least one.
#[must_use]
pub fn spawn_workers(
    workers: usize,
    capacity: usize,
    deliverer: Arc<dyn Deliver>,
    recorder: Recorder,
) -> (DispatchQueue, WorkerPool) {
    let (sender, receiver) = async_channel::bounded(capacity.max(1));

    let handles = (0..workers.max(1))
        .map(|worker| {
            let receiver = receiver.clone();
            let deliverer = Arc::clone(&deliverer);
            let recorder = recorder.clone();
            tokio::spawn(run_worker(worker, receiver, deliverer, recorder))
        })
        .collect();

    info!(workers = workers.max(1), capacity = capacity.max(1), "Dispatch workers started");
    (DispatchQueue { sender }, WorkerPool { handles })
}

async fn run_worker(
    worker: usize,
    receiver: Receiver<DispatchJob>,
    deliverer: Arc<dyn Deliver>,
    recorder: Recorder,
) {
    while let Ok(job) = receiver.recv().await {
        debug!(worker, log = %job.log_id, "Dispatching");
        let outcome = run_job(Arc::clone(&deliverer), job.request).await;
        if let Err(e) = recorder.complete(job.log_id, job.rule_id, &outcome).await {
            error!(worker, log = %job.log_id, "Failed to record delivery: {e}");
        }
    }
    debug!(worker, "Dispatch worker stopped");
}

/// Delivers in a child task so a panic becomes a recorded failure.
async fn run_job(
    deliverer: Arc<dyn Deliver>,
    request: ForwardRequest,
) -> std::result::Result<(), DeliveryError> {
    tokio::spawn(async move { deliverer.deliver(&request).await })
        .await
        .unwrap_or_else(|e| Err(DeliveryError::Aborted(e.to_string())))
}
