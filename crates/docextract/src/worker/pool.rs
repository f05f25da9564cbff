use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info};

use crate::db::Database;
use crate::error::WorkerError;
use crate::extractor::DocumentExtractor;
use crate::queue::DeliveryQueue;
use crate::retry::RetryPolicy;
use crate::worker::report::AttemptReport;
use crate::worker::runner::Worker;

/// Settings shared by every worker in a pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    pub visibility_timeout_secs: u64,
    pub retry: RetryPolicy,
}

pub struct WorkerPool {
    report_receiver: Option<Receiver<AttemptReport>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `settings.worker_count` threads, each owning its own [`Worker`].
    pub fn start(
        db: Database,
        extractor: Arc<dyn DocumentExtractor>,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        if settings.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (report_sender, report_receiver) =
            bounded::<AttemptReport>(settings.worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let queue = DeliveryQueue::new(db.clone(), settings.visibility_timeout_secs);

        let mut workers = Vec::with_capacity(settings.worker_count);

        for worker_index in 0..settings.worker_count {
            let worker = Worker::new(
                format!("worker-{}", worker_index),
                db.clone(),
                queue.clone(),
                Arc::clone(&extractor),
                settings.retry,
            );
            let report_tx = report_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let poll_interval = settings.poll_interval;

            let spawned = thread::Builder::new()
                .name(format!("docextract-worker-{}", worker_index))
                .spawn(move || run_worker(worker, report_tx, shutdown_flag, poll_interval));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Stop whatever already started before bailing out.
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", settings.worker_count);

        Ok(Self {
            report_receiver: Some(report_receiver),
            workers,
            shutdown,
        })
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<AttemptReport> {
        self.report_receiver.as_ref()?.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(mut self) {
        // Nobody reads reports anymore; workers must never block on a full channel.
        drop(self.report_receiver.take());

        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    mut worker: Worker,
    report_sender: Sender<AttemptReport>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    debug!("{} started", worker.id());

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("{} received shutdown signal", worker.id());
            break;
        }

        match worker.process_next(Utc::now()) {
            Ok(AttemptReport::Idle) => thread::sleep(poll_interval),
            Ok(report) => match report_sender.try_send(report) {
                Ok(()) => {}
                Err(TrySendError::Full(report)) => {
                    debug!("{} dropped report, channel full: {:?}", worker.id(), report);
                }
                Err(TrySendError::Disconnected(_)) => {}
            },
            Err(e) => {
                error!("{} failed to poll queue: {}", worker.id(), e);
                thread::sleep(poll_interval);
            }
        }
    }

    debug!("{} stopped", worker.id());
}
