use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};
use tokio::runtime::Handle;

use crate::error::WorkerError;
use crate::pipeline::JobStateMachine;
use crate::worker::job::JobReport;

/// What a worker thread did with a submitted job id.
#[derive(Debug)]
pub enum WorkOutcome {
    Finished(JobReport),
    /// The claim went to someone else first.
    Busy,
    /// The claim itself failed, e.g. the database was unavailable.
    Error(String),
}

#[derive(Debug)]
pub struct WorkResult {
    pub job_id: String,
    pub outcome: WorkOutcome,
}

/// Fixed set of OS threads, each claiming and running one job at a time.
/// The async pipeline runs on the shared tokio runtime through `handle`.
pub struct WorkerPool {
    job_sender: Sender<String>,
    result_receiver: Receiver<WorkResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(
        machine: Arc<JobStateMachine>,
        handle: Handle,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let capacity = worker_count * 2;
        let (job_sender, job_receiver) = bounded::<String>(capacity);
        let (result_sender, result_receiver) = bounded::<WorkResult>(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_index in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_machine = Arc::clone(&machine);
            let worker_handle = handle.clone();

            let spawned = thread::Builder::new()
                .name(format!("grantflow-worker-{}", worker_index))
                .spawn(move || {
                    run_worker(
                        worker_index,
                        job_rx,
                        result_tx,
                        shutdown_flag,
                        worker_machine,
                        worker_handle,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(spawned);
        }

        info!(
            "Started {} workers as {}",
            worker_count,
            machine.worker_id()
        );

        Ok(Self {
            job_sender,
            result_receiver,
            workers,
            shutdown,
            capacity,
        })
    }

    /// Maximum number of job ids that can be queued or running at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn submit(&self, job_id: String) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job_id)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<WorkResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<WorkResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Lets running jobs finish, then joins every thread.
    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_index: usize,
    job_receiver: Receiver<String>,
    result_sender: Sender<WorkResult>,
    shutdown: Arc<AtomicBool>,
    machine: Arc<JobStateMachine>,
    handle: Handle,
) {
    debug!("Worker {} started", worker_index);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_index);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job_id) => {
                debug!("Worker {} processing job {}", worker_index, job_id);

                let outcome = match handle.block_on(machine.claim_and_run(&job_id)) {
                    Ok(Some(report)) => WorkOutcome::Finished(report),
                    Ok(None) => WorkOutcome::Busy,
                    Err(e) => {
                        error!("Worker {} could not claim {}: {}", worker_index, job_id, e);
                        WorkOutcome::Error(e.to_string())
                    }
                };

                if let Err(e) = result_sender.send(WorkResult { job_id, outcome }) {
                    error!("Worker {} failed to send result: {}", worker_index, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_index);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_index);
}
