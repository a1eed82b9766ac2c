//! A fixed pool of long-lived worker processes.
//!
//! Each worker process is driven by one thread that owns its pipes. Threads compete for
//! chunks on a shared bounded channel, forward each chunk over the process's standard
//! input, and send the answer back on a shared result channel. Completion order is
//! therefore arbitrary; restoring input order is the dispatcher's job.

pub use super::config::WorkerCommand;

use super::chunker::Chunk;
use super::error::EngineError;
use super::protocol::{WorkerJob, WorkerRequest, WorkerResponse, read_message, write_message};
use crate::core::models::record::ResultRecord;
use crate::core::models::structure::Structure;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Records of one completed chunk.
#[derive(Debug)]
pub struct ChunkResult {
    pub worker: usize,
    pub start: usize,
    pub records: Vec<ResultRecord>,
}

type ResultMessage = Result<ChunkResult, EngineError>;

pub struct WorkerPool {
    jobs: Option<Sender<Chunk<Structure>>>,
    results: Receiver<ResultMessage>,
    children: Vec<Arc<Mutex<Child>>>,
    threads: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl WorkerPool {
    /// Starts `num_workers` processes and initializes each with `job`.
    ///
    /// # Errors
    ///
    /// Fails if any process cannot be spawned or does not complete the handshake; workers
    /// already started are killed.
    pub fn spawn(
        command: &WorkerCommand,
        num_workers: usize,
        job: &WorkerJob,
    ) -> Result<Self, EngineError> {
        let num_workers = num_workers.max(1);
        let capacity = 2 * num_workers;
        let (job_tx, job_rx) = crossbeam_channel::bounded(capacity);
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let mut pool = Self {
            jobs: Some(job_tx),
            results: result_rx,
            children: Vec::with_capacity(num_workers),
            threads: Vec::with_capacity(num_workers),
            capacity,
        };

        for worker in 0..num_workers {
            let mut child = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|source| EngineError::WorkerSpawn { worker, source })?;
            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            pool.children.push(Arc::new(Mutex::new(child)));

            let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
                return Err(EngineError::Internal(format!(
                    "worker {worker} was spawned without pipes"
                )));
            };
            let mut stdout = BufReader::new(stdout);
            handshake(worker, &mut stdin, &mut stdout, job)?;
            debug!(worker, "worker initialized");

            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("autopara-worker-{worker}"))
                .spawn(move || worker_loop(worker, stdin, stdout, jobs, results))
                .map_err(|source| EngineError::WorkerSpawn { worker, source })?;
            pool.threads.push(handle);
        }

        info!(
            "Started {} worker processes ({:?})",
            num_workers, command.program
        );
        Ok(pool)
    }

    /// Maximum number of chunks that should be in flight at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queues a chunk for the next free worker.
    pub fn submit(&self, chunk: Chunk<Structure>) -> Result<(), EngineError> {
        let jobs = self.jobs.as_ref().ok_or(EngineError::PoolDisconnected)?;
        jobs.send(chunk).map_err(|_| EngineError::PoolDisconnected)
    }

    /// Waits for the next completed chunk, in completion order.
    ///
    /// # Errors
    ///
    /// A worker error, [`EngineError::ChunkTimeout`] if nothing completes within
    /// `timeout`, or [`EngineError::PoolDisconnected`] if every worker has stopped.
    pub fn next_result(&self, timeout: Option<Duration>) -> Result<ChunkResult, EngineError> {
        match timeout {
            Some(waited) => self.results.recv_timeout(waited).map_err(|e| match e {
                RecvTimeoutError::Timeout => EngineError::ChunkTimeout { waited },
                RecvTimeoutError::Disconnected => EngineError::PoolDisconnected,
            })?,
            None => self
                .results
                .recv()
                .map_err(|_| EngineError::PoolDisconnected)?,
        }
    }

    /// Stops the workers after they finish their current chunk and waits for them.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.jobs.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("A worker thread panicked during shutdown");
            }
        }
        for (worker, child) in self.children.drain(..).enumerate() {
            let mut child = child
                .lock()
                .map_err(|_| EngineError::Internal("worker handle poisoned".to_string()))?;
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => warn!("Worker {} exited with {}", worker, status),
                Err(e) => warn!("Failed to wait for worker {}: {}", worker, e),
            }
        }
        debug!("Worker pool shut down");
        Ok(())
    }
}

impl Drop for WorkerPool {
    /// Kills whatever is still running; in-flight chunks are lost.
    ///
    /// Reader threads are detached, not joined: a descendant of a killed worker (a shell
    /// or launcher wrapper) may keep its stdout open, and the caller must not wait for it.
    fn drop(&mut self) {
        self.jobs.take();
        if self.children.is_empty() {
            return;
        }
        for child in &self.children {
            if let Ok(mut child) = child.lock() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        let detached = self.threads.drain(..).filter(|h| !h.is_finished()).count();
        debug!(detached, "Worker pool torn down");
    }
}

fn handshake(
    worker: usize,
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    job: &WorkerJob,
) -> Result<(), EngineError> {
    let crashed = |reason: String| EngineError::WorkerCrashed {
        worker,
        chunk_start: 0,
        reason,
    };
    write_message(stdin, &WorkerRequest::Init { job: job.clone() })
        .map_err(|e| crashed(e.to_string()))?;
    match read_message(stdout)? {
        Some(WorkerResponse::Ready) => Ok(()),
        Some(WorkerResponse::Fatal { message }) => Err(EngineError::WorkerFailed {
            worker,
            chunk_start: 0,
            message,
        }),
        Some(other) => Err(EngineError::Protocol(format!(
            "worker {worker} answered init with {other:?}"
        ))),
        None => Err(crashed("exited before the handshake".to_string())),
    }
}

fn exchange(
    worker: usize,
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    chunk: Chunk<Structure>,
) -> ResultMessage {
    let start = chunk.start;
    let expected = chunk.len();
    let crashed = |reason: String| EngineError::WorkerCrashed {
        worker,
        chunk_start: start,
        reason,
    };

    write_message(stdin, &WorkerRequest::Chunk { chunk }).map_err(|e| crashed(e.to_string()))?;
    match read_message(stdout)? {
        Some(WorkerResponse::ChunkDone {
            start: done,
            records,
        }) if done == start && records.len() == expected => Ok(ChunkResult {
            worker,
            start,
            records,
        }),
        Some(WorkerResponse::Fatal { message }) => Err(EngineError::WorkerFailed {
            worker,
            chunk_start: start,
            message,
        }),
        Some(other) => Err(EngineError::Protocol(format!(
            "worker {worker} answered chunk {start} with {other:?}"
        ))),
        None => Err(crashed("process exited without answering".to_string())),
    }
}

fn worker_loop(
    worker: usize,
    mut stdin: ChildStdin,
    mut stdout: BufReader<ChildStdout>,
    jobs: Receiver<Chunk<Structure>>,
    results: Sender<ResultMessage>,
) {
    for chunk in jobs.iter() {
        let outcome = exchange(worker, &mut stdin, &mut stdout, chunk);
        let failed = outcome.is_err();
        if results.send(outcome).is_err() || failed {
            return;
        }
    }
    let _ = write_message(&mut stdin, &WorkerRequest::Shutdown);
    let _ = stdin.flush();
}
