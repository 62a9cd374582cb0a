//! Background worker threads for threaded plugin handlers.
//!
//! Each threaded handler gets one dedicated thread that pulls jobs from a
//! channel, runs the handler and pushes any reply onto the job's outbound
//! queue. The control thread never waits on a job; it only waits (bounded)
//! for a worker to acknowledge shutdown.
//!
//! # Shutdown
//!
//! Stopping is cooperative: the supervisor raises the worker's shutdown
//! flag, closes its job channel and waits up to the stop timeout for an
//! acknowledgement. A worker stuck inside a long handler call is detached:
//! its join handle is dropped and it exits by itself once the call returns.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scopeguard::defer;

use crate::connection::{push_response, OutboundQueue};
use crate::error::WorkerError;
use crate::plugin::{Handler, HandlerId, Input, PluginRecord};
use crate::reply::ReplyShape;

/// Default deadline for a worker to acknowledge shutdown.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often an idle worker re-checks its shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One queued invocation.
#[derive(Debug)]
pub struct Job {
    /// Handler argument.
    pub input: Input,
    /// How to turn output into a response.
    pub reply: ReplyShape,
    /// Where the response goes.
    pub outbound: OutboundQueue,
}

impl Job {
    /// Run `handler` for this job and queue its reply.
    ///
    /// Errors are logged; chat users never see them.
    pub fn run(self, handler: &Handler) {
        match handler.invoke(&self.input) {
            Ok(Some(text)) => {
                if let Some(response) = self.reply.shape(&self.input, &text) {
                    push_response(&self.outbound, response);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::error!("Plugin handler {} failed: {:#}", handler.signature(), e);
            }
        }
    }
}

/// A running worker thread.
struct Worker {
    signature: String,
    /// Job sender; `None` once the worker has been told to stop.
    jobs: Option<std_mpsc::Sender<Job>>,
    /// Shutdown flag shared with the worker thread.
    shutdown: Arc<AtomicBool>,
    /// Receives one message when the worker loop exits.
    ack: std_mpsc::Receiver<()>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(handler: Arc<Handler>) -> Result<Self, WorkerError> {
        let signature = handler.signature().to_string();
        let (jobs_tx, jobs_rx) = std_mpsc::channel();
        let (ack_tx, ack_rx) = std_mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let thread_handle = thread::Builder::new()
            .name(format!("plugin:{signature}"))
            .spawn(move || Self::worker_loop(&handler, &jobs_rx, &shutdown_clone, &ack_tx))
            .map_err(|source| WorkerError::Spawn {
                signature: signature.clone(),
                source,
            })?;

        Ok(Self {
            signature,
            jobs: Some(jobs_tx),
            shutdown,
            ack: ack_rx,
            thread_handle: Some(thread_handle),
        })
    }

    /// Worker loop - runs on dedicated thread.
    fn worker_loop(
        handler: &Handler,
        jobs: &std_mpsc::Receiver<Job>,
        shutdown: &AtomicBool,
        ack: &std_mpsc::Sender<()>,
    ) {
        // Acknowledge even if the loop unwinds.
        defer! {
            let _ = ack.send(());
        }

        log::debug!("Plugin worker started: {}", handler.signature());

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            match jobs.recv_timeout(POLL_INTERVAL) {
                Ok(job) => {
                    let result = catch_unwind(AssertUnwindSafe(|| job.run(handler)));
                    if result.is_err() {
                        log::error!("Plugin handler {} panicked", handler.signature());
                    }
                }
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        log::debug!("Plugin worker stopped: {}", handler.signature());
    }
}

/// Owns one worker per threaded handler.
pub struct WorkerSupervisor {
    workers: HashMap<HandlerId, Worker>,
    stop_timeout: Duration,
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("workers", &self.workers.len())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl Default for WorkerSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_TIMEOUT)
    }
}

impl WorkerSupervisor {
    /// Create an empty supervisor with the given stop deadline.
    #[must_use]
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            stop_timeout,
        }
    }

    /// Start a worker for `record` if it is threaded and has none yet.
    ///
    /// Returns `Ok(true)` if a worker was spawned.
    pub fn start(&mut self, record: &PluginRecord) -> Result<bool, WorkerError> {
        if !record.threaded {
            return Ok(false);
        }
        let id = record.handler.id();
        if self.workers.contains_key(&id) {
            return Ok(false);
        }

        let worker = Worker::spawn(Arc::clone(&record.handler))?;
        log::debug!("Started worker {} for {}", id, worker.signature);
        self.workers.insert(id, worker);
        Ok(true)
    }

    /// Stop the worker bound to `id`.
    ///
    /// Returns `Ok(false)` for an unknown id. On timeout the worker is
    /// detached and forgotten, and the error reports it.
    pub fn stop(&mut self, id: HandlerId) -> Result<bool, WorkerError> {
        let Some(mut worker) = self.workers.remove(&id) else {
            return Ok(false);
        };

        worker.shutdown.store(true, Ordering::SeqCst);
        drop(worker.jobs.take());

        match worker.ack.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = worker.thread_handle.take() {
                    let _ = handle.join();
                }
                log::debug!("Stopped worker {} for {}", id, worker.signature);
                Ok(true)
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                // Dropping the handle detaches the thread.
                drop(worker.thread_handle.take());
                Err(WorkerError::StopTimeout {
                    signature: worker.signature,
                    timeout: self.stop_timeout,
                })
            }
        }
    }

    /// Stop the worker bound to `id`, logging instead of returning errors.
    pub fn stop_logged(&mut self, id: HandlerId) {
        if let Err(e) = self.stop(id) {
            log::warn!("{e}");
        }
    }

    /// Queue `job` on the worker for `id`.
    ///
    /// Hands the job back when no live worker exists so the caller can
    /// decide what to do with it.
    pub fn submit(&self, id: HandlerId, job: Job) -> Result<(), Job> {
        match self.workers.get(&id).and_then(|w| w.jobs.as_ref()) {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    /// Whether a worker is running for `id`.
    #[must_use]
    pub fn is_running(&self, id: HandlerId) -> bool {
        self.workers.contains_key(&id)
    }

    /// Ids of all running workers.
    #[must_use]
    pub fn running(&self) -> Vec<HandlerId> {
        let mut ids: Vec<_> = self.workers.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of running workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no workers are running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stop every worker (used at shutdown).
    pub fn stop_all(&mut self) {
        for id in self.running() {
            self.stop_logged(id);
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        for worker in self.workers.values_mut() {
            worker.shutdown.store(true, Ordering::SeqCst);
            drop(worker.jobs.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::new_outbound_queue;
    use crate::plugin::Behavior;
    use crate::unit::{Unit, UnitKind};
    use std::time::Instant;

    fn threaded_record(handler: Handler) -> PluginRecord {
        PluginRecord {
            handler: Arc::new(handler),
            behavior: Behavior::Command {
                name: "slow".to_string(),
                autohelp: false,
            },
            unit: Unit::new("/plugins/slow.lua", UnitKind::Plugin),
            threaded: true,
            api_key: None,
        }
    }

    fn echo_handler() -> Handler {
        Handler::from_fn("slow.lua:echo:1", None, |input| Ok(Some(input.inp.clone())))
    }

    fn job(text: &str, outbound: &OutboundQueue) -> Job {
        Job {
            input: Input {
                nick: "alice".to_string(),
                chan: "#test".to_string(),
                inp: text.to_string(),
                ..Input::default()
            },
            reply: ReplyShape::default(),
            outbound: Arc::clone(outbound),
        }
    }

    fn wait_for_len(queue: &OutboundQueue, len: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if queue.lock().expect("lock").len() >= len {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut supervisor = WorkerSupervisor::default();
        let record = threaded_record(echo_handler());

        assert!(supervisor.start(&record).expect("start"));
        assert!(!supervisor.start(&record).expect("start again"));
        assert_eq!(supervisor.len(), 1);

        supervisor.stop_all();
        assert!(supervisor.is_empty());
    }

    #[test]
    fn test_unthreaded_record_gets_no_worker() {
        let mut supervisor = WorkerSupervisor::default();
        let mut record = threaded_record(echo_handler());
        record.threaded = false;
        assert!(!supervisor.start(&record).expect("start"));
        assert!(supervisor.is_empty());
    }

    #[test]
    fn test_stop_unknown_is_noop() {
        let mut supervisor = WorkerSupervisor::default();
        assert!(!supervisor.stop(HandlerId::next()).expect("stop"));
    }

    #[test]
    fn test_submitted_job_reaches_outbound_queue() {
        let mut supervisor = WorkerSupervisor::default();
        let record = threaded_record(echo_handler());
        supervisor.start(&record).expect("start");

        let outbound = new_outbound_queue();
        supervisor
            .submit(record.handler.id(), job("hello", &outbound))
            .expect("submit");

        assert!(wait_for_len(&outbound, 1), "worker should reply");
        let response = outbound.lock().expect("lock").pop_front().expect("response");
        assert_eq!(response.text, "alice: hello");

        assert!(supervisor.stop(record.handler.id()).expect("stop"));
    }

    #[test]
    fn test_submit_without_worker_returns_job() {
        let supervisor = WorkerSupervisor::default();
        let outbound = new_outbound_queue();
        let returned = supervisor.submit(HandlerId::next(), job("x", &outbound));
        assert!(returned.is_err());
    }

    #[test]
    fn test_stuck_worker_is_detached_after_timeout() {
        let mut supervisor = WorkerSupervisor::new(Duration::from_millis(50));
        let record = threaded_record(Handler::from_fn("slow.lua:sleepy:1", None, |_| {
            thread::sleep(Duration::from_millis(500));
            Ok(None)
        }));
        supervisor.start(&record).expect("start");

        let outbound = new_outbound_queue();
        supervisor
            .submit(record.handler.id(), job("zzz", &outbound))
            .expect("submit");
        // Let the worker pick the job up.
        thread::sleep(Duration::from_millis(150));

        let started = Instant::now();
        let result = supervisor.stop(record.handler.id());
        assert!(matches!(result, Err(WorkerError::StopTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(!supervisor.is_running(record.handler.id()));
    }

    #[test]
    fn test_panicking_handler_keeps_worker_alive() {
        let mut supervisor = WorkerSupervisor::default();
        let record = threaded_record(Handler::from_fn("boom.lua:boom:1", None, |input| {
            if input.inp == "panic" {
                panic!("handler blew up");
            }
            Ok(Some("ok".to_string()))
        }));
        supervisor.start(&record).expect("start");

        let outbound = new_outbound_queue();
        let id = record.handler.id();
        supervisor.submit(id, job("panic", &outbound)).expect("submit");
        supervisor.submit(id, job("fine", &outbound)).expect("submit");

        assert!(wait_for_len(&outbound, 1));
        assert!(supervisor.stop(id).expect("stop"));
    }
}
