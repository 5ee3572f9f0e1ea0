//! The background save thread.
//!
//! A [`SaveWorker`] owns exactly one thread and runs submitted jobs in
//! submission order. Its lifecycle is explicit: `start`, any number of
//! `submit`s, `drain` to wait for outstanding jobs, and `stop` to join the
//! thread.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error};
use voxelsync_foundation::{Error, Result};

/// What a job wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Entities written.
    pub entities: usize,
    /// Chunks written.
    pub chunks: usize,
    /// Wall time spent.
    pub elapsed: Duration,
}

/// What a job was for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobLabel {
    /// A full world save.
    Save,
    /// A single chunk unloaded from memory.
    Chunk,
}

/// Work run on the save thread.
pub type SaveJob = Box<dyn FnOnce() -> Result<SaveReport> + Send>;

/// A finished job.
#[derive(Debug)]
pub struct JobOutcome {
    /// Id returned by [`SaveWorker::submit`].
    pub id: u64,
    /// What the job was for.
    pub label: JobLabel,
    /// What happened.
    pub result: Result<SaveReport>,
}

struct Job {
    id: u64,
    label: JobLabel,
    run: SaveJob,
}

/// An owned background thread running save jobs in order.
pub struct SaveWorker {
    jobs: Option<Sender<Job>>,
    done: Receiver<JobOutcome>,
    thread: Option<JoinHandle<()>>,
    next_id: u64,
    outstanding: usize,
}

impl SaveWorker {
    /// Spawns the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the thread cannot be spawned.
    pub fn start() -> Result<Self> {
        let (jobs, inbox) = unbounded::<Job>();
        let (report, done) = unbounded();
        let thread = thread::Builder::new()
            .name("voxelsync-save".into())
            .spawn(move || {
                for job in inbox {
                    let started = Instant::now();
                    let result = (job.run)().map(|r| SaveReport {
                        elapsed: started.elapsed(),
                        ..r
                    });
                    if let Err(e) = &result {
                        error!("save job {} failed: {e}", job.id);
                    }
                    let outcome = JobOutcome {
                        id: job.id,
                        label: job.label,
                        result,
                    };
                    if report.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .map_err(Error::from)?;
        debug!("save worker started");
        Ok(Self {
            jobs: Some(jobs),
            done,
            thread: Some(thread),
            next_id: 0,
            outstanding: 0,
        })
    }

    /// Returns true until [`Self::stop`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    /// Jobs submitted and not yet collected.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Queues a job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` after [`Self::stop`], or `Internal` if the
    /// thread has died.
    pub fn submit(&mut self, label: JobLabel, run: SaveJob) -> Result<u64> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| Error::invalid_transition("stopped", "submit"))?;
        self.next_id += 1;
        let id = self.next_id;
        jobs.send(Job { id, label, run })
            .map_err(|_| Error::internal("save worker thread is gone"))?;
        self.outstanding += 1;
        Ok(id)
    }

    /// Collects finished jobs without blocking.
    pub fn try_completed(&mut self) -> Vec<JobOutcome> {
        let finished: Vec<JobOutcome> = self.done.try_iter().collect();
        self.outstanding -= finished.len();
        finished
    }

    /// Blocks until every submitted job has finished and returns them.
    pub fn drain(&mut self) -> Vec<JobOutcome> {
        let mut finished = Vec::with_capacity(self.outstanding);
        while self.outstanding > 0 {
            match self.done.recv() {
                Ok(outcome) => {
                    self.outstanding -= 1;
                    finished.push(outcome);
                }
                Err(_) => {
                    error!("save worker exited with {} jobs outstanding", self.outstanding);
                    self.outstanding = 0;
                }
            }
        }
        finished
    }

    /// Drains, then joins the thread. Repeated calls return nothing.
    pub fn stop(&mut self) -> Vec<JobOutcome> {
        let finished = self.drain();
        self.jobs = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("save worker panicked");
            }
            debug!("save worker stopped");
        }
        finished
    }
}

impl Drop for SaveWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SaveWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveWorker")
            .field("running", &self.is_running())
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}
