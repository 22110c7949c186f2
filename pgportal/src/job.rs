//! Job identifiers and the [`JobLog`] trait.
use lru::LruCache;
use std::{
    collections::HashMap,
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};
use uuid::Uuid;

use crate::{
    common::{ByteStr, trace},
    config::SessionConfig,
};

/// Identifier of one plan execution.
///
/// Every sync round and every retry runs under a fresh id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Debug for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("JobId").field(&self.0).finish()
    }
}

/// Receiver of job lifecycle events.
pub trait JobLog: Send + Sync + 'static {
    /// A plan for `statement` started executing.
    fn log_execution_start(&self, job_id: JobId, statement: &str, user: &str);

    /// Execution of `job_id` ended, `error` is the failure message if any.
    fn log_execution_end(&self, job_id: JobId, error: Option<&str>);

    /// Statement failed before any execution started.
    fn log_pre_execution_failure(&self, job_id: JobId, statement: &str, message: &str, user: &str);
}

/// A running job.
#[derive(Clone, Debug)]
pub struct JobContext {
    pub id: JobId,
    pub statement: ByteStr,
    pub user: ByteStr,
    pub started: SystemTime,
}

/// A finished job.
#[derive(Clone, Debug)]
pub struct JobLogEntry {
    pub id: JobId,
    pub statement: ByteStr,
    pub user: ByteStr,
    pub started: SystemTime,
    pub ended: SystemTime,
    pub error: Option<String>,
}

/// In memory [`JobLog`], tracks active jobs and a bounded history of finished ones.
pub struct JobsLogs {
    inner: Mutex<Inner>,
}

struct Inner {
    active: HashMap<JobId, JobContext>,
    finished: LruCache<JobId, JobLogEntry>,
}

impl JobsLogs {
    /// Keep at most `capacity` finished jobs, at least one is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                active: HashMap::new(),
                finished: LruCache::new(capacity),
            }),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.jobs_log_size)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently running jobs.
    pub fn active_jobs(&self) -> Vec<JobContext> {
        self.lock().active.values().cloned().collect()
    }

    /// Finished jobs, oldest first.
    pub fn finished_jobs(&self) -> Vec<JobLogEntry> {
        let inner = self.lock();
        let mut jobs: Vec<_> = inner.finished.iter().map(|(_, e)| e.clone()).collect();
        jobs.reverse();
        jobs
    }
}

impl JobLog for JobsLogs {
    fn log_execution_start(&self, job_id: JobId, statement: &str, user: &str) {
        trace!("job {job_id} started: {statement}");
        let job = JobContext {
            id: job_id,
            statement: ByteStr::copy_from_str(statement),
            user: ByteStr::copy_from_str(user),
            started: SystemTime::now(),
        };
        self.lock().active.insert(job_id, job);
    }

    fn log_execution_end(&self, job_id: JobId, error: Option<&str>) {
        trace!("job {job_id} ended, error: {error:?}");
        let mut inner = self.lock();
        let Some(job) = inner.active.remove(&job_id) else {
            return;
        };
        let entry = JobLogEntry {
            id: job.id,
            statement: job.statement,
            user: job.user,
            started: job.started,
            ended: SystemTime::now(),
            error: error.map(ToOwned::to_owned),
        };
        inner.finished.put(job_id, entry);
    }

    fn log_pre_execution_failure(&self, job_id: JobId, statement: &str, message: &str, user: &str) {
        trace!("job {job_id} failed before execution: {message}");
        let now = SystemTime::now();
        let entry = JobLogEntry {
            id: job_id,
            statement: ByteStr::copy_from_str(statement),
            user: ByteStr::copy_from_str(user),
            started: now,
            ended: now,
            error: Some(message.to_owned()),
        };
        self.lock().finished.put(job_id, entry);
    }
}
