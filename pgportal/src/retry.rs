//! Retry decorator for read statements.
use crate::{
    Error, Result,
    common::{log_error, verbose},
    job::JobId,
    sink::ResultSink,
    value::Row,
};

/// Re-analyze, re-plan and re-execute a statement under the given job id.
pub(crate) type RetryFn = Box<dyn FnOnce(JobId) -> Result<()> + Send>;

/// Intercepts the first failure of an execution and retries it once.
///
/// Rows are forwarded as is. The retried execution reports into the same consumer,
/// a failure during it reaches the inner sink.
pub(crate) struct RetrySink<S> {
    inner: S,
    #[cfg_attr(not(feature = "log"), allow(unused))]
    job_id: JobId,
    retry: Option<RetryFn>,
}

impl<S: ResultSink> RetrySink<S> {
    pub(crate) fn new(inner: S, job_id: JobId, retry: RetryFn) -> Self {
        Self { inner, job_id, retry: Some(retry) }
    }
}

impl<S: ResultSink> ResultSink for RetrySink<S> {
    fn set_next_row(&mut self, row: &Row) {
        self.inner.set_next_row(row);
    }

    fn batch_finished(&mut self) {
        self.inner.batch_finished();
    }

    fn all_finished(&mut self, interrupted: bool) {
        self.inner.all_finished(interrupted);
    }

    fn fail(&mut self, error: Error) {
        let Some(retry) = self.retry.take() else {
            self.inner.fail(error);
            return;
        };

        let job_id = JobId::new();
        log_error!("job {} failed, retrying as {job_id}: {error:#}", self.job_id);
        verbose!(%job_id, "retry");

        if let Err(retry_err) = retry(job_id) {
            self.inner.fail(retry_err);
        }
    }
}
