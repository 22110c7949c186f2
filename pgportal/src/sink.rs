//! The [`ResultSink`] trait and the [`Completion`] handle.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::sync::oneshot;

use crate::{
    Error, Result,
    common::log_error,
    job::{JobId, JobLog},
    value::Row,
};

/// Destination of a portal's results, implemented by the protocol front-end.
///
/// Each round ends with exactly one of [`batch_finished`][1], [`all_finished`][2] or
/// [`fail`][3]. A sink whose round suspended, or never started, receives
/// `all_finished(true)` when the portal is closed without draining the remaining rows.
///
/// [1]: ResultSink::batch_finished
/// [2]: ResultSink::all_finished
/// [3]: ResultSink::fail
pub trait ResultSink: Send + 'static {
    /// Deliver one row.
    fn set_next_row(&mut self, row: &Row);

    /// Row cap reached, the portal is suspended and more rows may follow.
    fn batch_finished(&mut self);

    /// No more rows, `interrupted` if the portal was closed while suspended.
    fn all_finished(&mut self, interrupted: bool);

    /// Execution failed.
    fn fail(&mut self, error: Error);
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn set_next_row(&mut self, row: &Row) {
        S::set_next_row(self, row);
    }

    fn batch_finished(&mut self) {
        S::batch_finished(self);
    }

    fn all_finished(&mut self, interrupted: bool) {
        S::all_finished(self, interrupted);
    }

    fn fail(&mut self, error: Error) {
        S::fail(self, error);
    }
}

pin_project_lite::pin_project! {
    /// Resolves when a sync round is finished.
    ///
    /// Dropping the handle does not cancel the execution.
    #[derive(Debug)]
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct Completion {
        #[pin]
        recv: oneshot::Receiver<Result<()>>,
    }
}

impl Completion {
    pub(crate) fn channel() -> (oneshot::Sender<Result<()>>, Completion) {
        let (send, recv) = oneshot::channel();
        (send, Completion { recv })
    }

    /// Already resolved completion.
    pub(crate) fn ready(result: Result<()>) -> Completion {
        let (send, me) = Self::channel();
        let _ = send.send(result);
        me
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().recv.poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(Error::closed("result sink"))),
        }
    }
}

/// Resolves a [`Completion`] and logs the job end on the first terminal signal.
///
/// Installed before execution starts, so no terminal signal can be missed.
pub(crate) struct CompletionSink<S> {
    inner: S,
    job_id: JobId,
    job_log: Arc<dyn JobLog>,
    send: Option<oneshot::Sender<Result<()>>>,
}

impl<S: ResultSink> CompletionSink<S> {
    pub(crate) fn new(inner: S, job_id: JobId, job_log: Arc<dyn JobLog>) -> (Self, Completion) {
        let (send, completion) = Completion::channel();
        (Self { inner, job_id, job_log, send: Some(send) }, completion)
    }

    fn complete(&mut self, result: Result<()>) {
        let Some(send) = self.send.take() else {
            return;
        };
        match &result {
            Ok(()) => self.job_log.log_execution_end(self.job_id, None),
            Err(err) => self.job_log.log_execution_end(self.job_id, Some(&format!("{err:#}"))),
        }
        let _ = send.send(result);
    }
}

impl<S: ResultSink> ResultSink for CompletionSink<S> {
    fn set_next_row(&mut self, row: &Row) {
        self.inner.set_next_row(row);
    }

    fn batch_finished(&mut self) {
        self.inner.batch_finished();
        self.complete(Ok(()));
    }

    fn all_finished(&mut self, interrupted: bool) {
        self.inner.all_finished(interrupted);
        self.complete(Ok(()));
    }

    fn fail(&mut self, error: Error) {
        self.inner.fail(error.clone());
        self.complete(Err(error));
    }
}

impl<S> Drop for CompletionSink<S> {
    fn drop(&mut self) {
        if self.send.is_some() {
            log_error!("job {} dropped without terminal signal", self.job_id);
            self.job_log.log_execution_end(self.job_id, Some("result sink closed"));
        }
    }
}

/// Collects the row count of one bulk execution.
///
/// A write plan reports its count as a single one column integer row,
/// otherwise delivered rows are counted.
pub(crate) struct RowCountSink {
    rows: u64,
    reported: Option<u64>,
    send: Option<oneshot::Sender<Result<u64>>>,
}

impl RowCountSink {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<u64>>) {
        let (send, recv) = oneshot::channel();
        (Self { rows: 0, reported: None, send: Some(send) }, recv)
    }

    fn complete(&mut self, result: Result<u64>) {
        if let Some(send) = self.send.take() {
            let _ = send.send(result);
        }
    }
}

impl ResultSink for RowCountSink {
    fn set_next_row(&mut self, row: &Row) {
        self.rows += 1;
        self.reported = match (self.rows, row.len(), row.get(0).and_then(|e| e.as_int())) {
            (1, 1, Some(count)) => u64::try_from(count).ok(),
            _ => None,
        };
    }

    fn batch_finished(&mut self) {
        let count = self.reported.unwrap_or(self.rows);
        self.complete(Ok(count));
    }

    fn all_finished(&mut self, _: bool) {
        let count = self.reported.unwrap_or(self.rows);
        self.complete(Ok(count));
    }

    fn fail(&mut self, error: Error) {
        self.complete(Err(error));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{row, testing::{RecordingJobLog, RecordingSink}};

    #[tokio::test]
    async fn completion_fires_once() {
        let job_log = Arc::new(RecordingJobLog::default());
        let (sink, record) = RecordingSink::new();
        let job_id = JobId::new();
        let (mut sink, completion) = CompletionSink::new(sink, job_id, job_log.clone());

        sink.set_next_row(&row![1]);
        sink.batch_finished();
        sink.all_finished(true);

        completion.await.unwrap();
        assert_eq!(record.rows().len(), 1);
        assert_eq!(record.batch_finished(), 1);
        assert_eq!(record.all_finished(), vec![true]);
        assert_eq!(job_log.ended(), vec![(job_id, None)]);
    }

    #[tokio::test]
    async fn failure_reaches_sink_and_completion() {
        let job_log = Arc::new(RecordingJobLog::default());
        let (sink, record) = RecordingSink::new();
        let (mut sink, completion) = CompletionSink::new(sink, JobId::new(), job_log.clone());

        sink.fail(Error::execution("shard failure"));

        assert!(completion.await.is_err());
        assert_eq!(record.failures().len(), 1);
        assert_eq!(job_log.ended()[0].1.as_deref(), Some("execution failed: shard failure"));
    }

    #[tokio::test]
    async fn dropped_sink_closes_completion() {
        let job_log = Arc::new(RecordingJobLog::default());
        let (sink, _record) = RecordingSink::new();
        let (sink, completion) = CompletionSink::new(sink, JobId::new(), job_log.clone());
        drop(sink);
        assert!(completion.await.is_err());
        assert_eq!(job_log.ended().len(), 1);
    }

    #[tokio::test]
    async fn row_count_from_single_count_row() {
        let (mut sink, recv) = RowCountSink::new();
        sink.set_next_row(&row![7]);
        sink.all_finished(false);
        assert_eq!(recv.await.unwrap().unwrap(), 7);

        let (mut sink, recv) = RowCountSink::new();
        sink.set_next_row(&row![1, "a"]);
        sink.set_next_row(&row![2, "b"]);
        sink.all_finished(false);
        assert_eq!(recv.await.unwrap().unwrap(), 2);
    }
}
