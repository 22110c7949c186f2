use std::{mem, sync::Arc};

use super::{Bind, Bound, Execution, PortalContext, simple::SimplePortal};
use crate::{
    Error, Result,
    analyze::{Analyzer, Field, TransactionContext},
    common::{log_error, span, verbose},
    job::{JobId, JobLog},
    plan::{Plan, Planner},
    sink::{Completion, ResultSink},
    statement::PortalName,
    value::{Params, Row},
};

/// Portal executing one statement once per bound parameter row.
///
/// Every execute attaches the sink of the most recent bind, a sync runs all of
/// them in one bulk execution and reports each row count to its sink.
pub struct BulkPortal<A: Analyzer> {
    name: PortalName,
    context: PortalContext<A>,
    transaction: TransactionContext,
    bound: Bound<A>,
    bulk_params: Vec<Params>,
    sinks: Vec<Box<dyn ResultSink>>,
    synced: bool,
}

impl<A: Analyzer> BulkPortal<A> {
    /// Continue the cycle of `simple`, adding `params` as the next parameter row.
    pub(crate) fn from_simple(simple: &mut SimplePortal<A>, params: Params) -> Result<Self> {
        let from = simple.escalate().ok_or_else(|| Error::protocol("bulk escalation of an unbound portal"))?;
        let bulk_params = vec![from.bound.params.clone(), params];
        Ok(Self {
            name: from.name,
            context: from.context,
            transaction: from.transaction,
            bound: from.bound,
            bulk_params,
            sinks: from.sink.into_iter().collect(),
            synced: false,
        })
    }

    pub fn name(&self) -> &PortalName {
        &self.name
    }

    pub(crate) fn context(&self) -> &PortalContext<A> {
        &self.context
    }

    pub(crate) fn bound(&self) -> &Bound<A> {
        &self.bound
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of bound parameter rows.
    pub fn len(&self) -> usize {
        self.bulk_params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bulk_params.is_empty()
    }

    pub(crate) fn bind(&mut self, bind: Bind<A::Tree>) -> Result<()> {
        if bind.statement != self.bound.statement {
            return Err(Error::protocol("bulk portal cannot bind a different statement"));
        }
        self.bulk_params.push(bind.params.clone());
        self.bound.params = bind.params;
        Ok(())
    }

    pub(crate) fn describe(&self) -> Option<&[Field]> {
        self.bound.fields()
    }

    /// The row cap is ignored, each execution reports a single row count.
    pub(crate) fn execute(&mut self, sink: Box<dyn ResultSink>, _: u32) -> Result<()> {
        self.bound.validate_read_only(self.context.config())?;
        self.sinks.push(sink);
        Ok(())
    }

    pub(crate) fn sync<P>(&mut self, planner: &Arc<P>, job_log: &Arc<dyn JobLog>) -> Result<Completion>
    where
        P: Planner<A::Statement>,
    {
        span!("bulk_sync", portal = %self.name, rows = self.bulk_params.len());

        if self.sinks.is_empty() {
            self.synced = true;
            return Ok(Completion::ready(Ok(())));
        }

        let execution = Execution {
            context: &self.context,
            planner,
            job_log,
            transaction: &self.transaction,
            bound: &self.bound,
            fetch_size: 0,
        };
        let job_id = JobId::new();
        let (plan, context) = execution.plan(job_id)?;

        job_log.log_execution_start(job_id, &self.bound.query, self.context.config().user());
        verbose!(%job_id, rows = self.bulk_params.len(), "execute bulk");

        let results = plan.execute_bulk(&context, &self.bulk_params);
        let sinks = mem::take(&mut self.sinks);
        let (send, completion) = Completion::channel();
        let job_log = Arc::clone(job_log);
        self.synced = true;

        tokio::spawn(async move {
            let result = deliver(results.await, sinks);
            match &result {
                Ok(()) => job_log.log_execution_end(job_id, None),
                Err(err) => job_log.log_execution_end(job_id, Some(&format!("{err:#}"))),
            }
            let _ = send.send(result);
        });

        Ok(completion)
    }

    pub(crate) fn close(&mut self) {
        self.bulk_params.clear();
        self.sinks.clear();
    }
}

/// Report row count `i` to sink `i`, returns the first failure.
fn deliver(results: Vec<Result<u64>>, sinks: Vec<Box<dyn ResultSink>>) -> Result<()> {
    let mut outcome = Ok(());
    let mut results = results.into_iter();

    for mut sink in sinks {
        match results.next() {
            Some(Ok(count)) => {
                sink.set_next_row(&Row::row_count(count));
                sink.all_finished(false);
            },
            Some(Err(err)) => {
                sink.fail(err.clone());
                outcome = outcome.and(Err(err));
            },
            None => {
                let err = Error::protocol("execute without bound parameters");
                sink.fail(err.clone());
                outcome = outcome.and(Err(err));
            },
        }
    }

    if results.len() != 0 {
        log_error!("{} bulk results without execute dropped", results.len());
    }

    outcome
}

#[cfg(test)]
mod test {
    use crate::{
        ErrorKind, Portal, Row, SessionConfig, row,
        portal::Bind,
        statement::{PortalName, Statement},
        testing::{self, RecordingSink},
    };

    #[tokio::test]
    async fn three_inserts_report_counts_in_order() {
        let (context, analyzer) = testing::context(SessionConfig::default());
        let planner = testing::planner(0);
        let (job_log, log) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        let sql = "INSERT INTO t VALUES ($1)";
        let statement = Statement::new(sql);
        let mut records = vec![];

        for i in 1..=3 {
            portal.bind(Bind::new(sql, statement.clone()).params(row![i])).unwrap();
            assert_eq!(portal.is_bulk(), i > 1);
            let (sink, record) = RecordingSink::new();
            portal.execute(Box::new(sink), 0).unwrap();
            records.push(record);
        }

        portal.sync(&planner, &job_log).unwrap().await.unwrap();

        for record in &records {
            assert_eq!(record.rows(), vec![Row::row_count(1)]);
            assert_eq!(record.all_finished(), vec![false]);
        }
        let params: Vec<_> = planner.executions().into_iter().map(|e| e.params).collect();
        assert_eq!(params, vec![row![1], row![2], row![3]]);
        assert_eq!(planner.plans(), 1);
        assert_eq!(analyzer.calls(), 1);
        assert_eq!(log.started().len(), 1);
        assert_eq!(log.ended().len(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_matching_sink() {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(0);
        let (job_log, _) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        let sql = "INSERT INTO t VALUES ($1)";
        let statement = Statement::new(sql);
        let mut records = vec![];
        for i in 1..=2 {
            portal.bind(Bind::new(sql, statement.clone()).params(row![i])).unwrap();
            let (sink, record) = RecordingSink::new();
            portal.execute(Box::new(sink), 0).unwrap();
            records.push(record);
        }
        planner.fail_next(0);

        assert!(portal.sync(&planner, &job_log).unwrap().await.is_err());
        assert_eq!(records[0].failures().len(), 1);
        assert_eq!(records[1].failures().len(), 1);
    }

    #[test]
    fn read_only_rejects_bulk() {
        let (context, _) = testing::context(SessionConfig::default().read_only(true));
        let mut portal = Portal::new(PortalName::unnamed(), context);
        let statement = Statement::new("SELECT x FROM t");

        portal.bind(Bind::new("SELECT x FROM t", statement.clone())).unwrap();
        let err = portal.bind(Bind::new("SELECT x FROM t", statement)).unwrap_err();
        assert!(err.is_read_only());
        assert!(portal.is_simple());
    }

    #[test]
    fn different_statement_rejected() {
        let (context, _) = testing::context(SessionConfig::default());
        let mut portal = Portal::new(PortalName::unnamed(), context);
        let sql = "INSERT INTO t VALUES ($1)";
        let statement = Statement::new(sql);

        portal.bind(Bind::new(sql, statement.clone()).params(row![1])).unwrap();
        portal.bind(Bind::new(sql, statement).params(row![2])).unwrap();
        let err = portal.bind(Bind::new(sql, Statement::new(sql))).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(_)));
        assert!(portal.is_bulk());
    }
}
