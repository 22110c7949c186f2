use std::sync::Arc;

use super::{Bind, Bound, Execution, PortalContext, simple::SimplePortal};
use crate::{
    Error, Result,
    analyze::{Analyzer, Field, TransactionContext},
    common::{span, verbose},
    consumer::RowConsumer,
    job::{JobId, JobLog},
    plan::{Plan, Planner, PlannerContext},
    sink::{Completion, ResultSink},
    statement::PortalName,
    value::Params,
};

/// Portal executing distinct statements bound before one sync.
///
/// Statements run one after another in bind order, each drained without row cap
/// into the sink attached by the execute following its bind.
pub struct BatchPortal<A: Analyzer> {
    name: PortalName,
    context: PortalContext<A>,
    transaction: TransactionContext,
    entries: Vec<Entry<A>>,
    synced: bool,
}

struct Entry<A: Analyzer> {
    bound: Bound<A>,
    sink: Option<Box<dyn ResultSink>>,
}

/// A planned entry, ready to run.
struct Run<T> {
    plan: T,
    context: PlannerContext,
    params: Params,
    consumer: RowConsumer,
    completion: Completion,
}

impl<A: Analyzer> BatchPortal<A> {
    /// Continue the cycle of `simple`, appending `entry`.
    pub(crate) fn from_simple(simple: &mut SimplePortal<A>, entry: Bound<A>) -> Result<Self> {
        let from = simple.escalate().ok_or_else(|| Error::protocol("batch escalation of an unbound portal"))?;
        let first = Entry { bound: from.bound, sink: from.sink };
        let mut me = Self {
            name: from.name,
            context: from.context,
            transaction: from.transaction,
            entries: vec![first],
            synced: false,
        };
        me.entries.push(Entry { bound: entry, sink: None });
        Ok(me)
    }

    pub fn name(&self) -> &PortalName {
        &self.name
    }

    pub(crate) fn context(&self) -> &PortalContext<A> {
        &self.context
    }

    pub(crate) fn last(&self) -> Option<&Bound<A>> {
        self.entries.last().map(|e| &e.bound)
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Number of bound statements.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn bind(&mut self, bind: Bind<A::Tree>) -> Result<()> {
        let bound = Bound::analyze(&self.context, &self.transaction, bind)?;
        verbose!(portal = %self.name, query = %bound.query, index = self.entries.len(), "batch bound");
        self.entries.push(Entry { bound, sink: None });
        Ok(())
    }

    pub(crate) fn describe(&self) -> Option<&[Field]> {
        self.last().and_then(Bound::fields)
    }

    /// Attach `sink` to the most recent bind, the row cap is ignored.
    pub(crate) fn execute(&mut self, sink: Box<dyn ResultSink>, _: u32) -> Result<()> {
        let Some(entry) = self.entries.last_mut() else {
            return Err(Error::protocol("execute before bind"));
        };
        entry.bound.validate_read_only(self.context.config())?;
        entry.sink = Some(sink);
        Ok(())
    }

    pub(crate) fn sync<P>(&mut self, planner: &Arc<P>, job_log: &Arc<dyn JobLog>) -> Result<Completion>
    where
        P: Planner<A::Statement>,
    {
        span!("batch_sync", portal = %self.name, entries = self.entries.len());

        // plan everything first, so no statement runs if any cannot be planned
        let mut planned = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.sink.is_none() {
                continue;
            }
            let execution = Execution {
                context: &self.context,
                planner,
                job_log,
                transaction: &self.transaction,
                bound: &entry.bound,
                fetch_size: 0,
            };
            let job_id = JobId::new();
            let (plan, context) = execution.plan(job_id)?;
            planned.push((i, job_id, plan, context));
        }

        self.synced = true;
        if planned.is_empty() {
            return Ok(Completion::ready(Ok(())));
        }

        let mut runs = Vec::with_capacity(planned.len());
        for (i, job_id, plan, context) in planned {
            let entry = &mut self.entries[i];
            let Some(sink) = entry.sink.take() else {
                continue;
            };
            let execution = Execution {
                context: &self.context,
                planner,
                job_log,
                transaction: &self.transaction,
                bound: &entry.bound,
                fetch_size: 0,
            };
            let consumer = RowConsumer::new();
            let (sink, completion) = execution.sink(sink, job_id, &consumer);
            consumer.set_sink(sink, 0);
            runs.push(Run {
                plan,
                context,
                params: entry.bound.params.clone(),
                consumer,
                completion,
            });
        }

        let (send, completion) = Completion::channel();
        tokio::spawn(async move {
            let mut outcome = Ok(());
            for run in runs {
                verbose!(job_id = %run.context.job_id(), "execute batch entry");
                run.plan.execute(&run.context, run.consumer, &run.params);
                if let Err(err) = run.completion.await {
                    outcome = outcome.and(Err(err));
                }
            }
            let _ = send.send(outcome);
        });

        Ok(completion)
    }

    pub(crate) fn close(&mut self) {
        for entry in &mut self.entries {
            entry.sink = None;
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        Portal, SessionConfig, row,
        portal::Bind,
        statement::{PortalName, Statement},
        testing::{self, INT8, RecordingSink},
    };

    fn bind(sql: &'static str) -> Bind<&'static str> {
        Bind::new(sql, Statement::new(sql))
    }

    #[tokio::test]
    async fn distinct_statements_run_in_bind_order() {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(2);
        let (job_log, log) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        let mut records = vec![];
        for sql in ["SELECT x FROM t", "INSERT INTO t VALUES (1)", "SELECT x FROM t WHERE x = 1"] {
            portal.bind(bind(sql)).unwrap();
            let (sink, record) = RecordingSink::new();
            portal.execute(Box::new(sink), 1).unwrap();
            records.push(record);
        }
        assert!(portal.is_batch());
        assert_eq!(portal.last_query(), Some("SELECT x FROM t WHERE x = 1"));
        assert_eq!(portal.last_output_types(), Some(&[INT8][..]));

        portal.sync(&planner, &job_log).unwrap().await.unwrap();

        let order: Vec<_> = planner.executions().into_iter().map(|e| e.sql).collect();
        assert_eq!(order, ["SELECT x FROM t", "INSERT INTO t VALUES (1)", "SELECT x FROM t WHERE x = 1"]);
        assert_eq!(records[0].rows(), testing::table(2));
        assert_eq!(records[1].rows(), vec![crate::Row::row_count(1)]);
        assert_eq!(records[2].all_finished(), vec![false]);

        let started = log.started();
        assert_eq!(started.len(), 3);
        assert_ne!(started[0].0, started[1].0);
        assert_eq!(log.ended().len(), 3);
    }

    #[tokio::test]
    async fn planning_failure_runs_nothing() {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(2);
        let (job_log, log) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        for sql in ["SELECT x FROM t", "SELECT x FROM missing"] {
            portal.bind(bind(sql)).unwrap();
            let (sink, _) = RecordingSink::new();
            portal.execute(Box::new(sink), 0).unwrap();
        }

        assert!(portal.sync(&planner, &job_log).is_err());
        assert!(planner.executions().is_empty());
        assert_eq!(log.pre_execution_failures().len(), 1);
    }

    #[tokio::test]
    async fn read_entry_retried() {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(1);
        let (job_log, _) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        let mut records = vec![];
        for sql in ["INSERT INTO t VALUES ($1)", "SELECT x FROM t"] {
            portal.bind(bind(sql).params(row![5])).unwrap();
            let (sink, record) = RecordingSink::new();
            portal.execute(Box::new(sink), 0).unwrap();
            records.push(record);
        }
        planner.fail_next(1);
        planner.fail_next(0);

        let result = portal.sync(&planner, &job_log).unwrap().await;

        // the write fails without retry, the read recovers
        assert!(result.is_err());
        assert_eq!(records[0].failures().len(), 1);
        assert!(records[1].failures().is_empty());
        assert_eq!(records[1].rows(), testing::table(1));
        assert_eq!(planner.executions().len(), 3);
    }

    #[test]
    fn read_only_rejects_batch() {
        let (context, _) = testing::context(SessionConfig::default().read_only(true));
        let mut portal = Portal::new(PortalName::unnamed(), context);
        portal.bind(bind("SELECT x FROM t")).unwrap();
        assert!(portal.bind(bind("SELECT x FROM u")).unwrap_err().is_read_only());
        assert_eq!(portal.last_query(), Some("SELECT x FROM t"));
    }

    #[tokio::test]
    async fn rebind_after_sync_starts_new_cycle() {
        let (context, _) = testing::context(SessionConfig::default());
        let planner = testing::planner(1);
        let (job_log, _) = testing::job_log();
        let mut portal = Portal::new(PortalName::unnamed(), context);

        portal.bind(bind("SELECT x FROM t")).unwrap();
        portal.bind(bind("SELECT x FROM u")).unwrap();
        portal.sync(&planner, &job_log).unwrap().await.unwrap();

        portal.bind(bind("SELECT x FROM v")).unwrap();
        assert!(portal.is_simple());
        assert_eq!(portal.last_query(), Some("SELECT x FROM v"));
    }
}
