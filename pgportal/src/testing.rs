//! Collaborator stubs for unit tests.
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    Error, Result,
    analyze::{Analysis, AnalyzedStatement, Analyzer, Field, Relation, TransactionContext},
    consumer::RowConsumer,
    config::SessionConfig,
    job::{JobId, JobLog},
    plan::{Plan, Planner, PlannerContext, RowStream},
    sink::ResultSink,
    statement::Statement,
    portal::PortalContext,
    value::{Oid, Params, Row, Value},
};

pub const INT8: Oid = 20;

pub fn stream(rows: Vec<Row>) -> RowStream {
    Box::pin(futures::stream::iter(rows.into_iter().map(Ok)))
}

// ===== Sink =====

#[derive(Default)]
struct Record {
    rows: Vec<Row>,
    batch_finished: usize,
    all_finished: Vec<bool>,
    failures: Vec<Error>,
}

/// Shared view of what a [`RecordingSink`] received.
#[derive(Clone, Default)]
pub struct SinkRecord(Arc<Mutex<Record>>);

impl SinkRecord {
    pub fn rows(&self) -> Vec<Row> {
        self.0.lock().unwrap().rows.clone()
    }

    pub fn batch_finished(&self) -> usize {
        self.0.lock().unwrap().batch_finished
    }

    pub fn all_finished(&self) -> Vec<bool> {
        self.0.lock().unwrap().all_finished.clone()
    }

    pub fn failures(&self) -> Vec<Error> {
        self.0.lock().unwrap().failures.clone()
    }
}

pub struct RecordingSink {
    record: SinkRecord,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkRecord) {
        let record = SinkRecord::default();
        (Self { record: record.clone() }, record)
    }
}

impl ResultSink for RecordingSink {
    fn set_next_row(&mut self, row: &Row) {
        self.record.0.lock().unwrap().rows.push(row.clone());
    }

    fn batch_finished(&mut self) {
        self.record.0.lock().unwrap().batch_finished += 1;
    }

    fn all_finished(&mut self, interrupted: bool) {
        self.record.0.lock().unwrap().all_finished.push(interrupted);
    }

    fn fail(&mut self, error: Error) {
        self.record.0.lock().unwrap().failures.push(error);
    }
}

// ===== Job log =====

#[derive(Default)]
pub struct RecordingJobLog {
    started: Mutex<Vec<(JobId, String)>>,
    ended: Mutex<Vec<(JobId, Option<String>)>>,
    pre_execution: Mutex<Vec<(JobId, String)>>,
}

impl RecordingJobLog {
    pub fn started(&self) -> Vec<(JobId, String)> {
        self.started.lock().unwrap().clone()
    }

    pub fn ended(&self) -> Vec<(JobId, Option<String>)> {
        self.ended.lock().unwrap().clone()
    }

    pub fn pre_execution_failures(&self) -> Vec<(JobId, String)> {
        self.pre_execution.lock().unwrap().clone()
    }
}

impl JobLog for RecordingJobLog {
    fn log_execution_start(&self, job_id: JobId, statement: &str, _: &str) {
        self.started.lock().unwrap().push((job_id, statement.to_owned()));
    }

    fn log_execution_end(&self, job_id: JobId, error: Option<&str>) {
        self.ended.lock().unwrap().push((job_id, error.map(ToOwned::to_owned)));
    }

    fn log_pre_execution_failure(&self, job_id: JobId, _: &str, message: &str, _: &str) {
        self.pre_execution.lock().unwrap().push((job_id, message.to_owned()));
    }
}

// ===== Analyzer =====

/// Statement analyzed by [`TestAnalyzer`], writes are recognized by their verb.
#[derive(Debug)]
pub struct TestStatement {
    pub sql: &'static str,
    pub write: bool,
}

impl AnalyzedStatement for TestStatement {
    fn is_write_operation(&self) -> bool {
        self.write
    }
}

#[derive(Default)]
pub struct TestAnalyzer {
    calls: AtomicUsize,
}

impl TestAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Analyzer for TestAnalyzer {
    type Tree = &'static str;
    type Statement = TestStatement;

    fn analyze(
        &self,
        statement: &Statement<&'static str>,
        _: &TransactionContext,
        _: &Params,
    ) -> Result<Analysis<TestStatement>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sql = *statement.tree();
        let verb = sql.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
        match verb.as_str() {
            "SELECT" => Ok(Analysis::with_relation(
                TestStatement { sql, write: false },
                Relation::new(vec![Field::new("x", INT8)]),
            )),
            "INSERT" | "UPDATE" | "DELETE" | "CREATE" => Ok(Analysis::new(TestStatement { sql, write: true })),
            _ => Err(Error::analysis(format!("cannot analyze {sql}"))),
        }
    }
}

// ===== Planner =====

/// One recorded [`Plan::execute`] call.
#[derive(Clone, Debug)]
pub struct Execution {
    pub job_id: JobId,
    pub sql: &'static str,
    pub params: Params,
}

/// Plans over a fixed in memory table.
///
/// Statements mentioning `missing` fail to plan.
pub struct TestPlanner {
    rows: Vec<Row>,
    plans: AtomicUsize,
    failing: Mutex<VecDeque<usize>>,
    accept_delay: Option<Duration>,
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl TestPlanner {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            plans: AtomicUsize::new(0),
            failing: Mutex::default(),
            accept_delay: None,
            executions: Arc::default(),
        }
    }

    /// Plans hand their output over from a spawned task after `delay`.
    pub fn accept_after(mut self, delay: Duration) -> Self {
        self.accept_delay = Some(delay);
        self
    }

    /// The next plan built fails its execution after `after_rows` rows.
    pub fn fail_next(&self, after_rows: usize) {
        self.failing.lock().unwrap().push_back(after_rows);
    }

    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().clone()
    }
}

impl Planner<TestStatement> for TestPlanner {
    type Plan = TestPlan;

    fn plan(&self, statement: &TestStatement, _: &PlannerContext) -> Result<TestPlan> {
        self.plans.fetch_add(1, Ordering::SeqCst);
        if statement.sql.contains("missing") {
            return Err(Error::planning("relation does not exist"));
        }
        Ok(TestPlan {
            sql: statement.sql,
            rows: match statement.write {
                true => vec![Row::row_count(1)],
                false => self.rows.clone(),
            },
            fail_after: self.failing.lock().unwrap().pop_front(),
            accept_delay: self.accept_delay,
            executions: self.executions.clone(),
        })
    }
}

pub struct TestPlan {
    sql: &'static str,
    rows: Vec<Row>,
    fail_after: Option<usize>,
    accept_delay: Option<Duration>,
    executions: Arc<Mutex<Vec<Execution>>>,
}

impl Plan for TestPlan {
    fn execute(&self, context: &PlannerContext, consumer: RowConsumer, params: &Params) {
        self.executions.lock().unwrap().push(Execution {
            job_id: context.job_id(),
            sql: self.sql,
            params: params.clone(),
        });

        let mut items: Vec<Result<Row>> = self.rows.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(Error::execution("shard failure")));
        }
        let rows: RowStream = Box::pin(futures::stream::iter(items));
        match self.accept_delay {
            None => consumer.accept(rows),
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    consumer.accept(rows);
                });
            },
        }
    }
}

// ===== Fixtures =====

/// Rows `1..=n` of a one column table.
pub fn table(n: i64) -> Vec<Row> {
    (1..=n).map(|i| Row::new([Value::Int(i)])).collect()
}

pub fn planner(rows: i64) -> Arc<TestPlanner> {
    Arc::new(TestPlanner::new(table(rows)))
}

pub fn slow_planner(rows: i64, delay: Duration) -> Arc<TestPlanner> {
    Arc::new(TestPlanner::new(table(rows)).accept_after(delay))
}

pub fn context(config: SessionConfig) -> (PortalContext<TestAnalyzer>, Arc<TestAnalyzer>) {
    let analyzer = Arc::new(TestAnalyzer::default());
    (PortalContext::new(analyzer.clone(), config), analyzer)
}

pub fn job_log() -> (Arc<dyn JobLog>, Arc<RecordingJobLog>) {
    let log = Arc::new(RecordingJobLog::default());
    (log.clone(), log)
}
