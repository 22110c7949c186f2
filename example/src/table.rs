//! In memory table standing in for a real analyzer and planner.
use futures::stream;
use std::sync::{Arc, Mutex};
use tracing::info;

use pgportal::{
    Analysis, AnalyzedStatement, Analyzer, Error, Field, Params, Plan, Planner, PlannerContext,
    Relation, Result, ResultSink, Row, RowConsumer, Statement, TransactionContext,
};

const INT8: u32 = 20;
const TEXT: u32 = 25;

/// Parsed statement.
#[derive(Clone, Debug)]
pub enum Query {
    Select { limit: Option<usize> },
    Insert,
}

impl AnalyzedStatement for Query {
    fn is_write_operation(&self) -> bool {
        matches!(self, Query::Insert)
    }
}

/// Understands `SELECT * FROM people [LIMIT n]` and `INSERT INTO people VALUES ($1, $2)`.
pub fn parse(sql: &str) -> Result<Statement<Query>> {
    let upper = sql.to_ascii_uppercase();
    let query = if upper.starts_with("SELECT") {
        let limit = match upper.split_once(" LIMIT ") {
            Some((_, n)) => Some(n.trim().parse().map_err(|_| Error::analysis("invalid LIMIT"))?),
            None => None,
        };
        Query::Select { limit }
    } else if upper.starts_with("INSERT") {
        Query::Insert
    } else {
        return Err(Error::analysis(format!("unsupported statement: {sql}")));
    };
    Ok(Statement::new(query))
}

pub struct TableAnalyzer;

impl Analyzer for TableAnalyzer {
    type Tree = Query;
    type Statement = Query;

    fn analyze(
        &self,
        statement: &Statement<Query>,
        _: &TransactionContext,
        params: &Params,
    ) -> Result<Analysis<Query>> {
        match statement.tree() {
            Query::Insert if params.len() != 2 => Err(Error::analysis("INSERT expects 2 parameters")),
            Query::Insert => Ok(Analysis::new(Query::Insert)),
            select => Ok(Analysis::with_relation(
                select.clone(),
                Relation::new(vec![Field::new("id", INT8), Field::new("name", TEXT)]),
            )),
        }
    }
}

/// The `people` table.
#[derive(Clone, Default)]
pub struct Table {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl Planner<Query> for Table {
    type Plan = TablePlan;

    fn plan(&self, statement: &Query, _: &PlannerContext) -> Result<TablePlan> {
        Ok(TablePlan { query: statement.clone(), table: self.clone() })
    }
}

pub struct TablePlan {
    query: Query,
    table: Table,
}

impl Plan for TablePlan {
    fn execute(&self, context: &PlannerContext, consumer: RowConsumer, params: &Params) {
        let Ok(mut rows) = self.table.rows.lock() else {
            consumer.accept_failure(Error::execution("table lock poisoned"));
            return;
        };

        let output: Vec<Row> = match self.query {
            Query::Select { limit } => {
                let limit = limit.or(match context.default_limit() {
                    0 => None,
                    n => Some(n as usize),
                });
                rows.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect()
            },
            Query::Insert => {
                rows.push(params.clone());
                vec![Row::row_count(1)]
            },
        };

        consumer.accept(Box::pin(stream::iter(output.into_iter().map(Ok))));
    }
}

/// Prints received rows.
pub struct PrintSink {
    label: &'static str,
}

impl PrintSink {
    pub fn boxed(label: &'static str) -> Box<dyn ResultSink> {
        Box::new(Self { label })
    }
}

impl ResultSink for PrintSink {
    fn set_next_row(&mut self, row: &Row) {
        info!("{}: {row:?}", self.label);
    }

    fn batch_finished(&mut self) {
        info!("{}: suspended", self.label);
    }

    fn all_finished(&mut self, interrupted: bool) {
        info!("{}: finished, interrupted: {interrupted}", self.label);
    }

    fn fail(&mut self, error: Error) {
        info!("{}: failed: {error:#}", self.label);
    }
}
