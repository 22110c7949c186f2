//! Extended query portals.
//!
//! A [`Portal`] carries one client portal through the bind, describe, execute and sync
//! cycle. It starts as a [`SimplePortal`] and escalates in place:
//!
//! - the same prepared statement bound again before sync becomes a [`BulkPortal`]
//! - a different statement bound before sync becomes a [`BatchPortal`]
//!
//! Portals assume single writer access, the owning session serializes calls.
use std::sync::Arc;

use crate::{
    Result,
    analyze::{Analysis, Analyzer, AnalyzedStatement, Field, TransactionContext},
    common::{ByteStr, span, verbose},
    config::SessionConfig,
    consumer::RowConsumer,
    error::Error,
    job::{JobId, JobLog},
    plan::{Plan, Planner, PlannerContext},
    retry::{RetryFn, RetrySink},
    sink::{Completion, CompletionSink, ResultSink},
    statement::{PortalName, Statement, StatementName},
    value::{Oid, Params, PgFormat},
};

mod simple;
mod bulk;
mod batch;

pub use simple::SimplePortal;
pub use bulk::BulkPortal;
pub use batch::BatchPortal;

/// A bind message.
pub struct Bind<T> {
    pub statement_name: StatementName,
    /// Original statement text.
    pub query: ByteStr,
    pub statement: Statement<T>,
    pub params: Params,
    /// Output format per column, `None` for text everywhere.
    pub result_formats: Option<Vec<PgFormat>>,
}

impl<T> Bind<T> {
    /// Bind `statement` from the unnamed prepared statement without parameters.
    pub fn new(query: impl Into<ByteStr>, statement: Statement<T>) -> Self {
        Self {
            statement_name: StatementName::unnamed(),
            query: query.into(),
            statement,
            params: Params::default(),
            result_formats: None,
        }
    }

    pub fn statement_name(mut self, name: impl Into<StatementName>) -> Self {
        self.statement_name = name.into();
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn result_formats(mut self, formats: Vec<PgFormat>) -> Self {
        self.result_formats = Some(formats);
        self
    }
}

/// Session wide collaborators shared by all portals.
pub struct PortalContext<A> {
    analyzer: Arc<A>,
    config: SessionConfig,
}

impl<A> PortalContext<A> {
    pub fn new(analyzer: Arc<A>, config: SessionConfig) -> Self {
        Self { analyzer, config }
    }

    pub fn analyzer(&self) -> &Arc<A> {
        &self.analyzer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl<A> Clone for PortalContext<A> {
    fn clone(&self) -> Self {
        Self { analyzer: Arc::clone(&self.analyzer), config: self.config.clone() }
    }
}

/// A client portal.
pub enum Portal<A: Analyzer> {
    Simple(SimplePortal<A>),
    Bulk(BulkPortal<A>),
    Batch(BatchPortal<A>),
}

impl<A: Analyzer> Portal<A> {
    /// Create an empty portal.
    pub fn new(name: PortalName, context: PortalContext<A>) -> Self {
        Portal::Simple(SimplePortal::new(name, context))
    }

    pub fn name(&self) -> &PortalName {
        match self {
            Portal::Simple(p) => p.name(),
            Portal::Bulk(p) => p.name(),
            Portal::Batch(p) => p.name(),
        }
    }

    /// Bind a statement, escalating to a bulk or batch portal when needed.
    ///
    /// On error the portal is left unmodified.
    ///
    /// Binding a portal that already completed a sync starts a new cycle, the
    /// previous cycle is closed.
    pub fn bind(&mut self, bind: Bind<A::Tree>) -> Result<()> {
        span!("bind", portal = %self.name());

        let next = match &mut *self {
            Portal::Simple(simple) if !simple.is_synced() => match simple.escalation(&bind)? {
                None => return simple.bind(bind),
                Some(Escalation::Bulk) => {
                    verbose!("escalate to bulk");
                    Portal::Bulk(BulkPortal::from_simple(simple, bind.params)?)
                },
                Some(Escalation::Batch) => {
                    verbose!("escalate to batch");
                    let entry = Bound::analyze(simple.context(), simple.transaction(), bind)?;
                    Portal::Batch(BatchPortal::from_simple(simple, entry)?)
                },
            },
            Portal::Bulk(bulk) if !bulk.is_synced() => return bulk.bind(bind),
            Portal::Batch(batch) if !batch.is_synced() => return batch.bind(bind),
            synced => {
                verbose!("new portal cycle");
                let mut simple = SimplePortal::new(synced.name().clone(), synced.context().clone());
                simple.bind(bind)?;
                synced.close();
                Portal::Simple(simple)
            },
        };

        *self = next;
        Ok(())
    }

    /// Output fields of the current statement, `None` if it produces no result set.
    pub fn describe(&self) -> Option<&[Field]> {
        match self {
            Portal::Simple(p) => p.describe(),
            Portal::Bulk(p) => p.describe(),
            Portal::Batch(p) => p.describe(),
        }
    }

    /// Attach a result sink and row cap, `0` for no cap.
    ///
    /// Nothing runs until [`sync`][Portal::sync]. Returns a read-only violation for
    /// writes in a read-only session.
    pub fn execute(&mut self, sink: Box<dyn ResultSink>, max_rows: u32) -> Result<()> {
        match self {
            Portal::Simple(p) => p.execute(sink, max_rows),
            Portal::Bulk(p) => p.execute(sink, max_rows),
            Portal::Batch(p) => p.execute(sink, max_rows),
        }
    }

    /// Run the pending execution.
    ///
    /// Planning errors are returned here, execution errors resolve the [`Completion`].
    pub fn sync<P>(&mut self, planner: &Arc<P>, job_log: &Arc<dyn JobLog>) -> Result<Completion>
    where
        P: Planner<A::Statement>,
    {
        match self {
            Portal::Simple(p) => p.sync(planner, job_log),
            Portal::Bulk(p) => p.sync(planner, job_log),
            Portal::Batch(p) => p.sync(planner, job_log),
        }
    }

    /// Release the portal, finishing a suspended execution.
    pub fn close(&mut self) {
        match self {
            Portal::Simple(p) => p.close(),
            Portal::Bulk(p) => p.close(),
            Portal::Batch(p) => p.close(),
        }
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last().map(|e| e.query.as_str())
    }

    pub fn last_statement_name(&self) -> Option<&StatementName> {
        self.last().map(|e| &e.statement_name)
    }

    pub fn last_output_types(&self) -> Option<&[Oid]> {
        self.last().and_then(|e| e.output_types.as_deref())
    }

    pub fn last_result_format_codes(&self) -> Option<&[PgFormat]> {
        self.last().and_then(|e| e.result_formats.as_deref())
    }

    pub fn is_simple(&self) -> bool {
        matches!(self, Portal::Simple(_))
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self, Portal::Bulk(_))
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Portal::Batch(_))
    }

    fn context(&self) -> &PortalContext<A> {
        match self {
            Portal::Simple(p) => p.context(),
            Portal::Bulk(p) => p.context(),
            Portal::Batch(p) => p.context(),
        }
    }

    fn last(&self) -> Option<&Bound<A>> {
        match self {
            Portal::Simple(p) => p.bound(),
            Portal::Bulk(p) => Some(p.bound()),
            Portal::Batch(p) => p.last(),
        }
    }
}

impl<A: Analyzer> std::fmt::Debug for Portal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Portal::Simple(_) => "Simple",
            Portal::Bulk(_) => "Bulk",
            Portal::Batch(_) => "Batch",
        };
        f.debug_struct("Portal")
            .field("name", self.name())
            .field("kind", &kind)
            .field("query", &self.last_query())
            .finish()
    }
}

pub(crate) enum Escalation {
    Bulk,
    Batch,
}

/// An analyzed bind.
pub(crate) struct Bound<A: Analyzer> {
    pub(crate) statement_name: StatementName,
    pub(crate) query: ByteStr,
    pub(crate) statement: Statement<A::Tree>,
    pub(crate) analysis: Analysis<A::Statement>,
    pub(crate) output_types: Option<Vec<Oid>>,
    pub(crate) params: Params,
    pub(crate) result_formats: Option<Vec<PgFormat>>,
}

impl<A: Analyzer> Bound<A> {
    pub(crate) fn analyze(
        context: &PortalContext<A>,
        transaction: &TransactionContext,
        bind: Bind<A::Tree>,
    ) -> Result<Self> {
        let analysis = context.analyzer.analyze(&bind.statement, transaction, &bind.params)?;
        let output_types = analysis.output_types();
        Ok(Self {
            statement_name: bind.statement_name,
            query: bind.query,
            statement: bind.statement,
            analysis,
            output_types,
            params: bind.params,
            result_formats: bind.result_formats,
        })
    }

    pub(crate) fn fields(&self) -> Option<&[Field]> {
        self.analysis.relation().map(|e| e.fields())
    }

    pub(crate) fn is_write_operation(&self) -> bool {
        self.analysis.statement().is_write_operation()
    }

    /// Returns a read-only violation if `self` is a write in a read-only session.
    pub(crate) fn validate_read_only(&self, config: &SessionConfig) -> Result<()> {
        match self.is_write_operation() && config.is_read_only() {
            true => Err(Error::read_only()),
            false => Ok(()),
        }
    }
}

/// One planned run of a [`Bound`] statement.
pub(crate) struct Execution<'a, A: Analyzer, P> {
    pub(crate) context: &'a PortalContext<A>,
    pub(crate) planner: &'a Arc<P>,
    pub(crate) job_log: &'a Arc<dyn JobLog>,
    pub(crate) transaction: &'a TransactionContext,
    pub(crate) bound: &'a Bound<A>,
    pub(crate) fetch_size: u32,
}

impl<A: Analyzer, P: Planner<A::Statement>> Execution<'_, A, P> {
    fn planner_context(&self, job_id: JobId) -> PlannerContext {
        PlannerContext::new(
            &**self.planner,
            job_id,
            self.transaction.clone(),
            self.context.config.default_limit(),
            self.fetch_size,
        )
    }

    /// Build the plan, a failure is logged against `job_id` before it is returned.
    pub(crate) fn plan(&self, job_id: JobId) -> Result<(P::Plan, PlannerContext)> {
        let context = self.planner_context(job_id);
        match self.planner.plan(self.bound.analysis.statement(), &context) {
            Ok(plan) => Ok((plan, context)),
            Err(err) => {
                self.job_log.log_pre_execution_failure(
                    job_id,
                    &self.bound.query,
                    &format!("{err:#}"),
                    self.context.config.user(),
                );
                Err(err)
            },
        }
    }

    /// Log the start of `job_id` and chain the completion listener, plus the retry
    /// decorator for reads, in front of `sink`.
    pub(crate) fn sink(
        &self,
        sink: Box<dyn ResultSink>,
        job_id: JobId,
        consumer: &RowConsumer,
    ) -> (Box<dyn ResultSink>, Completion) {
        self.job_log.log_execution_start(job_id, &self.bound.query, self.context.config.user());
        let (sink, completion) = CompletionSink::new(sink, job_id, Arc::clone(self.job_log));

        if self.bound.is_write_operation() {
            return (Box::new(sink), completion);
        }

        let retry = RetrySink::new(sink, job_id, self.retry(consumer));
        (Box::new(retry), completion)
    }

    /// Re-analyze, re-plan and re-execute from scratch into `consumer`.
    fn retry(&self, consumer: &RowConsumer) -> RetryFn {
        let analyzer = Arc::clone(&self.context.analyzer);
        let planner = Arc::clone(self.planner);
        let statement = self.bound.statement.clone();
        let params = self.bound.params.clone();
        let transaction = self.transaction.clone();
        let default_limit = self.context.config.default_limit();
        let fetch_size = self.fetch_size;
        let consumer = consumer.downgrade();

        Box::new(move |job_id| {
            let consumer = consumer.upgrade().ok_or_else(|| Error::closed("row consumer"))?;
            let analysis = analyzer.analyze(&statement, &transaction, &params)?;
            let context = PlannerContext::new(&*planner, job_id, transaction, default_limit, fetch_size);
            let plan = planner.plan(analysis.statement(), &context)?;
            consumer.restart()?;
            plan.execute(&context, consumer, &params);
            Ok(())
        })
    }
}
