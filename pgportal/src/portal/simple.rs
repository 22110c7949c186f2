use std::sync::Arc;

use super::{Bind, Bound, Escalation, Execution, PortalContext};
use crate::{
    Error, Result,
    analyze::{Analyzer, Field, TransactionContext},
    common::{span, verbose},
    consumer::RowConsumer,
    job::{JobId, JobLog},
    plan::{Plan, Planner},
    sink::{Completion, ResultSink},
    statement::PortalName,
};

/// Portal executing a single bound statement.
///
/// A sync while the previous execution is still live, suspended or still producing,
/// resumes it instead of planning again.
/// Dropping the portal closes it.
pub struct SimplePortal<A: Analyzer> {
    name: PortalName,
    context: PortalContext<A>,
    transaction: TransactionContext,
    bound: Option<Bound<A>>,
    sink: Option<Box<dyn ResultSink>>,
    max_rows: u32,
    consumer: Option<RowConsumer>,
    synced: bool,
}

/// State of a simple portal handed over on escalation.
pub(crate) struct Escalated<A: Analyzer> {
    pub(crate) name: PortalName,
    pub(crate) context: PortalContext<A>,
    pub(crate) transaction: TransactionContext,
    pub(crate) bound: Bound<A>,
    pub(crate) sink: Option<Box<dyn ResultSink>>,
}

impl<A: Analyzer> SimplePortal<A> {
    pub(crate) fn new(name: PortalName, context: PortalContext<A>) -> Self {
        Self {
            transaction: TransactionContext::new(context.config()),
            name,
            context,
            bound: None,
            sink: None,
            max_rows: 0,
            consumer: None,
            synced: false,
        }
    }

    pub fn name(&self) -> &PortalName {
        &self.name
    }

    pub(crate) fn context(&self) -> &PortalContext<A> {
        &self.context
    }

    pub(crate) fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub(crate) fn bound(&self) -> Option<&Bound<A>> {
        self.bound.as_ref()
    }

    /// Returns `true` once a sync ran.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Returns `true` if the row cap of the last sync was reached before the output
    /// was exhausted.
    pub fn is_suspended(&self) -> bool {
        self.consumer.as_ref().is_some_and(RowConsumer::is_suspended)
    }

    /// How `bind` must be handled by an escalated portal, `None` if this portal
    /// handles it.
    pub(crate) fn escalation(&self, bind: &Bind<A::Tree>) -> Result<Option<Escalation>> {
        let Some(bound) = &self.bound else {
            return Ok(None);
        };
        if self.context.config().is_read_only() {
            return Err(Error::read_only());
        }
        match bound.statement == bind.statement {
            true => Ok(Some(Escalation::Bulk)),
            false => Ok(Some(Escalation::Batch)),
        }
    }

    /// Move the bound statement and attached sink out, leaving an empty portal.
    pub(crate) fn escalate(&mut self) -> Option<Escalated<A>> {
        let bound = self.bound.take()?;
        Some(Escalated {
            name: self.name.clone(),
            context: self.context.clone(),
            transaction: self.transaction.clone(),
            bound,
            sink: self.sink.take(),
        })
    }

    pub(crate) fn bind(&mut self, bind: Bind<A::Tree>) -> Result<()> {
        let transaction = TransactionContext::new(self.context.config());
        let bound = Bound::analyze(&self.context, &transaction, bind)?;
        verbose!(portal = %self.name, query = %bound.query, "bound");
        self.transaction = transaction;
        self.bound = Some(bound);
        Ok(())
    }

    pub(crate) fn describe(&self) -> Option<&[Field]> {
        self.bound.as_ref().and_then(Bound::fields)
    }

    pub(crate) fn execute(&mut self, sink: Box<dyn ResultSink>, max_rows: u32) -> Result<()> {
        let Some(bound) = &self.bound else {
            return Err(Error::protocol("execute before bind"));
        };
        bound.validate_read_only(self.context.config())?;
        self.sink = Some(sink);
        self.max_rows = max_rows;
        Ok(())
    }

    pub(crate) fn sync<P>(&mut self, planner: &Arc<P>, job_log: &Arc<dyn JobLog>) -> Result<Completion>
    where
        P: Planner<A::Statement>,
    {
        span!("sync", portal = %self.name);

        let Some(bound) = &self.bound else {
            return Ok(Completion::ready(Ok(())));
        };
        let Some(sink) = self.sink.take() else {
            self.synced = true;
            return Ok(Completion::ready(Ok(())));
        };

        let execution = Execution {
            context: &self.context,
            planner,
            job_log,
            transaction: &self.transaction,
            bound,
            fetch_size: self.max_rows,
        };
        let job_id = JobId::new();

        let resume = self.consumer.clone().filter(RowConsumer::is_live);
        let plan = match resume {
            Some(_) => None,
            None => match execution.plan(job_id) {
                Ok(plan) => Some(plan),
                Err(err) => {
                    self.sink = Some(sink);
                    return Err(err);
                },
            },
        };

        let consumer = resume.unwrap_or_default();
        let (sink, completion) = execution.sink(sink, job_id, &consumer);

        match plan {
            None => {
                verbose!(%job_id, max_rows = self.max_rows, "resume live execution");
                consumer.resume_with(sink, self.max_rows);
            },
            Some((plan, context)) => {
                verbose!(%job_id, max_rows = self.max_rows, "execute");
                consumer.set_sink(sink, self.max_rows);
                plan.execute(&context, consumer.clone(), &bound.params);
                if let Some(previous) = self.consumer.replace(consumer) {
                    previous.close_and_finish_if_suspended();
                }
            },
        }

        self.synced = true;
        Ok(completion)
    }

    pub(crate) fn close(&mut self) {
        if let Some(consumer) = &self.consumer {
            verbose!(portal = %self.name, "close");
            consumer.close_and_finish_if_suspended();
        }
    }
}

impl<A: Analyzer> Drop for SimplePortal<A> {
    fn drop(&mut self) {
        self.close();
    }
}
