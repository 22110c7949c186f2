//! The [`Planner`] and [`Plan`] traits.
use futures_core::Stream;
use std::{pin::Pin, sync::Arc};

use crate::{
    Result,
    analyze::TransactionContext,
    common::ByteStr,
    consumer::RowConsumer,
    job::JobId,
    sink::RowCountSink,
    value::{Params, Row},
};

/// Rows produced by a plan execution.
///
/// Dropping the stream releases the execution.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row>> + Send>>;

/// Row counts of a bulk execution, one per parameter row in bind order.
pub type BulkFuture = Pin<Box<dyn Future<Output = Vec<Result<u64>>> + Send>>;

/// Turns an analyzed statement `S` into an executable [`Plan`].
pub trait Planner<S>: Send + Sync + 'static {
    /// The returned plan.
    type Plan: Plan;

    /// Build a plan.
    ///
    /// Returns [`Error::planning`][crate::Error::planning] if the statement cannot be
    /// planned.
    fn plan(&self, statement: &S, context: &PlannerContext) -> Result<Self::Plan>;

    /// Node attributes used to spread reads across replicas.
    fn awareness_attributes(&self) -> Vec<ByteStr> {
        Vec::new()
    }
}

/// An executable plan.
pub trait Plan: Send + 'static {
    /// Start execution.
    ///
    /// Implementor must eventually hand its output to `consumer` with
    /// [`RowConsumer::accept`] or report [`RowConsumer::accept_failure`], this may happen
    /// after `execute` returns.
    fn execute(&self, context: &PlannerContext, consumer: RowConsumer, params: &Params);

    /// Execute once for every parameter row.
    ///
    /// The default implementation runs [`execute`][Plan::execute] for each parameter
    /// row concurrently and collects the row counts.
    fn execute_bulk(&self, context: &PlannerContext, bulk_params: &[Params]) -> BulkFuture {
        let mut counts = Vec::with_capacity(bulk_params.len());

        for params in bulk_params {
            let (sink, recv) = RowCountSink::new();
            let consumer = RowConsumer::new();
            consumer.set_sink(Box::new(sink), 0);
            self.execute(context, consumer, params);
            counts.push(recv);
        }

        Box::pin(async move {
            let mut output = Vec::with_capacity(counts.len());
            for recv in counts {
                output.push(match recv.await {
                    Ok(result) => result,
                    Err(_) => Err(crate::Error::closed("bulk execution")),
                });
            }
            output
        })
    }
}

/// Randomized placement of one execution.
#[derive(Clone, Debug)]
pub struct RoutingProvider {
    seed: i32,
    awareness_attributes: Arc<[ByteStr]>,
}

impl RoutingProvider {
    /// Provider with a random seed.
    pub fn random(awareness_attributes: Vec<ByteStr>) -> Self {
        Self { seed: rand::random(), awareness_attributes: awareness_attributes.into() }
    }

    /// Seed used to pick shard copies.
    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn awareness_attributes(&self) -> &[ByteStr] {
        &self.awareness_attributes
    }
}

/// Everything a [`Planner`] and [`Plan`] need from the portal.
#[derive(Clone, Debug)]
pub struct PlannerContext {
    job_id: JobId,
    routing: RoutingProvider,
    transaction: TransactionContext,
    default_limit: u32,
    fetch_size: u32,
}

impl PlannerContext {
    /// Context for a new job, with a fresh routing seed.
    pub(crate) fn new<S, P: Planner<S> + ?Sized>(
        planner: &P,
        job_id: JobId,
        transaction: TransactionContext,
        default_limit: u32,
        fetch_size: u32,
    ) -> Self {
        Self {
            job_id,
            routing: RoutingProvider::random(planner.awareness_attributes()),
            transaction,
            default_limit,
            fetch_size,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn routing(&self) -> &RoutingProvider {
        &self.routing
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    /// Session default limit, `0` for none.
    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Requested rows per round, `0` for all.
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }
}
