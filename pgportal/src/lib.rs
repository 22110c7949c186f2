//! Postgres Extended Query Portals
//!
//! Server side execution of the extended query protocol: a [`Portal`] carries a
//! prepared statement through bind, describe, execute and sync, runs it through an
//! external [`Planner`], and delivers rows into a [`ResultSink`].
//!
//! - a row cap suspends the execution, the next sync resumes it without planning again
//! - read statements are retried once on execution failure
//! - rebinding the same statement escalates to a bulk execution, binding distinct
//!   statements before sync escalates to a batch
//!
//! # Examples
//!
//! ```
//! use pgportal::{JobsLogs, JobLog, SessionConfig};
//! use std::sync::Arc;
//!
//! let config = SessionConfig::default()
//!     .with_user("crate")
//!     .with_jobs_log_size(100);
//!
//! let jobs: Arc<dyn JobLog> = Arc::new(JobsLogs::from_config(&config));
//! # let _ = jobs;
//! ```
//!
//! Collaborators implement [`Analyzer`], [`Planner`] and [`Plan`], then a [`Session`]
//! drives portals by name:
//!
//! ```ignore
//! let mut session = Session::new(analyzer, planner, jobs, config);
//! session.bind(PortalName::unnamed(), Bind::new(sql, statement))?;
//! session.execute(&PortalName::unnamed(), Box::new(sink), 100)?;
//! for completion in session.sync() {
//!     completion?.await?;
//! }
//! ```

pub mod common;

mod error;
mod value;
mod statement;

// Collaborators
mod analyze;
mod plan;
mod job;

// Execution
mod sink;
mod consumer;
mod retry;

// Protocol
mod config;
pub mod portal;
mod session;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, Result};
pub use value::{Oid, Params, PgFormat, Row, Value};
pub use statement::{PortalName, Statement, StatementName, StatementToken};

pub use analyze::{Analysis, AnalyzedStatement, Analyzer, Field, Relation, TransactionContext};
pub use plan::{BulkFuture, Plan, Planner, PlannerContext, RoutingProvider, RowStream};
pub use job::{JobContext, JobId, JobLog, JobLogEntry, JobsLogs};

pub use sink::{Completion, ResultSink};
pub use consumer::{RowConsumer, WeakRowConsumer};

pub use config::SessionConfig;
pub use portal::{Bind, Portal, PortalContext};
pub use session::Session;
