//! The [`Analyzer`] trait and its output.
use std::{sync::Arc, time::SystemTime};

use crate::{
    Result,
    common::ByteStr,
    config::SessionConfig,
    statement::Statement,
    value::{Oid, Params},
};

/// Semantic analysis of parsed statements.
///
/// Implemented by the session layer, portals only call it.
pub trait Analyzer: Send + Sync + 'static {
    /// The parser's syntax tree.
    type Tree: Send + Sync + 'static;

    /// The analyzed statement handed to the [`Planner`][crate::Planner].
    type Statement: AnalyzedStatement;

    /// Analyze `statement` with bound `params`.
    ///
    /// Returns [`Error::analysis`][crate::Error::analysis] for malformed or ill-typed
    /// statements.
    fn analyze(
        &self,
        statement: &Statement<Self::Tree>,
        transaction: &TransactionContext,
        params: &Params,
    ) -> Result<Analysis<Self::Statement>>;
}

/// An analyzed statement.
pub trait AnalyzedStatement: Send + Sync + 'static {
    /// Returns `true` if executing the statement has side effects.
    ///
    /// Writes are never retried and are rejected in read-only sessions.
    fn is_write_operation(&self) -> bool;
}

/// Result of semantic analysis.
pub struct Analysis<S> {
    statement: Arc<S>,
    relation: Option<Relation>,
}

impl<S> Analysis<S> {
    /// Analysis of a statement that produces no result set.
    pub fn new(statement: S) -> Self {
        Self { statement: Arc::new(statement), relation: None }
    }

    /// Analysis of a statement producing `relation`.
    pub fn with_relation(statement: S, relation: Relation) -> Self {
        Self { statement: Arc::new(statement), relation: Some(relation) }
    }

    pub fn statement(&self) -> &S {
        &self.statement
    }

    /// The root relation, `None` for statements without result set.
    pub fn relation(&self) -> Option<&Relation> {
        self.relation.as_ref()
    }

    /// Value types of the root relation output.
    pub fn output_types(&self) -> Option<Vec<Oid>> {
        self.relation.as_ref().map(|e| e.fields.iter().map(Field::oid).collect())
    }
}

impl<S: AnalyzedStatement> Analysis<S> {
    pub fn is_write_operation(&self) -> bool {
        self.statement.is_write_operation()
    }
}

impl<S> Clone for Analysis<S> {
    fn clone(&self) -> Self {
        Self { statement: Arc::clone(&self.statement), relation: self.relation.clone() }
    }
}

impl<S> std::fmt::Debug for Analysis<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analysis").field("relation", &self.relation).finish_non_exhaustive()
    }
}

/// Output shape of an analyzed statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relation {
    fields: Vec<Field>,
}

impl Relation {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

impl FromIterator<Field> for Relation {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self { fields: iter.into_iter().collect() }
    }
}

/// An output column.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: ByteStr,
    oid: Oid,
}

impl Field {
    pub fn new(name: impl Into<ByteStr>, oid: Oid) -> Self {
        Self { name: name.into(), oid }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }
}

/// Per statement cycle session state.
///
/// Created on the first bind of a portal cycle and reused by retries, so a
/// retried statement observes the same timestamp.
#[derive(Clone, Debug)]
pub struct TransactionContext {
    user: ByteStr,
    statement_time: SystemTime,
}

impl TransactionContext {
    pub(crate) fn new(config: &SessionConfig) -> Self {
        Self { user: config.user.clone(), statement_time: SystemTime::now() }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// `CURRENT_TIMESTAMP` of the statement.
    pub fn statement_time(&self) -> SystemTime {
        self.statement_time
    }
}
