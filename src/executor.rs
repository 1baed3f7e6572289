//! The query execution contract.
//!
//! The protocol engine is only concerned with framing, typed encoding, and
//! session bookkeeping; everything that understands SQL sits behind the
//! [`Executor`] trait. One executor is shared by every connection, so
//! implementations must be safe for concurrent use.

use std::collections::HashMap;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::datum::Datum;
use crate::protocol::sql_state;
use crate::session::Session;

pub mod noop;

/// Inferred parameter types, keyed by 1-indexed parameter position rendered
/// as a string (`"1"`, `"2"`, ...). Values are exemplar datums indicating the
/// inferred kind.
pub type MapArgs = HashMap<String, Datum>;

/// An error carrying a SQLSTATE code, surfaced to the client as an
/// `ErrorResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// SQLSTATE code (see [`sql_state`]).
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl SqlError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// An internal error (`XX000`), the catch-all code.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(sql_state::INTERNAL_ERROR, message)
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SqlError {}

/// The category of a statement's result, which dictates the reply shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementKind {
    /// No meaningful return (SET, BEGIN, COMMIT, ...): bare CommandComplete.
    #[default]
    Ack,
    /// Schema change: bare CommandComplete.
    Ddl,
    /// DML reporting a row count: CommandComplete with the count appended.
    RowsAffected,
    /// A result set: RowDescription / DataRow stream, then CommandComplete.
    Rows,
}

/// The name and type of one result-set column.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    pub name: String,
    /// Exemplar datum indicating the column's type.
    pub typ: Datum,
}

impl ResultColumn {
    pub fn new(name: impl Into<String>, typ: Datum) -> Self {
        Self { name: name.into(), typ }
    }
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub values: Vec<Datum>,
}

/// The outcome of executing a single SQL statement.
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    /// Set when the statement failed; the other fields are then ignored.
    pub err: Option<SqlError>,
    pub kind: StatementKind,
    /// The command tag, e.g. `SELECT` or `INSERT`.
    pub pg_tag: String,
    /// Populated when `kind` is `RowsAffected`.
    pub rows_affected: u64,
    /// Populated when `kind` is `Rows`.
    pub columns: Vec<ResultColumn>,
    /// Populated when `kind` is `Rows`.
    pub rows: Vec<ResultRow>,
}

impl StatementResult {
    pub fn ack(tag: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Ack,
            pg_tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn ddl(tag: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Ddl,
            pg_tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn rows_affected(tag: impl Into<String>, count: u64) -> Self {
        Self {
            kind: StatementKind::RowsAffected,
            pg_tag: tag.into(),
            rows_affected: count,
            ..Default::default()
        }
    }

    pub fn rows(
        tag: impl Into<String>,
        columns: Vec<ResultColumn>,
        rows: Vec<ResultRow>,
    ) -> Self {
        Self {
            kind: StatementKind::Rows,
            pg_tag: tag.into(),
            columns,
            rows,
            ..Default::default()
        }
    }

    pub fn error(err: SqlError) -> Self {
        Self {
            err: Some(err),
            ..Default::default()
        }
    }
}

/// Results from running a batch of SQL statements: one [`StatementResult`]
/// per statement, plus batch-level metadata.
#[derive(Debug, Clone, Default)]
pub struct StatementResults {
    pub results: Vec<StatementResult>,
    /// True when the request contained zero non-empty statements after
    /// parsing; the server then replies `EmptyQueryResponse`.
    pub empty: bool,
}

/// Executes SQL statements on behalf of the protocol engine.
///
/// A single executor instance is shared across all connections and must be
/// safe for concurrent use. The cancellation token is the connection's; it is
/// cancelled when the connection is dropped, and implementations should abort
/// in-flight work when it fires.
pub trait Executor: Send + Sync + 'static {
    /// Parses and analyzes `query`, returning its result columns and the
    /// parameter types it expects.
    ///
    /// `args` holds the type hints the client supplied; the returned map may
    /// add entries for positions the client did not hint.
    fn prepare(
        &self,
        ctx: &CancellationToken,
        query: &str,
        args: MapArgs,
    ) -> impl Future<Output = Result<(Vec<ResultColumn>, MapArgs), SqlError>> + Send;

    /// Executes the statements in `stmts` with the given bound parameters.
    ///
    /// The executor is responsible for advancing `session.txn_state`; the
    /// protocol engine only reads it.
    fn execute_statements(
        &self,
        ctx: &CancellationToken,
        session: &mut Session,
        stmts: &str,
        params: &[Datum],
    ) -> impl Future<Output = StatementResults> + Send;
}
