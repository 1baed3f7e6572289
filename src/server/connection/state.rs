use std::collections::HashMap;

use crate::datum::Datum;
use crate::executor::ResultColumn;
use crate::protocol::FormatCode;

/// Per-connection registry for the Extended Query Protocol.
///
/// Prepared statements and portals are named; the empty name `""` is a
/// scratch slot that Parse and Bind overwrite freely, while non-empty names
/// must be unique (the connection engine enforces that before inserting).
#[derive(Debug, Default)]
pub struct ConnectionState {
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a prepared statement, replacing any existing statement with
    /// the same name (and closing that statement's portals).
    pub fn put_statement(&mut self, name: String, stmt: PreparedStatement) {
        self.close_statement(&name);
        self.statements.insert(name, stmt);
    }

    pub fn get_statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    /// Closes a prepared statement. Portals bound to it are closed as well.
    /// Closing an unknown name is a no-op.
    pub fn close_statement(&mut self, name: &str) {
        if self.statements.remove(name).is_some() {
            self.portals.retain(|_, p| p.statement != name);
        }
    }

    /// Stores a portal, replacing any existing portal with the same name.
    pub fn put_portal(&mut self, name: String, portal: Portal) {
        self.portals.insert(name, portal);
    }

    pub fn get_portal(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    /// Closes a portal. Closing an unknown name is a no-op.
    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }
}

/// A SQL statement that has been parsed and analyzed: the types of its
/// arguments and result columns are known. Arguments are bound later by
/// Bind, producing a [`Portal`].
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// The statement's query text.
    pub query: String,
    /// Parameter type OIDs, one per placeholder. These preserve the OIDs
    /// the client declared (e.g. int4 rather than the canonical int8) so
    /// ParameterDescription round-trips what the client asked for.
    pub arg_types: Vec<i32>,
    /// Result columns, as reported by the executor.
    pub columns: Vec<ResultColumn>,
}

/// A prepared statement bound to concrete parameter values and output
/// formats: the executable object.
#[derive(Debug, Clone)]
pub struct Portal {
    /// Name of the source prepared statement.
    pub statement: String,
    /// Bound parameter values; NULL parameters are [`Datum::Null`].
    pub params: Vec<Datum>,
    /// Result-column format codes, one per column.
    pub result_formats: Vec<FormatCode>,
}
