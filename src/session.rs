//! Per-connection session state.
//!
//! A [`Session`] is created after a successful startup handshake and lives
//! until the connection ends. The protocol engine only ever reads the
//! transaction state to stamp `ReadyForQuery` messages; advancing it is the
//! executor's job.

use tracing::warn;

use crate::protocol::{ProtocolError, ReadBuffer};

/// Connection parameters from the client's startup packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionArgs {
    pub database: String,
    pub user: String,
    pub client_encoding: String,
    pub date_style: String,
}

impl ConnectionArgs {
    /// Parses the startup options block: a sequence of NUL-terminated
    /// key/value pairs terminated by an empty key. Unrecognized keys are
    /// logged and discarded.
    pub fn parse(buf: &mut ReadBuffer) -> Result<Self, ProtocolError> {
        let mut args = ConnectionArgs::default();
        loop {
            let key = buf.get_string()?;
            if key.is_empty() {
                break;
            }
            let value = buf.get_string()?;
            match key.as_str() {
                "database" => args.database = value,
                "user" => args.user = value,
                "client_encoding" => args.client_encoding = value,
                "datestyle" => args.date_style = value,
                _ => warn!(%key, "unrecognized connection parameter"),
            }
        }
        Ok(args)
    }
}

/// Transaction state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    /// Not inside a transaction block.
    #[default]
    Idle,
    /// Inside a transaction block.
    Open,
    /// Inside a failed transaction block; statements are rejected until
    /// the block ends.
    Aborted,
}

impl TxnState {
    /// Returns the status byte carried by `ReadyForQuery`.
    pub fn status_byte(self) -> u8 {
        match self {
            TxnState::Idle => b'I',
            TxnState::Open => b'T',
            TxnState::Aborted => b'E',
        }
    }
}

/// The state of a single SQL client connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub database: String,
    pub user: String,
    pub txn_state: TxnState,
}

impl Session {
    /// Creates a session from parsed startup options.
    pub fn new(args: ConnectionArgs) -> Self {
        Self {
            database: args.database,
            user: args.user,
            txn_state: TxnState::Idle,
        }
    }
}
