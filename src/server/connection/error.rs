use crate::executor::SqlError;
use crate::protocol::{ProtocolError, sql_state};

/// Connection error types.
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    Sql(SqlError),
    AuthenticationFailed(String),
}

impl ConnectionError {
    /// Whether the connection can continue after reporting this error to the
    /// client. Stream failures cannot be reported over the stream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Protocol(ProtocolError::Io(_))
                | ConnectionError::AuthenticationFailed(_)
        )
    }

    /// The SQLSTATE code sent in the `ErrorResponse` for this error.
    pub fn sql_state(&self) -> &str {
        match self {
            ConnectionError::Sql(e) => &e.code,
            _ => sql_state::INTERNAL_ERROR,
        }
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "I/O error: {}", e),
            ConnectionError::Protocol(e) => write!(f, "{}", e),
            ConnectionError::Sql(e) => write!(f, "{}", e),
            ConnectionError::AuthenticationFailed(reason) => {
                write!(f, "authentication failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        ConnectionError::Protocol(e)
    }
}

impl From<SqlError> for ConnectionError {
    fn from(e: SqlError) -> Self {
        ConnectionError::Sql(e)
    }
}
