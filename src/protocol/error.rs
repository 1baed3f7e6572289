use crate::protocol::buffer::MAX_MESSAGE_SIZE;
use crate::protocol::types::FormatCode;

/// Protocol-level errors: malformed framing, truncated payloads, and values
/// the type system cannot carry.
#[derive(Debug)]
pub enum ProtocolError {
    Io(std::io::Error),
    MessageSize(i64),
    MissingNulTerminator,
    InsufficientData { available: usize },
    InvalidUtf8(std::string::FromUtf8Error),
    UnsupportedProtocolVersion(i32),
    UnknownMessageType(u8),
    UnknownPrepareType(u8),
    InvalidFormatCode(i16),
    UnsupportedOid(i32),
    UnsupportedFormatCode { oid: i32, code: FormatCode },
    MalformedDatum { oid: i32, detail: String },
    UnencodableDatum { type_name: &'static str },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
            ProtocolError::MessageSize(size) => {
                write!(f, "message size {} out of bounds (0..{})", size, MAX_MESSAGE_SIZE)
            }
            ProtocolError::MissingNulTerminator => write!(f, "NUL terminator not found"),
            ProtocolError::InsufficientData { available } => {
                write!(f, "insufficient data: {}", available)
            }
            ProtocolError::InvalidUtf8(e) => write!(f, "invalid UTF-8: {}", e),
            ProtocolError::UnsupportedProtocolVersion(v) => {
                write!(f, "unknown protocol version {}", v)
            }
            ProtocolError::UnknownMessageType(t) => {
                write!(f, "unknown client message type: 0x{:02x}", t)
            }
            ProtocolError::UnknownPrepareType(t) => {
                write!(f, "unknown prepare type: 0x{:02x}", t)
            }
            ProtocolError::InvalidFormatCode(code) => write!(f, "invalid format code: {}", code),
            ProtocolError::UnsupportedOid(oid) => write!(f, "unsupported OID: {}", oid),
            ProtocolError::UnsupportedFormatCode { oid, code } => {
                write!(f, "unsupported format code {} for OID {}", code.as_i16(), oid)
            }
            ProtocolError::MalformedDatum { oid, detail } => {
                write!(f, "malformed value for OID {}: {}", oid, detail)
            }
            ProtocolError::UnencodableDatum { type_name } => {
                write!(f, "unsupported type {}", type_name)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Io(e)
    }
}
