//! PostgreSQL wire protocol, server side.
//!
//! This module implements the framing and typed value encoding of the
//! PostgreSQL v3.0 frontend/backend protocol, enabling communication with
//! standard PostgreSQL clients like `psql` and `libpq`.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                              +-----------+
//! |  Client  |  -- ReadBuffer::read_* -->   |  Server   |
//! |  (psql)  |  <-- WriteBuffer::finish --  | (pqfront) |
//! +----------+                              +-----------+
//! ```
//!
//! ## Terminology
//!
//! - **ReadBuffer / WriteBuffer**: length-prefixed message framing over a
//!   reusable buffer
//! - **Datum decoding**: OID + format code -> [`Datum`](crate::datum::Datum)
//! - **Format code**: 0 for text, 1 for binary, chosen per value

pub mod buffer;
pub mod error;
pub mod message;
pub mod types;

pub use buffer::{MAX_MESSAGE_SIZE, ReadBuffer, WriteBuffer};
pub use error::ProtocolError;
pub use message::{ClientMessageType, PrepareType, ServerMessageType};
pub use types::{
    FormatCode, PgType, datum_to_oid, decode_oid_datum, oid_to_datum, pg_type, sql_state, type_oid,
};
