//! The OID-facing half of the type system.
//!
//! Maps the small set of recognized PostgreSQL type OIDs to [`Datum`]
//! variants and back, decodes parameter values from their wire form, and
//! provides the type metadata carried by `RowDescription` messages.
//!
//! The OID <-> Datum mapping is many-to-one: int2/int4/int8 all decode into
//! [`Datum::Int`] and re-encode as int8, floats and text types collapse the
//! same way. Prepared statements keep the client-declared OID per position so
//! descriptions round-trip what the client asked for.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::datum::{Datum, Interval, SECONDS_IN_DAY, parse_timestamp};
use crate::protocol::error::ProtocolError;

/// PostgreSQL type OIDs recognized for parameter input, as allocated in the
/// `pg_type` catalog.
pub mod type_oid {
    pub const BOOL: i32 = 16;
    pub const BYTEA: i32 = 17;
    pub const INT8: i32 = 20;
    pub const INT2: i32 = 21;
    pub const INT4: i32 = 23;
    pub const TEXT: i32 = 25;
    pub const FLOAT4: i32 = 700;
    pub const FLOAT8: i32 = 701;
    pub const VARCHAR: i32 = 1043;
    pub const DATE: i32 = 1082;
    pub const TIMESTAMP: i32 = 1114;
    pub const TIMESTAMPTZ: i32 = 1184;
    pub const INTERVAL: i32 = 1186;
    pub const NUMERIC: i32 = 1700;
}

/// SQLSTATE codes emitted by this server.
///
/// References:
/// - <https://www.postgresql.org/docs/9.5/static/errcodes-appendix.html>
pub mod sql_state {
    /// Violation of a uniqueness constraint.
    pub const UNIQUE_VIOLATION: &str = "23505";
    /// A statement was issued inside an already-aborted transaction.
    pub const TRANSACTION_ABORTED: &str = "25P02";
    /// Internal error; also the catch-all for errors without a better code.
    pub const INTERNAL_ERROR: &str = "XX000";

    // Extensions to the standard taxonomy:

    /// The transaction entered a restartable state and should be retried.
    pub const RETRIABLE_ERROR: &str = "CR000";
    /// The transaction is awaiting an explicit COMMIT.
    pub const TRANSACTION_COMMITTED: &str = "CR001";
}

/// Format code for parameter and result values.
///
/// Clients choose a format independently per transmitted parameter and per
/// result column. Text is 0, binary is 1; all other values are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    /// Text format (0)
    #[default]
    Text = 0,
    /// Binary format (1)
    Binary = 1,
}

impl TryFrom<i16> for FormatCode {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            _ => Err(value),
        }
    }
}

impl FormatCode {
    /// Converts the FormatCode to an i16 value.
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Type metadata carried in RowDescription messages.
///
/// `size` is the declared size from the `pg_type` catalog, not the encoded
/// length of any particular value; variable-size types have size -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgType {
    pub oid: i32,
    pub size: i16,
}

/// Returns the canonical wire type for a datum.
///
/// NULL (and the non-wire variants Tuple and ValArg) report the zero type.
pub fn pg_type(d: &Datum) -> PgType {
    match d {
        Datum::Null | Datum::Tuple(_) | Datum::ValArg(_) => PgType { oid: 0, size: 0 },
        Datum::Bool(_) => PgType { oid: type_oid::BOOL, size: 1 },
        Datum::Bytes(_) => PgType { oid: type_oid::BYTEA, size: -1 },
        Datum::Int(_) => PgType { oid: type_oid::INT8, size: 8 },
        Datum::Float(_) => PgType { oid: type_oid::FLOAT8, size: 8 },
        Datum::Decimal(_) => PgType { oid: type_oid::NUMERIC, size: -1 },
        Datum::String(_) => PgType { oid: type_oid::TEXT, size: -1 },
        Datum::Date(_) => PgType { oid: type_oid::DATE, size: 8 },
        Datum::Timestamp(_) => PgType { oid: type_oid::TIMESTAMPTZ, size: 8 },
        Datum::Interval(_) => PgType { oid: type_oid::INTERVAL, size: 8 },
    }
}

/// Returns an exemplar datum for a recognized input OID, or `None` for any
/// other OID.
pub fn oid_to_datum(oid: i32) -> Option<Datum> {
    let d = match oid {
        type_oid::BOOL => Datum::Bool(false),
        type_oid::BYTEA => Datum::Bytes(Vec::new()),
        type_oid::DATE => Datum::Date(0),
        type_oid::FLOAT4 | type_oid::FLOAT8 => Datum::Float(0.0),
        type_oid::INT2 | type_oid::INT4 | type_oid::INT8 => Datum::Int(0),
        type_oid::INTERVAL => Datum::Interval(Interval::default()),
        type_oid::NUMERIC => Datum::Decimal(Decimal::ZERO),
        type_oid::TEXT | type_oid::VARCHAR => Datum::String(String::new()),
        type_oid::TIMESTAMP | type_oid::TIMESTAMPTZ => {
            Datum::Timestamp(chrono::DateTime::UNIX_EPOCH.fixed_offset())
        }
        _ => return None,
    };
    Some(d)
}

/// Returns the canonical OID for a datum's runtime kind, or `None` for kinds
/// with no wire type.
pub fn datum_to_oid(d: &Datum) -> Option<i32> {
    match d {
        Datum::Bool(_) => Some(type_oid::BOOL),
        Datum::Bytes(_) => Some(type_oid::BYTEA),
        Datum::Date(_) => Some(type_oid::DATE),
        Datum::Float(_) => Some(type_oid::FLOAT8),
        Datum::Int(_) => Some(type_oid::INT8),
        Datum::Interval(_) => Some(type_oid::INTERVAL),
        Datum::Decimal(_) => Some(type_oid::NUMERIC),
        Datum::String(_) => Some(type_oid::TEXT),
        Datum::Timestamp(_) => Some(type_oid::TIMESTAMPTZ),
        Datum::Null | Datum::Tuple(_) | Datum::ValArg(_) => None,
    }
}

/// Decodes a parameter value according to its OID and format code.
pub fn decode_oid_datum(oid: i32, code: FormatCode, b: &[u8]) -> Result<Datum, ProtocolError> {
    match oid {
        type_oid::BOOL => match code {
            FormatCode::Text => {
                let v = parse_bool(text(oid, b)?)
                    .ok_or_else(|| malformed(oid, format!("could not parse {:?} as bool", lossy(b))))?;
                Ok(Datum::Bool(v))
            }
            FormatCode::Binary => Err(ProtocolError::UnsupportedFormatCode { oid, code }),
        },

        type_oid::INT2 => match code {
            FormatCode::Text => decode_text_int(oid, b),
            FormatCode::Binary => {
                let raw: [u8; 2] = exact(oid, b)?;
                Ok(Datum::Int(i16::from_be_bytes(raw) as i64))
            }
        },

        type_oid::INT4 => match code {
            FormatCode::Text => decode_text_int(oid, b),
            FormatCode::Binary => {
                let raw: [u8; 4] = exact(oid, b)?;
                Ok(Datum::Int(i32::from_be_bytes(raw) as i64))
            }
        },

        type_oid::INT8 => match code {
            FormatCode::Text => decode_text_int(oid, b),
            FormatCode::Binary => {
                let raw: [u8; 8] = exact(oid, b)?;
                Ok(Datum::Int(i64::from_be_bytes(raw)))
            }
        },

        type_oid::FLOAT4 => match code {
            FormatCode::Text => decode_text_float(oid, b),
            FormatCode::Binary => {
                let raw: [u8; 4] = exact(oid, b)?;
                Ok(Datum::Float(f32::from_be_bytes(raw) as f64))
            }
        },

        type_oid::FLOAT8 => match code {
            FormatCode::Text => decode_text_float(oid, b),
            FormatCode::Binary => {
                let raw: [u8; 8] = exact(oid, b)?;
                Ok(Datum::Float(f64::from_be_bytes(raw)))
            }
        },

        type_oid::NUMERIC => match code {
            FormatCode::Text => {
                let v = Decimal::from_str(text(oid, b)?).map_err(|_| {
                    malformed(oid, format!("could not parse string {:?} as decimal", lossy(b)))
                })?;
                Ok(Datum::Decimal(v))
            }
            FormatCode::Binary => Err(ProtocolError::UnsupportedFormatCode { oid, code }),
        },

        type_oid::TEXT | type_oid::VARCHAR => match code {
            FormatCode::Text => Ok(Datum::String(
                String::from_utf8(b.to_vec()).map_err(ProtocolError::InvalidUtf8)?,
            )),
            FormatCode::Binary => Err(ProtocolError::UnsupportedFormatCode { oid, code }),
        },

        type_oid::BYTEA => match code {
            FormatCode::Text => {
                // Only the hex encoding is supported:
                // http://www.postgresql.org/docs/current/static/datatype-binary.html
                let Some(hex) = b.strip_prefix(b"\\x") else {
                    return Err(malformed(
                        oid,
                        format!("unsupported bytea encoding: {:?}", lossy(b)),
                    ));
                };
                let decoded = decode_hex(hex)
                    .ok_or_else(|| malformed(oid, format!("invalid hex string: {:?}", lossy(hex))))?;
                Ok(Datum::Bytes(decoded))
            }
            FormatCode::Binary => Ok(Datum::Bytes(b.to_vec())),
        },

        type_oid::TIMESTAMP | type_oid::TIMESTAMPTZ => match code {
            FormatCode::Text => {
                let ts = parse_timestamp(text(oid, b)?).ok_or_else(|| {
                    malformed(oid, format!("could not parse string {:?} as timestamp", lossy(b)))
                })?;
                Ok(Datum::Timestamp(ts))
            }
            FormatCode::Binary => Err(ProtocolError::UnsupportedFormatCode { oid, code }),
        },

        type_oid::DATE => match code {
            FormatCode::Text => {
                let ts = parse_timestamp(text(oid, b)?).ok_or_else(|| {
                    malformed(oid, format!("could not parse string {:?} as date", lossy(b)))
                })?;
                Ok(Datum::Date(ts.timestamp() / SECONDS_IN_DAY))
            }
            FormatCode::Binary => Err(ProtocolError::UnsupportedFormatCode { oid, code }),
        },

        _ => Err(ProtocolError::UnsupportedOid(oid)),
    }
}

fn decode_text_int(oid: i32, b: &[u8]) -> Result<Datum, ProtocolError> {
    let v = text(oid, b)?
        .parse::<i64>()
        .map_err(|e| malformed(oid, e.to_string()))?;
    Ok(Datum::Int(v))
}

fn decode_text_float(oid: i32, b: &[u8]) -> Result<Datum, ProtocolError> {
    let v = text(oid, b)?
        .parse::<f64>()
        .map_err(|e| malformed(oid, e.to_string()))?;
    Ok(Datum::Float(v))
}

fn text(oid: i32, b: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(b).map_err(|e| malformed(oid, format!("invalid UTF-8: {}", e)))
}

fn malformed(oid: i32, detail: String) -> ProtocolError {
    ProtocolError::MalformedDatum { oid, detail }
}

fn lossy(b: &[u8]) -> String {
    String::from_utf8_lossy(b).into_owned()
}

/// Parses the boolean literals PostgreSQL accepts over the wire.
fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn exact<const N: usize>(oid: i32, b: &[u8]) -> Result<[u8; N], ProtocolError> {
    b.try_into()
        .map_err(|_| malformed(oid, format!("expected {} bytes, got {}", N, b.len())))
}

fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}
