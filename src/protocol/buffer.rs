//! Length-prefixed message framing.
//!
//! Every protocol message after the startup packet has the layout
//! `[type: u8][len: u32 big-endian][body]`, where `len` counts itself and the
//! body but not the type byte. [`ReadBuffer`] reads one incoming message into
//! a reusable buffer and hands out typed fields from it; [`WriteBuffer`]
//! stages one outgoing message and back-patches the length on completion, so
//! neither side allocates per message.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::datum::{Datum, SECONDS_IN_DAY, format_float, format_timestamp};
use crate::protocol::error::ProtocolError;
use crate::protocol::message::{PrepareType, ServerMessageType};

/// Maximum message size in bytes (16 MB).
/// PostgreSQL itself allows up to 1 GB; anything larger than this is treated
/// as a framing error.
pub const MAX_MESSAGE_SIZE: usize = 1 << 24;

/// A reusable buffer holding the body of the most recently read message.
///
/// The `get_*` methods consume the buffer front to back; reading past the end
/// of the message is a [`ProtocolError`], not a blocking read.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    msg: BytesMut,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, size: usize) {
        self.msg.clear();
        self.msg.resize(size, 0);
    }

    /// Reads a length-prefixed message without a type byte. Only the startup
    /// packet uses this framing; [`read_typed_msg`](Self::read_typed_msg) is
    /// used at all other times. Returns the total number of bytes read.
    pub async fn read_untyped_msg<R: AsyncRead + Unpin>(
        &mut self,
        rd: &mut R,
    ) -> Result<usize, ProtocolError> {
        let mut prefix = [0u8; 4];
        rd.read_exact(&mut prefix).await?;
        // The length includes itself.
        let size = i64::from(i32::from_be_bytes(prefix)) - 4;
        if !(0..=MAX_MESSAGE_SIZE as i64).contains(&size) {
            return Err(ProtocolError::MessageSize(size));
        }

        self.reset(size as usize);
        rd.read_exact(&mut self.msg).await?;
        Ok(size as usize + 4)
    }

    /// Reads a typed message, returning its type byte and total size.
    ///
    /// Returns `None` if the peer closed the connection cleanly between
    /// messages; end-of-stream anywhere else is an I/O error.
    pub async fn read_typed_msg<R: AsyncRead + Unpin>(
        &mut self,
        rd: &mut R,
    ) -> Result<Option<(u8, usize)>, ProtocolError> {
        let typ = match rd.read_u8().await {
            Ok(typ) => typ,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let n = self.read_untyped_msg(rd).await?;
        Ok(Some((typ, n + 1)))
    }

    /// Reads a NUL-terminated string from the message body.
    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let Some(pos) = self.msg.iter().position(|&b| b == 0) else {
            return Err(ProtocolError::MissingNulTerminator);
        };
        let bytes = self.msg.split_to(pos);
        self.msg.advance(1);
        String::from_utf8(bytes.to_vec()).map_err(ProtocolError::InvalidUtf8)
    }

    /// Reads the one-byte Describe/Close target selector.
    pub fn get_prepare_type(&mut self) -> Result<PrepareType, ProtocolError> {
        let b = self.get_bytes(1)?;
        PrepareType::try_from(b[0]).map_err(ProtocolError::UnknownPrepareType)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<BytesMut, ProtocolError> {
        if self.msg.len() < n {
            return Err(ProtocolError::InsufficientData { available: self.msg.len() });
        }
        Ok(self.msg.split_to(n))
    }

    pub fn get_int16(&mut self) -> Result<i16, ProtocolError> {
        if self.msg.len() < 2 {
            return Err(ProtocolError::InsufficientData { available: self.msg.len() });
        }
        Ok(self.msg.get_i16())
    }

    pub fn get_int32(&mut self) -> Result<i32, ProtocolError> {
        if self.msg.len() < 4 {
            return Err(ProtocolError::InsufficientData { available: self.msg.len() });
        }
        Ok(self.msg.get_i32())
    }
}

/// Staging buffer for a single outgoing message.
///
/// [`init_msg`](Self::init_msg) writes the type byte and a length
/// placeholder; [`finish_msg`](Self::finish_msg) back-patches the length and
/// hands the frame to the (buffered) stream.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: BytesMut,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new message, discarding any partially staged one.
    pub fn init_msg(&mut self, typ: ServerMessageType) {
        self.buf.clear();
        self.buf.put_u8(typ.as_u8());
        self.buf.put_i32(0); // length placeholder
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    /// Writes a NUL-terminated string.
    pub fn write_string(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
    }

    pub fn put_int16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    pub fn put_int32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn put_int64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    /// Back-patches the length field and writes the frame out.
    ///
    /// The type byte does not count toward the message length.
    pub async fn finish_msg<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut W,
    ) -> Result<(), std::io::Error> {
        debug_assert!(self.buf.len() >= 5, "finish_msg without init_msg");
        let len = (self.buf.len() - 1) as i32;
        self.buf[1..5].copy_from_slice(&len.to_be_bytes());
        let result = w.write_all(&self.buf).await;
        self.buf.clear();
        result
    }

    /// Stages a complete ErrorResponse body with the severity, code, and
    /// message fields.
    pub fn init_error_response(&mut self, code: &str, message: &str) {
        self.init_msg(ServerMessageType::ErrorResponse);
        self.write_byte(b'S');
        self.write_string("ERROR");
        self.write_byte(b'C');
        self.write_string(code);
        self.write_byte(b'M');
        self.write_string(message);
        self.write_byte(0); // field list terminator
    }

    /// Writes a datum in text format, preceded by a 4-byte length.
    /// NULL is encoded as length -1 with no bytes following.
    pub fn write_text_datum(&mut self, d: &Datum) -> Result<(), ProtocolError> {
        match d {
            Datum::Null => self.put_int32(-1),
            Datum::Bool(v) => {
                self.put_int32(1);
                self.write_byte(if *v { b't' } else { b'f' });
            }
            Datum::Int(v) => self.put_length_prefixed(v.to_string().as_bytes()),
            Datum::Float(v) => self.put_length_prefixed(format_float(*v).as_bytes()),
            Datum::Decimal(v) => self.put_length_prefixed(v.to_string().as_bytes()),
            Datum::Bytes(v) => {
                let mut out = String::with_capacity(2 + v.len() * 2);
                out.push_str("\\x");
                for byte in v {
                    out.push_str(&format!("{:02x}", byte));
                }
                self.put_length_prefixed(out.as_bytes());
            }
            Datum::String(v) => self.put_length_prefixed(v.as_bytes()),
            Datum::Date(days) => {
                let secs = days.checked_mul(SECONDS_IN_DAY).ok_or(
                    ProtocolError::UnencodableDatum { type_name: "date" },
                )?;
                let t = DateTime::from_timestamp(secs, 0)
                    .ok_or(ProtocolError::UnencodableDatum { type_name: "date" })?;
                self.put_length_prefixed(format_timestamp(&t.fixed_offset()).as_bytes());
            }
            Datum::Timestamp(t) => {
                let t = t.with_timezone(&Utc).fixed_offset();
                self.put_length_prefixed(format_timestamp(&t).as_bytes());
            }
            Datum::Interval(v) => self.put_length_prefixed(v.to_string().as_bytes()),
            Datum::Tuple(_) | Datum::ValArg(_) => {
                return Err(ProtocolError::UnencodableDatum { type_name: d.type_name() });
            }
        }
        Ok(())
    }

    /// Writes a datum in binary format. Only int8 and bytea have binary
    /// encodings; NULL is length -1 as in text format.
    pub fn write_binary_datum(&mut self, d: &Datum) -> Result<(), ProtocolError> {
        match d {
            Datum::Null => self.put_int32(-1),
            Datum::Int(v) => {
                self.put_int32(8);
                self.put_int64(*v);
            }
            Datum::Bytes(v) => self.put_length_prefixed(v),
            _ => {
                return Err(ProtocolError::UnencodableDatum { type_name: d.type_name() });
            }
        }
        Ok(())
    }

    fn put_length_prefixed(&mut self, bytes: &[u8]) {
        self.put_int32(bytes.len() as i32);
        self.write(bytes);
    }

    #[cfg(test)]
    fn staged(&self) -> &[u8] {
        &self.buf
    }
}
