//! Connection startup: version negotiation, options, authentication.
//!
//! The startup packet is the only untyped message in the protocol. Its first
//! four payload bytes carry a version code which is either the protocol
//! version proper or one of the request sentinels (SSL). SSL requests are
//! answered with a single `N` and the client is expected to retry with a
//! plain startup packet.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::{ProtocolError, ReadBuffer, ServerMessageType, WriteBuffer};
use crate::server::connection::ConnectionError;
use crate::session::{ConnectionArgs, Session};

/// Protocol version 3.0.
pub const VERSION_30: i32 = 0x0003_0000;
/// SSLRequest sentinel version code.
pub const VERSION_SSL: i32 = 0x04D2_162F;
/// Version code used by cluster-internal (QE) connections; treated as 3.0.
pub const VERSION_QE: i32 = 0x7003_0000;

const SSL_UNSUPPORTED: &[u8] = b"N";

/// Parameter status reported to every client after authentication.
const SERVER_PARAMETERS: [(&str, &str); 3] = [
    ("client_encoding", "UTF8"),
    ("datestyle", "ISO"),
    ("server_version", "9.5.0"),
];

/// Optional credential check invoked during startup, given the session user.
/// A rejection is reported to the client and closes the connection.
pub type AuthHook = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

/// Reads one startup message and reports whether it looks like a PostgreSQL
/// client: either a protocol 3.0 startup packet or an SSLRequest.
///
/// Useful for port multiplexers that route several protocols through one
/// listener; the consumed bytes are not pushed back.
pub async fn is_postgres_startup<R: AsyncRead + Unpin>(rd: &mut R) -> bool {
    let mut buf = ReadBuffer::new();
    if buf.read_untyped_msg(rd).await.is_err() {
        return false;
    }
    match buf.get_int32() {
        Ok(version) => version == VERSION_30 || version == VERSION_SSL,
        Err(_) => false,
    }
}

/// Drives the startup sequence for one freshly accepted socket.
pub struct Handshake {
    stream: BufStream<TcpStream>,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
}

/// Everything the query phase needs, handed over once startup completes.
pub struct HandshakeResult {
    pub stream: BufStream<TcpStream>,
    pub read_buf: ReadBuffer,
    pub write_buf: WriteBuffer,
    pub session: Session,
}

impl Handshake {
    pub fn new(socket: TcpStream) -> Self {
        Self {
            stream: BufStream::new(socket),
            read_buf: ReadBuffer::new(),
            write_buf: WriteBuffer::new(),
        }
    }

    /// Runs the handshake to completion: version negotiation, option
    /// parsing, the authentication hook, and the initial server messages
    /// (`AuthenticationOk` plus parameter status). The first `ReadyForQuery`
    /// is the query loop's job.
    pub async fn run(mut self, auth_hook: Option<&AuthHook>) -> Result<HandshakeResult, ConnectionError> {
        loop {
            self.read_buf.read_untyped_msg(&mut self.stream).await?;
            let version = self.read_buf.get_int32()?;
            debug!(version, "startup message");

            match version {
                VERSION_SSL => {
                    // No SSL support; the client retries in clear text.
                    self.stream.write_all(SSL_UNSUPPORTED).await?;
                    self.stream.flush().await?;
                }
                VERSION_30 | VERSION_QE => break,
                other => {
                    return Err(ProtocolError::UnsupportedProtocolVersion(other).into());
                }
            }
        }

        let args = ConnectionArgs::parse(&mut self.read_buf)?;
        let session = Session::new(args);

        if let Some(hook) = auth_hook {
            if let Err(reason) = hook(&session.user) {
                self.write_buf
                    .init_error_response(crate::protocol::sql_state::INTERNAL_ERROR, &reason);
                self.write_buf.finish_msg(&mut self.stream).await?;
                self.stream.flush().await?;
                return Err(ConnectionError::AuthenticationFailed(reason));
            }
        }

        self.send_startup_info().await?;

        Ok(HandshakeResult {
            stream: self.stream,
            read_buf: self.read_buf,
            write_buf: self.write_buf,
            session,
        })
    }

    async fn send_startup_info(&mut self) -> Result<(), ConnectionError> {
        self.write_buf.init_msg(ServerMessageType::Auth);
        self.write_buf.put_int32(0); // AuthenticationOk
        self.write_buf.finish_msg(&mut self.stream).await?;

        for (key, value) in SERVER_PARAMETERS {
            self.write_buf.init_msg(ServerMessageType::ParameterStatus);
            self.write_buf.write_string(key);
            self.write_buf.write_string(value);
            self.write_buf.finish_msg(&mut self.stream).await?;
        }

        self.stream.flush().await?;
        Ok(())
    }
}
