//! Test utilities for wire-protocol integration tests.
//!
//! Provides a scriptable executor, a server harness, and a raw test client
//! that speaks exact protocol bytes over a `TcpStream`.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pqfront::datum::Datum;
use pqfront::executor::{Executor, MapArgs, ResultColumn, SqlError, StatementResults};
use pqfront::server::{AuthHook, Server};
use pqfront::session::Session;

/// Protocol version 3.0, as sent in a startup packet.
pub const VERSION_30: i32 = 0x0003_0000;
/// SSLRequest sentinel version code.
pub const VERSION_SSL: i32 = 0x04D2_162F;

/// An executor that replays canned responses, so tests control exactly what
/// flows back over the wire.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    /// Columns returned by `prepare`.
    pub prepare_columns: Vec<ResultColumn>,
    /// Extra inferred parameter types merged into the client's hints.
    pub prepare_args: MapArgs,
    /// Error returned by `prepare`, if any.
    pub prepare_err: Option<SqlError>,
    /// Results returned by `execute_statements`.
    pub results: StatementResults,
}

impl Executor for ScriptedExecutor {
    async fn prepare(
        &self,
        _ctx: &CancellationToken,
        _query: &str,
        mut args: MapArgs,
    ) -> Result<(Vec<ResultColumn>, MapArgs), SqlError> {
        if let Some(err) = &self.prepare_err {
            return Err(err.clone());
        }
        for (key, value) in &self.prepare_args {
            args.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok((self.prepare_columns.clone(), args))
    }

    async fn execute_statements(
        &self,
        _ctx: &CancellationToken,
        _session: &mut Session,
        _stmts: &str,
        _params: &[Datum],
    ) -> StatementResults {
        self.results.clone()
    }
}

/// A running server bound to an ephemeral port, aborted on drop.
pub struct TestServer {
    port: u16,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(executor: ScriptedExecutor) -> Self {
        Self::start_inner(executor, None).await
    }

    pub async fn start_with_auth(executor: ScriptedExecutor, hook: AuthHook) -> Self {
        Self::start_inner(executor, Some(hook)).await
    }

    async fn start_inner(executor: ScriptedExecutor, hook: Option<AuthHook>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut server = Server::new(listener, Arc::new(executor));
        if let Some(hook) = hook {
            server = server.with_auth_hook(hook);
        }
        let handle = tokio::spawn(async move {
            let _ = server.serve().await;
        });

        Self { port, handle }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.port).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A protocol client that reads and writes raw frames.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        Self { stream }
    }

    /// Sends a startup packet with the given options.
    pub async fn startup(&mut self, params: &[(&str, &str)]) {
        self.startup_with_version(VERSION_30, params).await;
    }

    pub async fn startup_with_version(&mut self, version: i32, params: &[(&str, &str)]) {
        let mut body = Vec::new();
        body.extend_from_slice(&version.to_be_bytes());
        for (key, value) in params {
            body.extend_from_slice(key.as_bytes());
            body.push(0);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0); // terminator

        let mut framed = Vec::new();
        framed.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        framed.extend_from_slice(&body);
        self.stream.write_all(&framed).await.unwrap();
    }

    /// Sends an untyped request frame carrying only a version code
    /// (SSLRequest and friends).
    pub async fn send_request_code(&mut self, code: i32) {
        let mut framed = Vec::new();
        framed.extend_from_slice(&8i32.to_be_bytes());
        framed.extend_from_slice(&code.to_be_bytes());
        self.stream.write_all(&framed).await.unwrap();
    }

    /// Sends a typed message frame.
    pub async fn send(&mut self, typ: u8, body: &[u8]) {
        let mut framed = vec![typ];
        framed.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        framed.extend_from_slice(body);
        self.stream.write_all(&framed).await.unwrap();
    }

    /// Sends raw bytes, bypassing framing (for malformed-input tests).
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Closes the write half, leaving the read half open.
    pub async fn shutdown_write(&mut self) {
        self.stream.shutdown().await.unwrap();
    }

    pub async fn read_u8(&mut self) -> u8 {
        self.stream.read_u8().await.unwrap()
    }

    /// Reads one typed server message, or `None` at end of stream.
    pub async fn try_read_message(&mut self) -> Option<(u8, Vec<u8>)> {
        let typ = match self.stream.read_u8().await {
            Ok(typ) => typ,
            Err(_) => return None,
        };
        let len = self.stream.read_i32().await.ok()?;
        let mut body = vec![0u8; (len - 4) as usize];
        self.stream.read_exact(&mut body).await.ok()?;
        Some((typ, body))
    }

    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        self.try_read_message().await.expect("connection closed")
    }

    /// Reads one message and asserts its type byte.
    pub async fn expect(&mut self, expected: u8) -> Vec<u8> {
        let (typ, body) = self.read_message().await;
        assert_eq!(
            typ as char, expected as char,
            "unexpected message type (body: {:?})",
            body
        );
        body
    }

    /// Reads a `ReadyForQuery` and asserts its transaction status byte.
    pub async fn expect_ready(&mut self, status: u8) {
        let body = self.expect(b'Z').await;
        assert_eq!(body, [status]);
    }

    /// Performs a full startup exchange: `AuthenticationOk`, the three
    /// parameter status messages, and the first `ReadyForQuery`.
    pub async fn complete_startup(&mut self) {
        self.startup(&[("user", "tester"), ("database", "testdb")])
            .await;

        let body = self.expect(b'R').await;
        assert_eq!(body, [0, 0, 0, 0], "expected AuthenticationOk");

        let mut params = Vec::new();
        for _ in 0..3 {
            let body = self.expect(b'S').await;
            let key = body.split(|&b| b == 0).next().unwrap().to_vec();
            params.push(String::from_utf8(key).unwrap());
        }
        params.sort();
        assert_eq!(params, ["client_encoding", "datestyle", "server_version"]);

        self.expect_ready(b'I').await;
    }
}

/// Appends a NUL-terminated string to a message body.
pub fn put_cstr(body: &mut Vec<u8>, s: &str) {
    body.extend_from_slice(s.as_bytes());
    body.push(0);
}

/// Builds a Parse message body.
pub fn parse_body(name: &str, query: &str, oid_hints: &[i32]) -> Vec<u8> {
    let mut body = Vec::new();
    put_cstr(&mut body, name);
    put_cstr(&mut body, query);
    body.extend_from_slice(&(oid_hints.len() as i16).to_be_bytes());
    for &oid in oid_hints {
        body.extend_from_slice(&oid.to_be_bytes());
    }
    body
}

/// Builds a Bind message body. `params` entries are `None` for NULL.
pub fn bind_body(
    portal: &str,
    statement: &str,
    param_formats: &[i16],
    params: &[Option<&[u8]>],
    result_formats: &[i16],
) -> Vec<u8> {
    let mut body = Vec::new();
    put_cstr(&mut body, portal);
    put_cstr(&mut body, statement);
    body.extend_from_slice(&(param_formats.len() as i16).to_be_bytes());
    for &code in param_formats {
        body.extend_from_slice(&code.to_be_bytes());
    }
    body.extend_from_slice(&(params.len() as i16).to_be_bytes());
    for param in params {
        match param {
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(bytes) => {
                body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                body.extend_from_slice(bytes);
            }
        }
    }
    body.extend_from_slice(&(result_formats.len() as i16).to_be_bytes());
    for &code in result_formats {
        body.extend_from_slice(&code.to_be_bytes());
    }
    body
}

/// Builds a Describe or Close message body.
pub fn target_body(typ: u8, name: &str) -> Vec<u8> {
    let mut body = vec![typ];
    put_cstr(&mut body, name);
    body
}

/// Builds an Execute message body.
pub fn execute_body(portal: &str, limit: i32) -> Vec<u8> {
    let mut body = Vec::new();
    put_cstr(&mut body, portal);
    body.extend_from_slice(&limit.to_be_bytes());
    body
}

/// Builds a simple-query message body.
pub fn query_body(query: &str) -> Vec<u8> {
    let mut body = Vec::new();
    put_cstr(&mut body, query);
    body
}
