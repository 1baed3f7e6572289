//! The per-connection query loop.
//!
//! After the handshake, a connection alternates between two sub-protocols:
//! Simple Query (`Q`), where every request is answered and flushed
//! immediately, and Extended Query (`P`/`B`/`D`/`E`/`C`), where output is
//! buffered until an explicit `H` (Flush) or `S` (Sync). The protocol
//! mandates this asymmetry; see
//! <https://www.postgresql.org/docs/9.5/static/protocol-flow.html>.

mod error;
mod state;

pub use error::ConnectionError;
pub use state::{ConnectionState, Portal, PreparedStatement};

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::datum::Datum;
use crate::executor::{Executor, MapArgs, ResultColumn, SqlError, StatementKind, StatementResult};
use crate::protocol::{
    ClientMessageType, FormatCode, PrepareType, ProtocolError, ReadBuffer, ServerMessageType,
    WriteBuffer, datum_to_oid, decode_oid_datum, oid_to_datum, pg_type,
};
use crate::server::handshake::HandshakeResult;
use crate::session::Session;

/// Where the connection stands between the two sub-protocols.
///
/// The remaining combination (an error outside an extended exchange) does
/// not need a state: the error is reported and the loop stays in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPhase {
    /// Outside an extended-query exchange. `ReadyForQuery` is emitted and
    /// flushed before each read.
    Ready,
    /// Inside an extended-query exchange; output is buffered until Flush
    /// or Sync.
    Extended,
    /// An error aborted the extended exchange; everything but Sync is
    /// discarded.
    ExtendedFailed,
}

/// A single client connection in the query phase.
pub struct Connection<E: Executor> {
    stream: BufStream<TcpStream>,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    session: Session,
    executor: Arc<E>,
    state: ConnectionState,
    phase: QueryPhase,
    cancel: CancellationToken,
}

impl<E: Executor> Connection<E> {
    /// Creates a connection from a completed handshake.
    pub fn new(handshake: HandshakeResult, executor: Arc<E>, cancel: CancellationToken) -> Self {
        Self {
            stream: handshake.stream,
            read_buf: handshake.read_buf,
            write_buf: handshake.write_buf,
            session: handshake.session,
            executor,
            state: ConnectionState::new(),
            phase: QueryPhase::Ready,
            cancel,
        }
    }

    /// Runs the main loop until the client terminates, the stream fails, or
    /// the peer closes the connection.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        loop {
            if self.phase == QueryPhase::Ready {
                self.send_ready_for_query().await?;
            }

            let Some((typ, len)) = self.read_buf.read_typed_msg(&mut self.stream).await? else {
                return Ok(()); // peer closed between messages
            };
            trace!(typ = %(typ as char), len, "client message");

            let msg = ClientMessageType::try_from(typ);

            // After an error inside an extended exchange, everything up to
            // the next Sync is discarded without side effects.
            if self.phase == QueryPhase::ExtendedFailed && msg != Ok(ClientMessageType::Sync) {
                continue;
            }

            let outcome = match msg {
                Ok(ClientMessageType::Sync) => {
                    self.phase = QueryPhase::Ready;
                    Ok(())
                }
                Ok(ClientMessageType::SimpleQuery) | Ok(ClientMessageType::MppQuery) => {
                    self.phase = QueryPhase::Ready;
                    self.handle_simple_query().await
                }
                Ok(ClientMessageType::Terminate) => return Ok(()),
                Ok(ClientMessageType::Parse) => {
                    self.phase = QueryPhase::Extended;
                    self.handle_parse().await
                }
                Ok(ClientMessageType::Bind) => {
                    self.phase = QueryPhase::Extended;
                    self.handle_bind().await
                }
                Ok(ClientMessageType::Describe) => {
                    self.phase = QueryPhase::Extended;
                    self.handle_describe().await
                }
                Ok(ClientMessageType::Execute) => {
                    self.phase = QueryPhase::Extended;
                    self.handle_execute().await
                }
                Ok(ClientMessageType::Close) => {
                    self.phase = QueryPhase::Extended;
                    self.handle_close().await
                }
                Ok(ClientMessageType::Flush) => {
                    self.phase = QueryPhase::Extended;
                    self.stream.flush().await.map_err(ConnectionError::Io)
                }
                Err(unknown) => Err(ProtocolError::UnknownMessageType(unknown).into()),
            };

            if let Err(err) = outcome {
                if err.is_fatal() {
                    return Err(err);
                }
                debug!(error = %err, "request failed");
                self.report_error(&err).await?;
            }
        }
    }

    /// Sends `ErrorResponse` for a recoverable error and flushes it out. If
    /// the error happened inside an extended exchange, the rest of the
    /// exchange is discarded until the client syncs.
    async fn report_error(&mut self, err: &ConnectionError) -> Result<(), ConnectionError> {
        if self.phase == QueryPhase::Extended {
            self.phase = QueryPhase::ExtendedFailed;
        }
        self.write_buf
            .init_error_response(err.sql_state(), &err.to_string());
        self.write_buf.finish_msg(&mut self.stream).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn send_ready_for_query(&mut self) -> Result<(), ConnectionError> {
        self.write_buf.init_msg(ServerMessageType::Ready);
        self.write_buf.write_byte(self.session.txn_state.status_byte());
        self.write_buf.finish_msg(&mut self.stream).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn handle_simple_query(&mut self) -> Result<(), ConnectionError> {
        let query = self.read_buf.get_string()?;
        debug!(%query, "simple query");
        self.execute_statements(&query, &[], None, true, 0).await
    }

    /// Parse: register a prepared statement under a (possibly empty) name.
    ///
    /// The payload carries the statement name, the query text, and a list of
    /// parameter type OID hints. The hints are only what the frontend chose
    /// to prespecify; the executor's analysis fills in the rest.
    async fn handle_parse(&mut self) -> Result<(), ConnectionError> {
        let name = self.read_buf.get_string()?;
        if !name.is_empty() && self.state.get_statement(&name).is_some() {
            return Err(SqlError::internal(format!(
                "prepared statement {:?} already exists",
                name
            ))
            .into());
        }

        let query = self.read_buf.get_string()?;
        let num_hints = self.read_buf.get_int16()?;
        let mut hints = Vec::with_capacity(num_hints.max(0) as usize);
        for _ in 0..num_hints {
            hints.push(self.read_buf.get_int32()?);
        }
        debug!(%name, %query, ?hints, "parse");

        let mut args = MapArgs::new();
        for (i, &oid) in hints.iter().enumerate() {
            if oid == 0 {
                continue;
            }
            let exemplar = oid_to_datum(oid)
                .ok_or_else(|| SqlError::internal(format!("unknown oid type: {}", oid)))?;
            args.insert((i + 1).to_string(), exemplar);
        }

        let (columns, args) = self
            .executor
            .prepare(&self.cancel, &query, args)
            .await
            .map_err(ConnectionError::Sql)?;

        // The executor may have inferred types for positions the client did
        // not hint. OID-to-datum is not one-to-one (int4 and int8 both map
        // to Int), so positions the client covered keep the client's OID.
        let mut arg_types = hints;
        for (key, datum) in &args {
            let position: usize = key
                .parse()
                .map_err(|_| SqlError::internal(format!("non-integer parameter: {}", key)))?;
            if position == 0 {
                return Err(SqlError::internal(format!("there is no parameter ${}", key)).into());
            }
            let idx = position - 1;
            if idx >= arg_types.len() {
                arg_types.resize(idx + 1, 0);
            }
            if arg_types[idx] != 0 {
                continue;
            }
            arg_types[idx] = datum_to_oid(datum).ok_or_else(|| {
                SqlError::internal(format!("unknown datum type: {}", datum.type_name()))
            })?;
        }

        for (i, &oid) in arg_types.iter().enumerate() {
            if oid == 0 {
                return Err(SqlError::internal(format!(
                    "could not determine data type of parameter ${}",
                    i + 1
                ))
                .into());
            }
        }

        self.state
            .put_statement(name, PreparedStatement { query, arg_types, columns });

        self.write_buf.init_msg(ServerMessageType::ParseComplete);
        self.write_buf.finish_msg(&mut self.stream).await?;
        Ok(())
    }

    /// Bind: create a portal from a prepared statement plus parameter values
    /// and result format codes.
    async fn handle_bind(&mut self) -> Result<(), ConnectionError> {
        let portal_name = self.read_buf.get_string()?;
        if !portal_name.is_empty() && self.state.get_portal(&portal_name).is_some() {
            return Err(
                SqlError::internal(format!("portal {:?} already exists", portal_name)).into(),
            );
        }

        let statement_name = self.read_buf.get_string()?;
        let stmt = self
            .state
            .get_statement(&statement_name)
            .cloned()
            .ok_or_else(|| {
                SqlError::internal(format!("unknown prepared statement {:?}", statement_name))
            })?;
        debug!(portal = %portal_name, statement = %statement_name, "bind");

        let num_params = stmt.arg_types.len();

        // The number of parameter format codes can be zero (all text), one
        // (applied to every parameter), or exactly the parameter count.
        // http://www.postgresql.org/docs/current/static/protocol-message-formats.html
        let num_format_codes = self.read_buf.get_int16()?;
        let param_formats = match num_format_codes {
            0 => vec![FormatCode::Text; num_params],
            1 => {
                let code = self.get_format_code()?;
                vec![code; num_params]
            }
            n if n as usize == num_params => {
                let mut codes = Vec::with_capacity(num_params);
                for _ in 0..num_params {
                    codes.push(self.get_format_code()?);
                }
                codes
            }
            n => {
                return Err(SqlError::internal(format!(
                    "wrong number of format codes specified: {} for {} parameters",
                    n, num_params
                ))
                .into());
            }
        };

        let num_values = self.read_buf.get_int16()?;
        if num_values as usize != num_params {
            return Err(SqlError::internal(format!(
                "expected {} parameters, got {}",
                num_params, num_values
            ))
            .into());
        }

        let mut params = vec![Datum::Null; num_params];
        for (i, param) in params.iter_mut().enumerate() {
            let len = self.read_buf.get_int32()?;
            if len == -1 {
                continue; // NULL
            }
            let bytes = self.read_buf.get_bytes(len as usize)?;
            *param = decode_oid_datum(stmt.arg_types[i], param_formats[i], &bytes)
                .map_err(|e| SqlError::internal(format!("param ${}: {}", i + 1, e)))?;
        }

        // Result-column format codes follow the same zero/one/n rule.
        let num_columns = stmt.columns.len();
        let num_column_codes = self.read_buf.get_int16()?;
        let result_formats = match num_column_codes {
            0 => vec![FormatCode::Text; num_columns],
            1 => {
                let code = self.get_format_code()?;
                vec![code; num_columns]
            }
            n if n as usize == num_columns => {
                let mut codes = Vec::with_capacity(num_columns);
                for _ in 0..num_columns {
                    codes.push(self.get_format_code()?);
                }
                codes
            }
            n => {
                return Err(SqlError::internal(format!(
                    "expected 0, 1, or {} for number of format codes, got {}",
                    num_columns, n
                ))
                .into());
            }
        };

        self.state.put_portal(
            portal_name,
            Portal {
                statement: statement_name,
                params,
                result_formats,
            },
        );

        self.write_buf.init_msg(ServerMessageType::BindComplete);
        self.write_buf.finish_msg(&mut self.stream).await?;
        Ok(())
    }

    fn get_format_code(&mut self) -> Result<FormatCode, ConnectionError> {
        let raw = self.read_buf.get_int16()?;
        FormatCode::try_from(raw)
            .map_err(|code| ProtocolError::InvalidFormatCode(code).into())
    }

    /// Describe: report a statement's parameter and result types, or a
    /// portal's result types in its chosen output formats.
    async fn handle_describe(&mut self) -> Result<(), ConnectionError> {
        let typ = self.read_buf.get_prepare_type()?;
        let name = self.read_buf.get_string()?;
        debug!(?typ, %name, "describe");

        match typ {
            PrepareType::Statement => {
                let stmt = self.state.get_statement(&name).cloned().ok_or_else(|| {
                    SqlError::internal(format!("unknown prepared statement {:?}", name))
                })?;

                self.write_buf
                    .init_msg(ServerMessageType::ParameterDescription);
                self.write_buf.put_int16(stmt.arg_types.len() as i16);
                for &oid in &stmt.arg_types {
                    self.write_buf.put_int32(oid);
                }
                self.write_buf.finish_msg(&mut self.stream).await?;

                self.send_row_description(&stmt.columns, None).await
            }
            PrepareType::Portal => {
                let portal = self
                    .state
                    .get_portal(&name)
                    .cloned()
                    .ok_or_else(|| SqlError::internal(format!("unknown portal {:?}", name)))?;
                let stmt = self
                    .state
                    .get_statement(&portal.statement)
                    .cloned()
                    .ok_or_else(|| {
                        SqlError::internal(format!(
                            "unknown prepared statement {:?}",
                            portal.statement
                        ))
                    })?;

                self.send_row_description(&stmt.columns, Some(&portal.result_formats))
                    .await
            }
        }
    }

    /// Execute: run a portal's statement. The row description is not sent;
    /// Describe is the client's mechanism to request it.
    async fn handle_execute(&mut self) -> Result<(), ConnectionError> {
        let portal_name = self.read_buf.get_string()?;
        let portal = self
            .state
            .get_portal(&portal_name)
            .cloned()
            .ok_or_else(|| SqlError::internal(format!("unknown portal {:?}", portal_name)))?;
        let limit = self.read_buf.get_int32()?;
        debug!(portal = %portal_name, limit, "execute");

        let stmt = self
            .state
            .get_statement(&portal.statement)
            .cloned()
            .ok_or_else(|| {
                SqlError::internal(format!("unknown prepared statement {:?}", portal.statement))
            })?;

        self.execute_statements(
            &stmt.query,
            &portal.params,
            Some(&portal.result_formats),
            false,
            limit,
        )
        .await
    }

    /// Close: drop the named statement or portal. Closing an unknown name
    /// is not an error.
    async fn handle_close(&mut self) -> Result<(), ConnectionError> {
        let typ = self.read_buf.get_prepare_type()?;
        let name = self.read_buf.get_string()?;
        debug!(?typ, %name, "close");

        match typ {
            PrepareType::Statement => self.state.close_statement(&name),
            PrepareType::Portal => self.state.close_portal(&name),
        }

        self.write_buf.init_msg(ServerMessageType::CloseComplete);
        self.write_buf.finish_msg(&mut self.stream).await?;
        Ok(())
    }

    async fn execute_statements(
        &mut self,
        stmts: &str,
        params: &[Datum],
        format_codes: Option<&[FormatCode]>,
        send_description: bool,
        limit: i32,
    ) -> Result<(), ConnectionError> {
        let results = self
            .executor
            .execute_statements(&self.cancel, &mut self.session, stmts, params)
            .await;

        if results.empty {
            // Zero non-empty statements after parsing.
            self.write_buf.init_msg(ServerMessageType::EmptyQuery);
            self.write_buf.finish_msg(&mut self.stream).await?;
            return Ok(());
        }

        self.send_response(results.results, format_codes, send_description, limit)
            .await
    }

    async fn send_response(
        &mut self,
        results: Vec<StatementResult>,
        format_codes: Option<&[FormatCode]>,
        send_description: bool,
        limit: i32,
    ) -> Result<(), ConnectionError> {
        if results.is_empty() {
            return self.send_command_complete("").await;
        }

        for mut result in results {
            if let Some(err) = result.err.take() {
                return Err(err.into());
            }

            if limit != 0 && result.rows.len() as i64 > limit as i64 {
                return Err(SqlError::internal(format!(
                    "execute row count limits not supported: {} of {}",
                    limit,
                    result.rows.len()
                ))
                .into());
            }

            if result.pg_tag == "INSERT" {
                // The tag format is `INSERT oid rows`, where oid is only
                // nonzero for single-row inserts into tables with OIDs.
                result.pg_tag = "INSERT 0".to_string();
            }

            match result.kind {
                StatementKind::RowsAffected => {
                    let tag = format!("{} {}", result.pg_tag, result.rows_affected);
                    self.send_command_complete(&tag).await?;
                }
                StatementKind::Rows => {
                    if send_description {
                        self.send_row_description(&result.columns, format_codes)
                            .await?;
                    }

                    for row in &result.rows {
                        self.write_buf.init_msg(ServerMessageType::DataRow);
                        self.write_buf.put_int16(row.values.len() as i16);
                        for (i, value) in row.values.iter().enumerate() {
                            let code = format_codes
                                .and_then(|codes| codes.get(i).copied())
                                .unwrap_or_default();
                            match code {
                                FormatCode::Text => self.write_buf.write_text_datum(value)?,
                                FormatCode::Binary => self.write_buf.write_binary_datum(value)?,
                            }
                        }
                        self.write_buf.finish_msg(&mut self.stream).await?;
                    }

                    let tag = format!("{} {}", result.pg_tag, result.rows.len());
                    self.send_command_complete(&tag).await?;
                }
                StatementKind::Ack | StatementKind::Ddl => {
                    self.send_command_complete(&result.pg_tag).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_command_complete(&mut self, tag: &str) -> Result<(), ConnectionError> {
        self.write_buf.init_msg(ServerMessageType::CommandComplete);
        self.write_buf.write_string(tag);
        self.write_buf.finish_msg(&mut self.stream).await?;
        Ok(())
    }

    /// Sends `RowDescription` for the given columns, or `NoData` when there
    /// are none. `format_codes` of `None` means all-text (used by Describe
    /// Statement and the Simple Query path).
    async fn send_row_description(
        &mut self,
        columns: &[ResultColumn],
        format_codes: Option<&[FormatCode]>,
    ) -> Result<(), ConnectionError> {
        if columns.is_empty() {
            self.write_buf.init_msg(ServerMessageType::NoData);
            self.write_buf.finish_msg(&mut self.stream).await?;
            return Ok(());
        }

        self.write_buf.init_msg(ServerMessageType::RowDescription);
        self.write_buf.put_int16(columns.len() as i16);
        for (i, column) in columns.iter().enumerate() {
            let typ = pg_type(&column.typ);
            self.write_buf.write_string(&column.name);
            self.write_buf.put_int32(0); // table OID (none)
            self.write_buf.put_int16(0); // column attribute number (none)
            self.write_buf.put_int32(typ.oid);
            self.write_buf.put_int16(typ.size);
            self.write_buf.put_int32(0); // type modifier
            let code = format_codes
                .and_then(|codes| codes.get(i).copied())
                .unwrap_or_default();
            self.write_buf.put_int16(code.as_i16());
        }
        self.write_buf.finish_msg(&mut self.stream).await?;
        Ok(())
    }
}
