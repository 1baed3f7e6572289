//! A canned executor for demos and smoke tests.

use tokio_util::sync::CancellationToken;

use crate::datum::Datum;
use crate::executor::{Executor, MapArgs, ResultColumn, SqlError, StatementResult, StatementResults};
use crate::session::Session;

/// Acknowledges every statement without executing anything.
///
/// Statements are split on `;` and each non-empty one is answered with a
/// `CommandComplete` whose tag is the statement's leading keyword. This is
/// enough for `psql` and client libraries to connect and exchange traffic,
/// which makes it useful for exercising the protocol layer on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl Executor for NoopExecutor {
    async fn prepare(
        &self,
        _ctx: &CancellationToken,
        _query: &str,
        args: MapArgs,
    ) -> Result<(Vec<ResultColumn>, MapArgs), SqlError> {
        Ok((Vec::new(), args))
    }

    async fn execute_statements(
        &self,
        _ctx: &CancellationToken,
        _session: &mut Session,
        stmts: &str,
        _params: &[Datum],
    ) -> StatementResults {
        let results: Vec<StatementResult> = stmts
            .split(';')
            .map(str::trim)
            .filter(|stmt| !stmt.is_empty())
            .map(|stmt| {
                let keyword = stmt.split_whitespace().next().unwrap_or("");
                StatementResult::ack(keyword.to_uppercase())
            })
            .collect();

        let empty = results.is_empty();
        StatementResults { results, empty }
    }
}
