use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::Executor;
use crate::server::connection::Connection;
use crate::server::handshake::{AuthHook, Handshake};

/// TCP server speaking the PostgreSQL wire protocol.
///
/// Each accepted connection runs its entire lifetime on a dedicated task;
/// within a connection the loop is strictly sequential, so the shared state
/// is just the executor (which must be safe for concurrent use).
pub struct Server<E: Executor> {
    listener: TcpListener,
    executor: Arc<E>,
    auth_hook: Option<AuthHook>,
}

impl<E: Executor> Server<E> {
    /// Creates a server with a bound listener and a shared executor.
    pub fn new(listener: TcpListener, executor: Arc<E>) -> Self {
        Self {
            listener,
            executor,
            auth_hook: None,
        }
    }

    /// Installs a credential check invoked during each handshake.
    pub fn with_auth_hook(mut self, hook: AuthHook) -> Self {
        self.auth_hook = Some(hook);
        self
    }

    /// Starts accepting connections and serving clients.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            let executor = Arc::clone(&self.executor);
            let auth_hook = self.auth_hook.clone();

            tokio::spawn(async move {
                info!(%peer_addr, "accepted connection");

                let handshake = Handshake::new(socket);
                let result = match handshake.run(auth_hook.as_ref()).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "handshake failed");
                        return;
                    }
                };

                // Dropping the guard on any exit path aborts executor work
                // still running for this connection.
                let cancel = CancellationToken::new();
                let _guard = cancel.clone().drop_guard();

                let connection = Connection::new(result, executor, cancel);
                if let Err(e) = connection.run().await {
                    warn!(%peer_addr, error = %e, "connection error");
                }
                info!(%peer_addr, "connection closed");
            });
        }
    }
}
