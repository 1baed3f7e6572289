use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pqfront::executor::noop::NoopExecutor;
use pqfront::server::Server;

/// PostgreSQL wire protocol server with pluggable query execution.
///
/// This binary wires the canned executor to a listener so the protocol
/// layer can be exercised with psql and standard client libraries.
#[derive(Debug, Parser)]
#[command(name = "pqfront")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:15432")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let listener = TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "listening");

    let server = Server::new(listener, Arc::new(NoopExecutor));
    server.serve().await?;

    Ok(())
}
