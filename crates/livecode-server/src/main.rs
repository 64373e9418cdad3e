//! livecode-server: session store, code execution and accounts over HTTP.
//!
//! Run with: cargo run -p livecode-server -- --port 8000

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use livecode_core::{Language, SessionStorage};
use livecode_executor::{ExecutorConfig, ProcessExecutor};
use livecode_transport::{AppState, HttpConfig, router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "livecode-server", about = "Collaborative coding interview backend")]
struct Args {
    /// Address to bind.
    #[arg(long, env = "LIVECODE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "LIVECODE_PORT", default_value_t = 8000)]
    port: u16,

    /// SQLite database URL, e.g. `sqlite://livecode.db`.
    #[cfg(feature = "sqlite")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Allowed CORS origin (repeatable). Any origin when omitted.
    #[arg(long = "cors-origin", env = "LIVECODE_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Maximum number of programs running at once.
    #[arg(long, env = "LIVECODE_MAX_CONCURRENT_EXECUTIONS", default_value_t = 4)]
    max_concurrent_executions: usize,

    /// JavaScript runtime command.
    #[arg(long, env = "LIVECODE_NODE")]
    node: Option<String>,

    /// TypeScript runtime command.
    #[arg(long, env = "LIVECODE_TS_NODE")]
    ts_node: Option<String>,

    /// Python runtime command.
    #[arg(long, env = "LIVECODE_PYTHON")]
    python: Option<String>,
}

impl Args {
    fn executor_config(&self) -> ExecutorConfig {
        let overrides = [
            (Language::JavaScript, &self.node),
            (Language::TypeScript, &self.ts_node),
            (Language::Python, &self.python),
        ];
        overrides
            .into_iter()
            .filter_map(|(language, command)| command.as_ref().map(|c| (language, c)))
            .fold(ExecutorConfig::default(), |config, (language, command)| {
                config.with_command(language, command.as_str())
            })
            .with_max_concurrent(self.max_concurrent_executions)
    }

    #[cfg(feature = "sqlite")]
    async fn storage(&self) -> anyhow::Result<Box<dyn SessionStorage>> {
        if let Some(url) = &self.database_url {
            let storage = livecode_session::storage::SqliteStorage::new(url)
                .await
                .with_context(|| format!("Failed to open database {url}"))?;
            tracing::info!(%url, "Using SQLite session storage");
            return Ok(Box::new(storage));
        }
        Ok(Box::new(livecode_session::storage::MemoryStorage::new()))
    }

    #[cfg(not(feature = "sqlite"))]
    #[allow(clippy::unused_async)]
    async fn storage(&self) -> anyhow::Result<Box<dyn SessionStorage>> {
        Ok(Box::new(livecode_session::storage::MemoryStorage::new()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    let executor = ProcessExecutor::new(args.executor_config());
    let state = AppState::new(args.storage().await?, executor);
    let http = HttpConfig {
        cors_origins: args.cors_origins.clone(),
    };
    let app = router(state, &http);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
