//! Process entrypoint for the durable-stream service: parses configuration
//! from flags/environment, picks a storage backend, and serves the HTTP/SSE
//! gateway until a shutdown signal arrives.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use durable_stream::storage::memory::MemoryStore;
use durable_stream::{server, BackendKind, ServerOptions, StreamManager};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "file-storage")]
use durable_stream::storage::file::FileStore;

#[cfg(feature = "sql-storage")]
use durable_stream::storage::sql::SqlStore;

/// Minimum env vars per spec.md §6 (`PORT`, `HOST`, `DATA_DIR`), plus the
/// backend selector and route prefix override a running process needs but
/// the core contract leaves unspecified.
#[derive(Parser, Debug)]
#[command(author, version, about = "Durable append-only event-stream service")]
struct Opts {
    /// Bind address.
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 4437)]
    port: u16,

    /// Route prefix under which the append/read endpoints are mounted.
    #[arg(long, env = "PATH_PREFIX", default_value = "/agents")]
    path_prefix: String,

    /// Storage backend: memory, file, or sql.
    #[arg(long, env = "BACKEND", default_value = "memory")]
    backend: BackendKind,

    /// Storage root for the file and sql backends.
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn build_storage(opts: &Opts) -> anyhow::Result<Arc<dyn durable_stream::storage::Storage>> {
    match opts.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "file-storage")]
        BackendKind::File => {
            let data_dir = opts
                .data_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--data-dir (or DATA_DIR) is required for the file backend"))?;
            Ok(Arc::new(FileStore::new(data_dir)?))
        }
        #[cfg(not(feature = "file-storage"))]
        BackendKind::File => anyhow::bail!("this binary was built without the file-storage feature"),
        #[cfg(feature = "sql-storage")]
        BackendKind::Sql => {
            let data_dir = opts
                .data_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--data-dir (or DATA_DIR) is required for the sql backend"))?;
            std::fs::create_dir_all(&data_dir)?;
            Ok(Arc::new(SqlStore::open(&data_dir.join("events.sqlite3"))?))
        }
        #[cfg(not(feature = "sql-storage"))]
        BackendKind::Sql => anyhow::bail!("this binary was built without the sql-storage feature"),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("durable-stream-server: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let storage = build_storage(&opts)?;
    let manager = StreamManager::new(storage);

    let options = ServerOptions {
        host: opts.host,
        port: opts.port,
        path_prefix: opts.path_prefix,
        backend: opts.backend,
        data_dir: opts.data_dir,
    };

    tracing::info!(backend = %options.backend, prefix = %options.path_prefix, "configuration loaded");

    server::start_server(server::AppState { manager, options }).await?;
    Ok(())
}
