//! Entry point for the TRAC data-plane service (spec §6): reads startup
//! config and secrets from the environment, opens the metadata pool, and
//! serves `TracDataApi` over gRPC.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use trac_meta::MetaStore;
use trac_storage::LocalStorageBackend;
use trac_svc::{ServiceConfig, TracDataService};

/// TRAC data-plane service: gRPC creation, update, and streaming read of
/// tabular datasets and opaque files under a versioned, tagged metadata
/// model (spec §1).
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the service config YAML file (spec §6 `TRAC_CONFIG_FILE`).
    #[clap(long = "config", env = "TRAC_CONFIG_FILE")]
    config_file: String,

    /// URL of the postgres metadata database.
    #[clap(long = "database", env = "DATABASE_URL")]
    database_url: String,

    /// Unlocks the service's keystore-held credentials (spec §6
    /// `TRAC_SECRET_KEY`). No keystore backend is wired in this core;
    /// the value is only validated as present, never read further.
    #[clap(long = "secret-key", env = "TRAC_SECRET_KEY")]
    secret_key: String,
}

fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = runtime.block_on(async_main(args));

    if let Err(err) = &result {
        tracing::error!(error = ?err, "service exited with an error");
    }
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    if args.secret_key.is_empty() {
        anyhow::bail!("TRAC_SECRET_KEY must not be empty");
    }

    let config = ServiceConfig::load_from_path(&args.config_file)
        .context("failed to load TRAC_CONFIG_FILE")?;

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&args.database_url)
        .await
        .context("failed to connect to the metadata database")?;
    sqlx::migrate!("../trac-meta/migrations")
        .run(&pool)
        .await
        .context("failed to run metadata migrations")?;

    let meta = MetaStore::new(pool);

    let buckets: HashMap<String, std::path::PathBuf> = config.storage_buckets();
    let storage: Arc<dyn trac_storage::StorageBackend> = Arc::new(LocalStorageBackend::new(buckets));

    let config = Arc::new(config);
    let addr: std::net::SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listenAddress '{}'", config.listen_address))?;

    let service = TracDataService::new(meta, storage, config);
    let server = trac_proto::trac_data_api_server::TracDataApiServer::new(service);

    tracing::info!(%addr, "starting TracDataApi server");

    tonic::transport::Server::builder()
        .trace_fn(|_| tracing::info_span!("trac_request"))
        .add_service(server)
        .serve(addr)
        .await
        .context("gRPC server terminated unexpectedly")?;

    Ok(())
}
