//! coedit server: realtime editing sessions and the document REST API in
//! one process.
//!
//! ```text
//! coedit-server [--config <path>]      (or COEDIT_CONFIG=<path>)
//! RUST_LOG=debug coedit-server
//! ```

mod config;

use std::future::IntoFuture;
use std::sync::Arc;

use coedit_collab::http::{self, ApiState};
use coedit_collab::{
    AccountDirectory, DocService, DocumentStore, HttpAccountDirectory, HttpVersionStore,
    MemoryAccountDirectory, MemoryDocumentStore, MemoryVersionStore, RealtimeServer,
    RocksDocumentStore, Stores, VersionStore,
};
use tokio::net::TcpListener;

use crate::config::{ConfigError, ServerConfig, ServiceBackend, StorageBackend};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("coedit-server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = ServerConfig::load(std::env::args().skip(1))?;
    let stores = build_stores(&config)?;
    let service = Arc::new(DocService::new(stores, config.timeout()));

    let realtime = RealtimeServer::new(config.realtime_config(), service.clone());
    if config.internal_secret.is_none() {
        log::warn!("internal_secret not set; internal endpoints are disabled");
    }
    let api = http::router(ApiState {
        service,
        internal_secret: config.internal_secret.clone(),
    });
    let listener = TcpListener::bind(&config.http.bind_addr).await?;
    log::info!("HTTP API listening on {}", listener.local_addr()?);

    tokio::select! {
        result = realtime.run() => result?,
        result = axum::serve(listener, api).into_future() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }
    Ok(())
}

fn build_stores(config: &ServerConfig) -> Result<Stores, BoxError> {
    let documents: Arc<dyn DocumentStore> = match config.storage.backend {
        StorageBackend::Memory => {
            log::warn!("Documents are kept in memory and lost on exit");
            Arc::new(MemoryDocumentStore::new())
        }
        StorageBackend::Rocksdb => Arc::new(RocksDocumentStore::open(config.store_config())?),
    };

    let versions: Arc<dyn VersionStore> = match config.versions.backend {
        ServiceBackend::Memory => Arc::new(MemoryVersionStore::new()),
        ServiceBackend::Remote => {
            let base_url = config
                .versions
                .base_url
                .as_deref()
                .ok_or(ConfigError::MissingBaseUrl("[versions]"))?;
            log::info!("Version history at {base_url}");
            Arc::new(HttpVersionStore::new(config.remote_config(base_url))?)
        }
    };

    let accounts: Arc<dyn AccountDirectory> = match config.accounts.backend {
        ServiceBackend::Memory => {
            log::info!("{} seeded accounts", config.accounts.seed.len());
            Arc::new(MemoryAccountDirectory::with_accounts(config.accounts.seed.iter().cloned()))
        }
        ServiceBackend::Remote => {
            let base_url = config
                .accounts
                .base_url
                .as_deref()
                .ok_or(ConfigError::MissingBaseUrl("[accounts]"))?;
            log::info!("Identity service at {base_url}");
            Arc::new(HttpAccountDirectory::new(config.remote_config(base_url))?)
        }
    };

    Ok(Stores {
        documents,
        versions,
        accounts,
    })
}
