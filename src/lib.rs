pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{EntityError, EntityResult, StoreError, StoreResult};

pub use logic::{EntityService, EntitySpecification, Predicate};

// Export all model types
pub use model::*;

pub use store::{EntityStore, MemoryStore, PostgresStore};

use std::sync::Arc;

use crate::config::{AppConfig, StorageBackend};

/// Open the configured backend and serve the API until shutdown
pub async fn start(config: AppConfig) -> anyhow::Result<()> {
    match config.database.backend {
        StorageBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let postgres_store = PostgresStore::new(&database_url, config.max_connections()).await?;

            log::info!("Running database migrations...");
            postgres_store.migrate().await?;

            serve_store(Arc::new(postgres_store), &config).await
        }
        StorageBackend::Memory => {
            log::warn!("Using the in-memory backend, data is lost on shutdown");
            serve_store(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

pub async fn serve_store<S: EntityStore + 'static>(
    store: Arc<S>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let service = Arc::new(EntityService::new(store));

    if config.seed.enabled {
        seed::load_seed_data(&*service).await?;
    }

    let app: axum::Router = crate::api::routes::create_router().with_state(service);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("EAV store listening on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
