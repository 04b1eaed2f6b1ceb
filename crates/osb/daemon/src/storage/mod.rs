//! Storage layer for osb-daemon
//!
//! Holds service instances, bindings and operations. The volatile and the
//! PostgreSQL backing implement the same [`Store`] contract; which one runs is
//! decided once at startup by [`connect`].

mod memory;
mod postgres;
mod traits;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::{BindingStore, InstanceStore, OperationStore, StorageResult, Store};

use crate::config::StorageConfig;
use std::sync::Arc;

/// Build the configured store
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn Store>> {
    match config {
        StorageConfig::Memory => {
            tracing::info!("Using in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
            retry,
        } => {
            let store =
                PostgresStore::new(url, *max_connections, *connect_timeout_secs, *retry).await?;
            tracing::info!(max_connections, "Using PostgreSQL store");
            Ok(Arc::new(store))
        }
    }
}
