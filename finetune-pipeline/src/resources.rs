use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, store::StorageManager},
};

/// Handles owned by one unit of fine-tune work.
#[derive(Clone)]
pub struct FinetuneResources {
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
}

/// Hands out database and storage handles to work that outlives the request that queued it.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn acquire(&self) -> Result<FinetuneResources, AppError>;
}

/// Clones the process-wide handles. Both are reference-counted connections, so the clone
/// stays valid after the caller's request has finished.
#[derive(Clone)]
pub struct SharedResources {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
}

impl SharedResources {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager) -> Self {
        Self { db, storage }
    }
}

#[async_trait]
impl ResourceProvider for SharedResources {
    async fn acquire(&self) -> Result<FinetuneResources, AppError> {
        Ok(FinetuneResources {
            db: Arc::clone(&self.db),
            storage: self.storage.clone(),
        })
    }
}
