use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::queue::producer::TaskProducer;
use crate::services::storage::FileStorage;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    storage: Option<Arc<dyn FileStorage>>,
    producer: TaskProducer,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        storage: Option<Arc<dyn FileStorage>>,
        producer: TaskProducer,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, storage, producer }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn storage(&self) -> Option<&dyn FileStorage> {
        self.inner.storage.as_deref()
    }

    pub(crate) fn producer(&self) -> &TaskProducer {
        &self.inner.producer
    }
}
