use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;
use crate::error::{BillingError, BillingResult};
use crate::repository::{BillingStore, MemoryBillingStore, PgBillingStore};
use crate::services::bills::BillService;
use crate::services::dispatch::BillDispatcher;
use crate::services::invoice::{
    DocumentRenderer, DocumentStore, MemoryDocumentStore, PgDocumentStore, TextInvoiceRenderer,
};
use crate::services::notifications::{NotificationQueue, PgMessageQueue, TracingQueue};
use crate::services::tenancy::TenancyService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub bills: BillService,
    pub tenancy: TenancyService,
}

impl AppState {
    /// Wires the stores, renderer and queue. Without `DATABASE_URL` the state
    /// falls back to an in-memory store, which production refuses.
    pub async fn build(config: AppConfig) -> BillingResult<Self> {
        let db_pool = match config.database_url.as_deref() {
            Some(url) => Some(db::connect(&config, url).await?),
            None if config.is_production() => {
                return Err(BillingError::Dependency(
                    "DATABASE_URL is required in production.".to_string(),
                ))
            }
            None => {
                tracing::warn!("DATABASE_URL is not set; using the in-memory store");
                None
            }
        };

        let store: Arc<dyn BillingStore>;
        let documents: Arc<dyn DocumentStore>;
        let queue: Arc<dyn NotificationQueue>;
        match &db_pool {
            Some(pool) => {
                store = Arc::new(PgBillingStore::new(pool.clone()));
                documents = Arc::new(PgDocumentStore::new(pool.clone()));
                queue = Arc::new(PgMessageQueue::new(pool.clone()));
            }
            None => {
                store = Arc::new(MemoryBillingStore::new());
                documents = Arc::new(MemoryDocumentStore::new());
                queue = Arc::new(TracingQueue);
            }
        }
        let renderer: Arc<dyn DocumentRenderer> =
            Arc::new(TextInvoiceRenderer::new(&config.app_name, &config.currency_symbol));
        let dispatcher = BillDispatcher::new(
            renderer,
            documents,
            queue,
            &config.currency_symbol,
            &config.app_public_url,
        );

        Ok(Self {
            bills: BillService::new(store.clone(), dispatcher),
            tenancy: TenancyService::new(store),
            db_pool,
            config: Arc::new(config),
        })
    }
}
