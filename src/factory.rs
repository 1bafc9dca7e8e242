//! Service assembly
//!
//! Builds the store, remote clients, pipeline and workers from an
//! [`RgsConfig`] so the binary and the integration tests wire things the
//! same way.

use crate::{
    api::{ApiServer, AppState},
    config::{OperatorSeed, RgsConfig, StorageBackend},
    errors::{RgsResult, StoreResult},
    events::EventBus,
    games::SettlementPipeline,
    metrics::SettlementMetrics,
    models::{NewOperator, Operator, OperatorLimits},
    store::{MemoryStore, RocksStore, Store},
    wallet::{HttpWallet, Wallet},
    webhook::{HttpWebhookSender, WebhookSender},
    workers::{self, OutboxWorker, ReconcileWorker, WebhookWorker, WorkerHandle},
};
use std::sync::Arc;
use tracing::info;

/// Open the configured storage backend
pub fn create_store(config: &RgsConfig) -> RgsResult<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::RocksDb => {
            std::fs::create_dir_all(&config.storage.data_directory)?;
            info!(path = %config.storage.data_directory, "Opening RocksDB store");
            Arc::new(RocksStore::open(&config.storage.data_directory)?)
        }
    };
    Ok(store)
}

/// Every long-lived component of one RGS instance
pub struct Rgs {
    pub config: RgsConfig,
    pub store: Arc<dyn Store>,
    pub bus: EventBus,
    pub metrics: Arc<SettlementMetrics>,
    pub pipeline: Arc<SettlementPipeline>,
    pub outbox_worker: Arc<OutboxWorker>,
    pub webhook_worker: Arc<WebhookWorker>,
    pub reconcile_worker: Arc<ReconcileWorker>,
}

impl Rgs {
    /// Production wiring: configured store, HTTP wallet and webhook sender
    pub fn build(config: RgsConfig) -> RgsResult<Self> {
        let store = create_store(&config)?;
        let wallet = Arc::new(HttpWallet::new(&config.wallet.url, &config.wallet.secret, config.wallet_timeout())?);
        let sender = Arc::new(HttpWebhookSender::new(config.webhook_timeout())?);
        Ok(Self::with_components(config, store, wallet, sender))
    }

    /// Wiring with caller-supplied collaborators
    pub fn with_components(
        config: RgsConfig,
        store: Arc<dyn Store>,
        wallet: Arc<dyn Wallet>,
        sender: Arc<dyn WebhookSender>,
    ) -> Self {
        let bus = EventBus::new(config.event_bus.buffer_size, config.event_bus.subscriber_capacity);
        let metrics = Arc::new(SettlementMetrics::new());

        let pipeline = Arc::new(SettlementPipeline::new(
            store.clone(),
            wallet.clone(),
            bus.clone(),
            metrics.clone(),
        ));
        let outbox_worker = Arc::new(OutboxWorker::new(
            store.clone(),
            wallet,
            bus.clone(),
            metrics.clone(),
            config.outbox_interval(),
        ));
        let webhook_worker = Arc::new(WebhookWorker::new(
            store.clone(),
            sender,
            bus.clone(),
            metrics.clone(),
            config.webhook_interval(),
            config.webhook_expiry(),
        ));
        let reconcile_worker = Arc::new(ReconcileWorker::new(
            store.clone(),
            pipeline.clone(),
            config.reconcile_interval(),
            config.reconcile_after(),
        ));

        Self {
            config,
            store,
            bus,
            metrics,
            pipeline,
            outbox_worker,
            webhook_worker,
            reconcile_worker,
        }
    }

    /// Register configured operators that do not exist yet and apply their
    /// limits. Existing operators keep their account details.
    pub async fn seed_operators(&self) -> StoreResult<Vec<Operator>> {
        let mut seeded = Vec::with_capacity(self.config.operators.len());
        for seed in &self.config.operators {
            seeded.push(seed_operator(self.store.as_ref(), seed).await?);
        }
        Ok(seeded)
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new(
            self.store.clone(),
            self.pipeline.clone(),
            self.bus.clone(),
            self.metrics.clone(),
            self.config.keepalive_interval(),
        ))
    }

    pub fn api_server(&self) -> ApiServer {
        ApiServer::new(self.config.server.clone(), self.app_state())
    }

    pub fn start_workers(&self) -> Vec<WorkerHandle> {
        vec![
            workers::spawn(self.outbox_worker.clone()),
            workers::spawn(self.webhook_worker.clone()),
            workers::spawn(self.reconcile_worker.clone()),
        ]
    }
}

async fn seed_operator(store: &dyn Store, seed: &OperatorSeed) -> StoreResult<Operator> {
    let operator = match store.operator_by_api_key(&seed.api_key).await? {
        Some(existing) => existing,
        None => {
            let created = store
                .insert_operator(NewOperator {
                    name: seed.name.clone(),
                    api_key: seed.api_key.clone(),
                    webhook_url: seed.webhook_url.clone(),
                    webhook_secret: seed.webhook_secret.clone(),
                })
                .await?;
            info!(operator_id = created.id, name = %created.name, "Operator registered");
            created
        }
    };

    store
        .set_operator_limits(OperatorLimits {
            operator_id: operator.id,
            allowed_jurisdictions: seed.allowed_jurisdictions.clone(),
            max_bet: seed.max_bet,
        })
        .await?;
    Ok(operator)
}
