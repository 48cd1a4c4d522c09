// Shared worker resources
//
// One context per process, built once in init order (gateway first, broker
// substrate second, bus third) and handed to every processor. Nothing in
// here is per-job mutable state; jobs persist progress through the stage
// store and the database only.

use std::sync::Arc;

use stockflow_core::{Result, StockflowConfig};
use stockflow_matching::{ResolverConfig, SupplierResolver};
use stockflow_queue::{Broker, JobQueues, PoLockService, ProgressBus, QueueSettings};
use stockflow_storage::{Database, Gateway, PurchaseOrderWriter};

use crate::remote::{EnrichmentClient, ExtractionClient, ImageSearchClient, ShopifyClient};

pub struct WorkerContext {
    pub config: StockflowConfig,
    pub db: Database,
    pub queues: Arc<JobQueues>,
    pub bus: ProgressBus,
    pub locks: PoLockService,
    pub resolver: SupplierResolver,
    pub po_writer: PurchaseOrderWriter,
    pub extraction: ExtractionClient,
    pub enrichment: EnrichmentClient,
    pub image_search: ImageSearchClient,
    pub shopify: ShopifyClient,
}

impl WorkerContext {
    /// Wire the context from an initialized gateway and broker
    pub async fn new(
        config: StockflowConfig,
        gateway: &Gateway,
        broker: Arc<dyn Broker>,
    ) -> Result<Arc<Self>> {
        let db = gateway.client().await?;
        let queues = Arc::new(JobQueues::new(broker.clone(), QueueSettings::default()));
        let bus = ProgressBus::new(broker.clone());
        let locks = PoLockService::new(broker);

        let resolver = SupplierResolver::new(
            db.clone(),
            ResolverConfig {
                use_pg_trgm: config.use_pg_trgm,
                rollout_percentage: config.rollout_percentage,
                performance_monitoring: config.performance_monitoring,
            },
        );

        Ok(Arc::new(Self {
            db: db.clone(),
            queues,
            bus,
            locks,
            resolver,
            po_writer: PurchaseOrderWriter::new(db),
            extraction: ExtractionClient::new(&config),
            enrichment: EnrichmentClient::new(&config),
            image_search: ImageSearchClient::new(&config),
            shopify: ShopifyClient::new(&config),
            config,
        }))
    }
}
