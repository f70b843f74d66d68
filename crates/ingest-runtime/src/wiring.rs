//! Wires every crate in the workspace into one running process: KV store
//! and bus adapters, the Selector Cache, the Publisher, the Supervisor, and
//! the Node Registry Watcher feeding it (SPEC_FULL.md §2.1).

use std::sync::Arc;

use ingest_publisher::EventPublisher;
use ingest_registry_watcher::RegistryWatcher;
use ingest_selector_cache::SelectorCache;
use ingest_supervisor::Supervisor;
use shared_bus::{InMemoryEventBus, KvStore, NatsBusClient, RedisKvStore};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RuntimeConfig;

/// Registry-watch channel capacity. Generous relative to expected fleet
/// size; a full channel would back-pressure the watcher's snapshot replay.
const REGISTRY_CHANNEL_CAPACITY: usize = 256;

/// Build every collaborator and run the Supervisor loop until `cancel` fires.
pub async fn run(config: RuntimeConfig, cancel: CancellationToken) -> anyhow::Result<()> {
    info!(nats_url = %config.nats_url, valkey_addr = %config.valkey_addr, "connecting to message bus and kv store");

    let bus_client = Arc::new(NatsBusClient::connect(&config.nats_url).await?);
    let kv_store: Arc<dyn KvStore> = Arc::new(RedisKvStore::connect(&config.valkey_addr).await?);

    let cache = Arc::new(SelectorCache::new(kv_store.clone()));
    let publisher = Arc::new(EventPublisher::new(bus_client, config.publish_config()));
    let internal_bus = Arc::new(InMemoryEventBus::new());

    let supervisor = Supervisor::new(
        kv_store.clone(),
        cache,
        publisher,
        internal_bus,
        config.pipeline_config(),
        cancel.clone(),
    );

    let watcher = Arc::new(RegistryWatcher::new(kv_store));
    let (registry_tx, registry_rx) = mpsc::channel(REGISTRY_CHANNEL_CAPACITY);

    let watcher_cancel = cancel.clone();
    let watcher_handle = tokio::spawn(async move {
        tokio::select! {
            _ = watcher_cancel.cancelled() => {}
            _ = watcher.run(registry_tx) => {}
        }
    });

    let metrics_handle = tokio::spawn(crate::metrics_server::serve(config.metrics_port, cancel.clone()));

    supervisor.run(registry_rx).await;

    watcher_handle.abort();
    let _ = metrics_handle.await;
    Ok(())
}
