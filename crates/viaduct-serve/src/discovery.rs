//! Discovery contract: the external source of truth for endpoints and
//! services, delivered as two event streams.
//!
//! The engine owns the channels and hands the producing half to the
//! backend. Channels are bounded so a slow event loop applies backpressure
//! to the discovery source instead of buffering without limit. Each loop
//! ends when its channel closes from the producer side.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use viaduct_types::prelude::*;

use crate::config::Configuration;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Identifies the backend in logs.
    fn id(&self) -> &str;

    /// Start producing endpoint events into `tx`. Implementations spawn
    /// their own producer task and return once watching is established.
    async fn watch_endpoints(&self, tx: mpsc::Sender<EndpointEvent>) -> anyhow::Result<()>;

    /// Same for backend service events.
    async fn watch_services(&self, tx: mpsc::Sender<ServiceEvent>) -> anyhow::Result<()>;
}

/// Builds a discovery backend from its configuration namespace; keyed by
/// the `EndpointRegistry.proto` value.
pub type DiscoveryFactory =
    Arc<dyn Fn(&Configuration) -> anyhow::Result<Arc<dyn Discovery>> + Send + Sync>;

pub const DISCOVERY_PROTO_STATIC: &str = "static";

/// In-memory backend: replays seeded events to new watchers and forwards
/// anything published afterwards. Backs the echo feature and the test
/// harnesses; also the default `static` registry proto.
pub struct MemoryDiscovery {
    endpoint_seed: Mutex<Vec<EndpointEvent>>,
    service_seed: Mutex<Vec<ServiceEvent>>,
    endpoint_txs: Mutex<Vec<mpsc::Sender<EndpointEvent>>>,
    service_txs: Mutex<Vec<mpsc::Sender<ServiceEvent>>>,
}

impl MemoryDiscovery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoint_seed: Mutex::new(Vec::new()),
            service_seed: Mutex::new(Vec::new()),
            endpoint_txs: Mutex::new(Vec::new()),
            service_txs: Mutex::new(Vec::new()),
        })
    }

    /// Queue an event for replay to every future watcher.
    pub fn seed_endpoint(&self, event: EndpointEvent) {
        self.endpoint_seed.lock().push(event);
    }

    pub fn seed_service(&self, event: ServiceEvent) {
        self.service_seed.lock().push(event);
    }

    /// Deliver an event to active watchers, waiting when a channel is full.
    pub async fn publish_endpoint(&self, event: EndpointEvent) {
        let txs: Vec<_> = self.endpoint_txs.lock().clone();
        for tx in txs {
            let _ = tx.send(event.clone()).await;
        }
    }

    pub async fn publish_service(&self, event: ServiceEvent) {
        let txs: Vec<_> = self.service_txs.lock().clone();
        for tx in txs {
            let _ = tx.send(event.clone()).await;
        }
    }

    /// Drop the producer halves; watch loops terminate once drained.
    pub fn close(&self) {
        self.endpoint_txs.lock().clear();
        self.service_txs.lock().clear();
    }
}

#[async_trait]
impl Discovery for MemoryDiscovery {
    fn id(&self) -> &str {
        DISCOVERY_PROTO_STATIC
    }

    async fn watch_endpoints(&self, tx: mpsc::Sender<EndpointEvent>) -> anyhow::Result<()> {
        let seed: Vec<_> = self.endpoint_seed.lock().clone();
        for event in seed {
            tx.send(event)
                .await
                .map_err(|_| anyhow::anyhow!("endpoint watcher closed during replay"))?;
        }
        self.endpoint_txs.lock().push(tx);
        Ok(())
    }

    async fn watch_services(&self, tx: mpsc::Sender<ServiceEvent>) -> anyhow::Result<()> {
        let seed: Vec<_> = self.service_seed.lock().clone();
        for event in seed {
            tx.send(event)
                .await
                .map_err(|_| anyhow::anyhow!("service watcher closed during replay"))?;
        }
        self.service_txs.lock().push(tx);
        Ok(())
    }
}

/// Factory for the default in-memory backend.
pub fn memory_discovery_factory() -> DiscoveryFactory {
    Arc::new(|_config: &Configuration| Ok(MemoryDiscovery::new() as Arc<dyn Discovery>))
}

/// Factory that always yields an existing instance; used when the caller
/// needs to keep publishing into the backend the engine watches.
pub fn shared_discovery_factory(shared: Arc<MemoryDiscovery>) -> DiscoveryFactory {
    Arc::new(move |_config: &Configuration| Ok(shared.clone() as Arc<dyn Discovery>))
}
