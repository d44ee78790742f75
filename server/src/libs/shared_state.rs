use crate::libs::app_config::{AppConfigRef, Backend};
use crate::libs::peer_registry::PeerRegistry;
use crate::libs::release_detector::ReleaseDetector;
use crate::libs::snapshot_store::{MemoryStore, NativeStore, StoreRef};
use std::sync::Arc;

#[derive(Clone)]
pub struct SharedState {
    //impls deref, can be private
    inner: Arc<SharedStateInner>,
}

pub struct SharedStateInner {
    pub app_config: AppConfigRef,
    pub store: StoreRef,
    pub registry: PeerRegistry,
    pub detector: ReleaseDetector,
    pub http: reqwest::Client,
}

impl SharedState {
    /// Opens the backend selected in the config.
    pub fn new(config: AppConfigRef) -> eyre::Result<Self> {
        let store: StoreRef = match config.backend {
            Backend::Native => Arc::new(NativeStore::open(&config.db_path)?),
            Backend::Memory => {
                log::warn!("using the memory backend, history is lost on exit");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfigRef, store: StoreRef) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.peer_timeout())
            .build()?;
        Ok(Self {
            inner: Arc::new(SharedStateInner {
                store,
                registry: PeerRegistry::new(&config.registry.hosts_file),
                detector: ReleaseDetector::new(config.release_threshold),
                http,
                app_config: config,
            }),
        })
    }
}

impl std::ops::Deref for SharedState {
    type Target = SharedStateInner;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
