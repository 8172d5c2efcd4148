use crate::checkpoint;
use crate::config::ModelSettings;
use crate::error::LoadError;
use crate::inference::Classifier;
use crate::store::{ObjectStore, SourceDescriptor};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Process-wide cache slot for the loaded classifier. Owned by the server
/// state rather than a module-level global, so tests can inject a fake store.
pub struct ModelCache {
    store: Arc<dyn ObjectStore>,
    source: SourceDescriptor,
    settings: ModelSettings,
    slot: RwLock<Option<Arc<Classifier>>>,
    load_gate: Mutex<()>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ObjectStore>, source: SourceDescriptor, settings: ModelSettings) -> Self {
        Self {
            store,
            source,
            settings,
            slot: RwLock::new(None),
            load_gate: Mutex::new(()),
        }
    }

    pub async fn cached(&self) -> Option<Arc<Classifier>> {
        self.slot.read().await.clone()
    }

    /// Returns the cached classifier, loading it first when the slot is
    /// empty. First load is serialized behind a gate and double-checked, so
    /// concurrent cold requests trigger a single fetch; a failed load leaves
    /// the slot empty and the next call starts over.
    pub async fn get_or_load(&self) -> Result<Arc<Classifier>, LoadError> {
        if let Some(model) = self.cached().await {
            return Ok(model);
        }

        let _gate = self.load_gate.lock().await;
        if let Some(model) = self.cached().await {
            return Ok(model);
        }

        let bytes = self.store.fetch(&self.source).await?;
        tracing::info!(bytes = bytes.len(), "checkpoint fetched");

        let classifier = checkpoint::deserialize(&bytes, &self.settings)?;
        let model = Arc::new(classifier);
        *self.slot.write().await = Some(Arc::clone(&model));
        tracing::info!(num_classes = model.num_classes(), "model ready");

        Ok(model)
    }
}
