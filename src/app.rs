use crate::config::Settings;
use crate::loader::ModelCache;
use crate::server::HttpServer;
use crate::store::{HttpObjectStore, ObjectStore, SourceDescriptor, UnavailableStore};
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Settings) -> Result<(), Box<dyn Error>> {
    // The store capability is checked exactly once; an unreachable store
    // still lets health and root endpoints serve.
    let store: Arc<dyn ObjectStore> = match HttpObjectStore::new(&config.store) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("object store unavailable: {}", e);
            Arc::new(UnavailableStore::new(e.to_string()))
        }
    };

    let source = SourceDescriptor {
        bucket: config.store.bucket.clone(),
        key: config.store.key.clone(),
    };
    let model_cache = Arc::new(ModelCache::new(store, source, config.model.clone()));

    // best-effort eager load so steady-state requests skip the load latency;
    // runs in the background so health and root serve while the fetch is
    // still in flight
    tokio::spawn({
        let model_cache = Arc::clone(&model_cache);
        async move {
            match model_cache.get_or_load().await {
                Ok(model) => {
                    tracing::info!(num_classes = model.num_classes(), "model loaded at startup")
                }
                Err(e) => tracing::warn!(
                    "model failed to load at startup, first prediction will retry: {}",
                    e
                ),
            }
        }
    });

    let metrics = Arc::new(Metrics::new());
    let server = HttpServer::new(model_cache, metrics, &config.server).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
