use crate::config::StoreSettings;
use crate::error::LoadError;
use async_trait::async_trait;
use bytes::Bytes;

/// Identifies the object holding the serialized checkpoint.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches the object in a single attempt; retrying is the caller's call.
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Bytes, LoadError>;
}

pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Builds the accessor once at startup. A store with neither an endpoint
    /// nor a region cannot be reached, and is reported here rather than on
    /// the first prediction.
    pub fn new(settings: &StoreSettings) -> Result<Self, LoadError> {
        let base_url = match (&settings.endpoint, &settings.region) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(region)) => format!("https://s3.{}.amazonaws.com", region),
            (None, None) => {
                return Err(LoadError::StoreUnavailable(
                    "neither store.endpoint nor store.region is configured".into(),
                ))
            }
        };

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| LoadError::StoreUnavailable(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn object_url(&self, source: &SourceDescriptor) -> String {
        format!("{}/{}/{}", self.base_url, source.bucket, source.key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<Bytes, LoadError> {
        let url = self.object_url(source);
        tracing::info!("fetching checkpoint from {}", url);

        let fetch_failed = |reason: String| LoadError::FetchFailed {
            bucket: source.bucket.clone(),
            key: source.key.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_failed(e.to_string()))?;

        response.bytes().await.map_err(|e| fetch_failed(e.to_string()))
    }
}

/// Stand-in for a store whose capability check failed at startup. Every fetch
/// surfaces the original reason instead of a scattered per-call guard.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for UnavailableStore {
    async fn fetch(&self, _source: &SourceDescriptor) -> Result<Bytes, LoadError> {
        Err(LoadError::StoreUnavailable(self.reason.clone()))
    }
}
