use std::sync::Arc;

use crate::error::{ProvisionError, ProvisionResult};
use crate::store::DataStore;

use super::index::LocationIndex;

#[derive(Clone)]
pub struct LivenessProber {
    store: Arc<dyn DataStore>,
    index: LocationIndex,
}

impl LivenessProber {
    pub fn new(store: Arc<dyn DataStore>, index: LocationIndex) -> Self {
        Self { store, index }
    }

    /// `Ok(true)` when the bucket shows up under its bucket type. Absence is an error
    /// with a cause, never `Ok(false)`.
    pub async fn is_alive(&self, bucket: &str) -> ProvisionResult<bool> {
        let bucket_type = self.index.require(bucket).await?;
        let buckets = self.store.list_buckets(&bucket_type).await?;
        if buckets.iter().any(|b| b == bucket) {
            Ok(true)
        } else {
            Err(ProvisionError::not_found(format!("bucket '{}' not present under bucket type '{}'", bucket, bucket_type)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;

    #[tokio::test]
    async fn present_bucket_is_alive() {
        let cluster = MemoryCluster::new();
        let index = LocationIndex::new(Arc::new(cluster.clone()), "default");
        index.record("riakapi_instances", "default").await.unwrap();
        let prober = LivenessProber::new(Arc::new(cluster), index);
        assert!(prober.is_alive("riakapi_instances").await.unwrap());
    }

    #[tokio::test]
    async fn indexed_but_missing_bucket_is_an_error() {
        let cluster = MemoryCluster::new();
        let index = LocationIndex::new(Arc::new(cluster.clone()), "default");
        index.record("orders", "default").await.unwrap();
        let prober = LivenessProber::new(Arc::new(cluster), index);
        assert!(matches!(prober.is_alive("orders").await, Err(ProvisionError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_instance_is_an_error() {
        let cluster = MemoryCluster::new();
        let index = LocationIndex::new(Arc::new(cluster.clone()), "default");
        let prober = LivenessProber::new(Arc::new(cluster), index);
        assert!(prober.is_alive("nonexistent").await.is_err());
    }
}
