use std::sync::Arc;

use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};
use crate::store::DataStore;

/// Bucket holding `instance name -> bucket type name`.
pub const INSTANCES_BUCKET: &str = "riakapi_instances";

/// Riak does not report which bucket type a bucket lives under, so every created
/// instance is recorded here and every later lookup by name goes through it.
#[derive(Clone)]
pub struct LocationIndex {
    store: Arc<dyn DataStore>,
    system_bucket_type: String,
}

impl LocationIndex {
    pub fn new(store: Arc<dyn DataStore>, system_bucket_type: impl Into<String>) -> Self {
        Self { store, system_bucket_type: system_bucket_type.into() }
    }

    pub async fn record(&self, name: &str, bucket_type: &str) -> ProvisionResult<()> {
        self.store
            .store(&self.system_bucket_type, INSTANCES_BUCKET, name, bucket_type.as_bytes())
            .await?;
        debug!(instance = name, bucket_type, "instance recorded in location index");
        Ok(())
    }

    /// Bucket type of `name`, or `None` for an unknown instance. An empty fetch is the
    /// normal "unknown" answer, not an error.
    pub async fn lookup(&self, name: &str) -> ProvisionResult<Option<String>> {
        let raw = self.store.fetch(&self.system_bucket_type, INSTANCES_BUCKET, name).await?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let s = String::from_utf8(bytes)
                    .map_err(|_| ProvisionError::store(format!("location index entry for '{}' is not utf-8", name)))?;
                let s = s.trim().to_string();
                Ok(if s.is_empty() { None } else { Some(s) })
            }
        }
    }

    /// Like `lookup` but an unknown instance is `NotFound`.
    pub async fn require(&self, name: &str) -> ProvisionResult<String> {
        self.lookup(name)
            .await?
            .ok_or_else(|| ProvisionError::not_found(format!("instance '{}' is not registered", name)))
    }
}
