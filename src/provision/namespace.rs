use std::sync::Arc;

use tracing::debug;

use crate::classes::{ClassCatalog, DataType};
use crate::error::{ProvisionError, ProvisionResult};
use crate::store::{BucketProps, CrdtOp, DataStore};

/// Key the no-op mutation is written under.
pub const MATERIALIZE_KEY: &str = "riakapi_init";

/// Mutations that create a bucket of the given datatype without leaving data in it.
pub fn materialize_ops(datatype: DataType) -> Vec<CrdtOp> {
    match datatype {
        DataType::Counter => vec![CrdtOp::CounterIncrement(0)],
        DataType::Set => vec![CrdtOp::SetAdd(MATERIALIZE_KEY.to_string()), CrdtOp::SetRemove(MATERIALIZE_KEY.to_string())],
        DataType::Map => vec![CrdtOp::MapTouch { register: "touch".to_string(), value: String::new() }],
    }
}

/// Creates buckets. Riak creates a bucket on its first write, so this writes a no-op
/// of the bucket type's datatype and then turns on `allow_mult`.
#[derive(Clone)]
pub struct NamespaceInitializer {
    store: Arc<dyn DataStore>,
    catalog: Arc<ClassCatalog>,
}

impl NamespaceInitializer {
    pub fn new(store: Arc<dyn DataStore>, catalog: Arc<ClassCatalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn materialize(&self, bucket: &str, bucket_type: &str) -> ProvisionResult<()> {
        let class = self
            .catalog
            .resolve(bucket_type)
            .ok_or_else(|| ProvisionError::invalid(format!("'{}' is not a valid bucket type", bucket_type)))?;
        if bucket.trim().is_empty() {
            return Err(ProvisionError::invalid("bucket name is empty"));
        }

        for op in materialize_ops(class.datatype) {
            self.store.mutate(&class.name, bucket, MATERIALIZE_KEY, &op).await?;
        }
        self.store.set_bucket_props(&class.name, bucket, &BucketProps { allow_mult: true }).await?;
        debug!(bucket, bucket_type = %class.name, "bucket materialized");
        Ok(())
    }
}
