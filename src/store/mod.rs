//! Typed access to Riak's data protocol.
//!
//! Everything is addressed by (bucket type, bucket, key). Implementations must be
//! safe to share across requests without external locking.

mod http;
mod memory;

pub use http::RiakHttpStore;
pub use memory::{ClusterSession, MemoryCluster, UserSnapshot};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionResult;

/// A single CRDT mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrdtOp {
    CounterIncrement(i64),
    SetAdd(String),
    SetRemove(String),
    /// Write a register field inside a map, creating the map if needed.
    MapTouch { register: String, value: String },
}

/// Bucket properties the broker sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketProps {
    /// Keep concurrent divergent writes as siblings instead of rejecting them.
    pub allow_mult: bool,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Plain object fetch. `None` when the key holds no value.
    async fn fetch(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<Vec<u8>>>;

    async fn store(&self, bucket_type: &str, bucket: &str, key: &str, value: &[u8]) -> ProvisionResult<()>;

    async fn mutate(&self, bucket_type: &str, bucket: &str, key: &str, op: &CrdtOp) -> ProvisionResult<()>;

    async fn list_buckets(&self, bucket_type: &str) -> ProvisionResult<Vec<String>>;

    async fn set_bucket_props(&self, bucket_type: &str, bucket: &str, props: &BucketProps) -> ProvisionResult<()>;
}
