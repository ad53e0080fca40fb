use std::sync::Arc;

use tracing::debug;

use crate::error::ProvisionResult;
use crate::remote::{AdminCommand, CommandExecutor};

use super::index::LocationIndex;

/// Grants and revokes a user's access to one instance's bucket.
///
/// Both directions issue two commands (permissions, then auth source). There is no
/// compensation if the second fails: the user is left with permissions it cannot use
/// (grant) or a source without permissions (revoke) and the caller sees an error.
#[derive(Clone)]
pub struct AccessControl {
    executor: Arc<dyn CommandExecutor>,
    index: LocationIndex,
}

impl AccessControl {
    pub fn new(executor: Arc<dyn CommandExecutor>, index: LocationIndex) -> Self {
        Self { executor, index }
    }

    /// Returns the bucket type the grant was scoped to.
    pub async fn grant(&self, username: &str, bucket: &str) -> ProvisionResult<String> {
        let bucket_type = self.index.require(bucket).await?;
        self.executor
            .run(&AdminCommand::Grant { bucket_type: bucket_type.clone(), bucket: bucket.to_string(), username: username.to_string() })
            .await?;
        self.executor.run(&AdminCommand::AddSource { username: username.to_string() }).await?;
        debug!(user = username, bucket, %bucket_type, "access granted");
        Ok(bucket_type)
    }

    pub async fn revoke(&self, username: &str, bucket: &str) -> ProvisionResult<()> {
        let bucket_type = self.index.require(bucket).await?;
        self.executor
            .run(&AdminCommand::Revoke { bucket_type: bucket_type.clone(), bucket: bucket.to_string(), username: username.to_string() })
            .await?;
        self.executor.run(&AdminCommand::DelSource { username: username.to_string() }).await?;
        debug!(user = username, bucket, %bucket_type, "access revoked");
        Ok(())
    }
}
