use std::sync::Arc;

use tracing::{debug, info};

use crate::classes::NamespaceClass;
use crate::error::{ProvisionError, ProvisionResult};
use crate::remote::{bucket_type_listed, AdminCommand, CommandExecutor};

/// Makes sure a plan's bucket type exists and is active cluster-wide.
#[derive(Clone)]
pub struct BucketTypeProvisioner {
    executor: Arc<dyn CommandExecutor>,
}

impl BucketTypeProvisioner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    pub async fn is_declared(&self, name: &str) -> ProvisionResult<bool> {
        let out = self.executor.run(&AdminCommand::ListBucketTypes).await?;
        Ok(bucket_type_listed(&out, name))
    }

    /// List, create when missing, then always activate. Activation is idempotent on
    /// the cluster so it is re-issued instead of parsing the active flag.
    pub async fn ensure_active(&self, class: &NamespaceClass) -> ProvisionResult<()> {
        if !self.is_declared(&class.name).await? {
            debug!(bucket_type = %class.name, "bucket type missing, creating");
            self.executor
                .run(&AdminCommand::CreateBucketType {
                    name: class.name.clone(),
                    datatype: class.datatype.riak_tag().to_string(),
                })
                .await?;
            if !self.is_declared(&class.name).await? {
                return Err(ProvisionError::not_found(format!("bucket type '{}' missing after create", class.name)));
            }
            info!(bucket_type = %class.name, "bucket type created");
        }
        self.executor.run(&AdminCommand::ActivateBucketType { name: class.name.clone() }).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::ClassCatalog;
    use crate::store::MemoryCluster;

    fn setup() -> (MemoryCluster, BucketTypeProvisioner, NamespaceClass) {
        let cluster = MemoryCluster::new();
        let p = BucketTypeProvisioner::new(Arc::new(cluster.clone()));
        let class = ClassCatalog::standard().resolve("counter").cloned().unwrap();
        (cluster, p, class)
    }

    #[tokio::test]
    async fn creates_then_activates_missing_type() {
        let (cluster, p, class) = setup();
        p.ensure_active(&class).await.unwrap();
        assert_eq!(cluster.bucket_type_active("tsuru-counter"), Some(true));
        let kinds: Vec<&str> = cluster.issued_commands().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["bucket-type list", "bucket-type create", "bucket-type list", "bucket-type activate"]);
    }

    #[tokio::test]
    async fn existing_type_is_only_reactivated() {
        let (cluster, p, class) = setup();
        p.ensure_active(&class).await.unwrap();
        p.ensure_active(&class).await.unwrap();
        assert_eq!(cluster.count_commands("bucket-type create"), 1);
        assert_eq!(cluster.count_commands("bucket-type activate"), 2);
    }

    #[tokio::test]
    async fn failed_create_stops_before_activation() {
        let (cluster, p, class) = setup();
        cluster.fail_next_command("bucket-type create");
        let err = p.ensure_active(&class).await.unwrap_err();
        assert!(matches!(err, ProvisionError::RemoteCommand { .. }));
        assert_eq!(cluster.count_commands("bucket-type activate"), 0);
        assert_eq!(cluster.bucket_type_active("tsuru-counter"), None);
    }

    #[tokio::test]
    async fn failed_activation_surfaces() {
        let (cluster, p, class) = setup();
        cluster.fail_next_command("bucket-type activate");
        assert!(p.ensure_active(&class).await.is_err());
        assert_eq!(cluster.bucket_type_active("tsuru-counter"), Some(false));
    }
}
