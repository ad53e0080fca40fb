use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classes::{ClassCatalog, Plan};
use crate::config::BrokerConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::remote::CommandExecutor;
use crate::security::derive_username;
use crate::store::DataStore;

use super::access::AccessControl;
use super::bucket_types::BucketTypeProvisioner;
use super::credentials::CredentialIssuer;
use super::index::LocationIndex;
use super::liveness::LivenessProber;
use super::namespace::NamespaceInitializer;

/// Cluster coordinates handed to every bound app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingEndpoints {
    pub hosts: Vec<String>,
    pub http_port: u16,
    pub pb_port: u16,
    pub root_ca_cert: Option<String>,
}

/// Everything the engine needs besides its two seams.
#[derive(Clone)]
pub struct EngineSettings {
    pub catalog: ClassCatalog,
    pub system_bucket_type: String,
    pub salt: Option<String>,
    pub endpoints: BindingEndpoints,
}

impl EngineSettings {
    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self {
            catalog: ClassCatalog::standard(),
            system_bucket_type: cfg.system_bucket_type.clone(),
            salt: cfg.salt.clone(),
            endpoints: BindingEndpoints {
                hosts: cfg.riak.hosts.clone(),
                http_port: cfg.riak.http_port,
                pb_port: cfg.riak.pb_port,
                root_ca_cert: cfg.riak.root_ca_cert.clone(),
            },
        }
    }
}

/// What a bind returns: how the app reaches its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPayload {
    pub hosts: Vec<String>,
    pub http_port: u16,
    pub pb_port: u16,
    pub username: String,
    pub password: String,
    pub bucket_type: String,
    pub bucket: String,
    pub root_ca_cert: Option<String>,
}

impl ConnectionPayload {
    /// Environment variables tsuru injects into the bound app.
    pub fn to_env_vars(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("RIAK_HOSTS".to_string(), serde_json::to_string(&self.hosts).unwrap_or_else(|_| "[]".to_string()));
        env.insert("RIAK_HTTP_PORT".to_string(), self.http_port.to_string());
        env.insert("RIAK_PB_PORT".to_string(), self.pb_port.to_string());
        env.insert("RIAK_USER".to_string(), self.username.clone());
        env.insert("RIAK_PASSWORD".to_string(), self.password.clone());
        env.insert("RIAK_BUCKET_TYPE".to_string(), self.bucket_type.clone());
        env.insert("RIAK_BUCKET".to_string(), self.bucket.clone());
        if let Some(ca) = &self.root_ca_cert {
            env.insert("RIAK_ROOT_CA_CERT".to_string(), ca.clone());
        }
        env
    }
}

fn require_param(value: &str, what: &str) -> ProvisionResult<()> {
    if value.trim().is_empty() {
        return Err(ProvisionError::invalid(format!("missing {}", what)));
    }
    Ok(())
}

/// Instance lifecycle on top of the bucket type, bucket, index, user and ACL steps.
///
/// Instance state is implicit: an instance exists once its location index entry does.
#[derive(Clone)]
pub struct ProvisioningEngine {
    catalog: Arc<ClassCatalog>,
    bucket_types: BucketTypeProvisioner,
    initializer: NamespaceInitializer,
    index: LocationIndex,
    credentials: CredentialIssuer,
    access: AccessControl,
    liveness: LivenessProber,
    endpoints: BindingEndpoints,
}

impl ProvisioningEngine {
    pub fn new(store: Arc<dyn DataStore>, executor: Arc<dyn CommandExecutor>, settings: EngineSettings) -> Self {
        let catalog = Arc::new(settings.catalog);
        let index = LocationIndex::new(store.clone(), settings.system_bucket_type.clone());
        Self {
            bucket_types: BucketTypeProvisioner::new(executor.clone()),
            initializer: NamespaceInitializer::new(store.clone(), catalog.clone()),
            credentials: CredentialIssuer::new(store.clone(), executor.clone(), settings.system_bucket_type, settings.salt),
            access: AccessControl::new(executor, index.clone()),
            liveness: LivenessProber::new(store, index.clone()),
            index,
            catalog,
            endpoints: settings.endpoints,
        }
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.catalog.plans()
    }

    /// Bucket type an instance was created under, if any.
    pub async fn instance_bucket_type(&self, name: &str) -> ProvisionResult<Option<String>> {
        self.index.lookup(name).await
    }

    /// Validate, reject duplicates, ensure the bucket type, create the bucket, then
    /// record it. A failure anywhere leaves no index entry; nothing already written to
    /// the cluster is undone.
    pub async fn create_instance(&self, name: &str, plan: &str) -> ProvisionResult<()> {
        require_param(name, "instance name")?;
        require_param(plan, "plan")?;
        let class = self
            .catalog
            .resolve(plan)
            .ok_or_else(|| ProvisionError::invalid(format!("'{}' is not a valid bucket type", plan)))?;

        if let Some(existing) = self.index.lookup(name).await? {
            debug!(instance = name, bucket_type = %existing, "instance already in location index");
            return Err(ProvisionError::Conflict(format!("Bucket '{}'", name)));
        }

        self.bucket_types.ensure_active(class).await?;
        self.initializer.materialize(name, &class.name).await?;
        self.index.record(name, &class.name).await?;
        info!(instance = name, bucket_type = %class.name, "Instance created");
        Ok(())
    }

    /// Ensure the user, grant it the bucket, and hand back the connection details.
    pub async fn bind_instance(&self, name: &str, token: &str) -> ProvisionResult<ConnectionPayload> {
        require_param(name, "instance name")?;
        require_param(token, "app host")?;
        let creds = self.credentials.ensure_principal(token).await?;
        let bucket_type = self.access.grant(&creds.username, name).await?;
        info!(instance = name, user = %creds.username, "Instance bound");
        Ok(ConnectionPayload {
            hosts: self.endpoints.hosts.clone(),
            http_port: self.endpoints.http_port,
            pb_port: self.endpoints.pb_port,
            username: creds.username,
            password: creds.password,
            bucket_type,
            bucket: name.to_string(),
            root_ca_cert: self.endpoints.root_ca_cert.clone(),
        })
    }

    /// Revoke the token's user from the bucket. The user itself is kept: it may be
    /// bound to other instances and nothing counts references.
    pub async fn unbind_instance(&self, name: &str, token: &str) -> ProvisionResult<()> {
        require_param(name, "instance name")?;
        require_param(token, "app host")?;
        let username = derive_username(token);
        self.access.revoke(&username, name).await?;
        info!(instance = name, user = %username, "Instance unbound");
        Ok(())
    }

    /// Accepted without effect: buckets are kept once created.
    pub async fn remove_instance(&self, name: &str) -> ProvisionResult<()> {
        debug!(instance = name, "remove requested; buckets are never deleted");
        Ok(())
    }

    /// `Ok(true)` or an error explaining why the instance is not available.
    pub async fn check_status(&self, name: &str) -> ProvisionResult<bool> {
        require_param(name, "instance name")?;
        self.liveness.is_alive(name).await
    }

    pub async fn delete_instance_bucket(&self, _name: &str) -> ProvisionResult<()> {
        Err(ProvisionError::Policy("bucket deletion".to_string()))
    }

    pub async fn delete_user(&self, _username: &str) -> ProvisionResult<()> {
        Err(ProvisionError::Policy("user deletion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::index::INSTANCES_BUCKET;
    use crate::store::{CrdtOp, MemoryCluster};

    fn settings() -> EngineSettings {
        EngineSettings {
            catalog: ClassCatalog::standard(),
            system_bucket_type: "default".into(),
            salt: Some("pepper".into()),
            endpoints: BindingEndpoints { hosts: vec!["riak1".into()], http_port: 8098, pb_port: 8087, root_ca_cert: None },
        }
    }

    fn engine() -> (MemoryCluster, ProvisioningEngine) {
        let cluster = MemoryCluster::new();
        let e = ProvisioningEngine::new(Arc::new(cluster.clone()), Arc::new(cluster.clone()), settings());
        (cluster, e)
    }

    #[tokio::test]
    async fn unknown_plan_leaves_no_trace() {
        let (cluster, e) = engine();
        assert!(matches!(e.create_instance("b1", "not-a-real-class").await, Err(ProvisionError::InvalidInput(_))));
        assert!(cluster.object("default", INSTANCES_BUCKET, "b1").is_none());
        assert!(cluster.issued_commands().is_empty());
    }

    #[tokio::test]
    async fn second_create_conflicts() {
        let (cluster, e) = engine();
        e.create_instance("b1", "counter").await.unwrap();
        let err = e.create_instance("b1", "counter").await.unwrap_err();
        assert!(matches!(err, ProvisionError::Conflict(_)));
        assert!(err.to_string().contains("already declared"));
        assert_eq!(cluster.keys("default", INSTANCES_BUCKET), vec!["b1".to_string()]);
    }

    #[tokio::test]
    async fn index_write_failure_fails_create() {
        let (cluster, e) = engine();
        cluster.fail_next_store("store");
        assert!(e.create_instance("b1", "tsuru-map").await.is_err());
        assert_eq!(e.instance_bucket_type("b1").await.unwrap(), None);
        // Bucket stays materialized; a retry succeeds.
        e.create_instance("b1", "tsuru-map").await.unwrap();
        assert_eq!(e.instance_bucket_type("b1").await.unwrap().as_deref(), Some("tsuru-map"));
    }

    #[tokio::test]
    async fn bind_rebind_unbind_cycle() {
        let (cluster, e) = engine();
        e.create_instance("orders", "counter").await.unwrap();
        let p1 = e.bind_instance("orders", "app1.example.org").await.unwrap();
        assert_eq!(p1.username, "tsuru_app1.example.org");
        assert_eq!(p1.bucket_type, "tsuru-counter");
        assert_eq!(p1.bucket, "orders");
        let p2 = e.bind_instance("orders", "app1.example.org").await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(cluster.count_commands("security add-user"), 1);

        let session = cluster.login(&p1.username, &p1.password);
        session.mutate("tsuru-counter", "orders", "hits", &CrdtOp::CounterIncrement(1)).await.unwrap();

        e.unbind_instance("orders", "app1.example.org").await.unwrap();
        let err = session.mutate("tsuru-counter", "orders", "hits", &CrdtOp::CounterIncrement(1)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::PermissionDenied(_)));
        assert!(cluster.user("tsuru_app1.example.org").is_some(), "user is never deleted");
    }

    #[tokio::test]
    async fn rebind_after_failed_user_creation_succeeds() {
        let (cluster, e) = engine();
        e.create_instance("orders", "counter").await.unwrap();
        cluster.fail_next_command("security add-user");
        assert!(matches!(e.bind_instance("orders", "app1").await, Err(ProvisionError::RemoteCommand { .. })));
        assert_eq!(cluster.count_commands("security grant"), 0);

        let p = e.bind_instance("orders", "app1").await.unwrap();
        assert_eq!(cluster.user("tsuru_app1").unwrap().password, p.password);
        let session = cluster.login(&p.username, &p.password);
        session.mutate("tsuru-counter", "orders", "hits", &CrdtOp::CounterIncrement(1)).await.unwrap();

        e.bind_instance("orders", "app1").await.unwrap();
        assert_eq!(cluster.count_commands("security add-user"), 2);
    }

    #[tokio::test]
    async fn bind_to_unknown_instance_returns_no_payload() {
        let (_cluster, e) = engine();
        assert!(matches!(e.bind_instance("ghost", "app").await, Err(ProvisionError::NotFound(_))));
    }

    #[tokio::test]
    async fn status_never_reports_plain_false() {
        let (_cluster, e) = engine();
        assert!(e.check_status("nonexistent").await.is_err());
        e.create_instance("orders", "set").await.unwrap();
        assert!(e.check_status("orders").await.unwrap());
    }

    #[tokio::test]
    async fn remove_is_a_no_op_and_deletes_are_refused() {
        let (cluster, e) = engine();
        e.create_instance("orders", "counter").await.unwrap();
        e.remove_instance("orders").await.unwrap();
        assert!(e.check_status("orders").await.unwrap());
        assert!(matches!(e.delete_instance_bucket("orders").await, Err(ProvisionError::Policy(_))));
        assert!(matches!(e.delete_user("tsuru_x").await, Err(ProvisionError::Policy(_))));
        assert_eq!(cluster.keys("default", INSTANCES_BUCKET), vec!["orders".to_string()]);
    }

    #[test]
    fn env_vars_include_ca_only_when_set() {
        let mut p = ConnectionPayload {
            hosts: vec!["riak1".into(), "riak2".into()],
            http_port: 8098,
            pb_port: 8087,
            username: "tsuru_a".into(),
            password: "pw".into(),
            bucket_type: "tsuru-set".into(),
            bucket: "b".into(),
            root_ca_cert: None,
        };
        let env = p.to_env_vars();
        assert_eq!(env["RIAK_HOSTS"], r#"["riak1","riak2"]"#);
        assert_eq!(env["RIAK_PB_PORT"], "8087");
        assert!(!env.contains_key("RIAK_ROOT_CA_CERT"));
        p.root_ca_cert = Some("PEM".into());
        assert_eq!(p.to_env_vars()["RIAK_ROOT_CA_CERT"], "PEM");
    }
}
