//! In-memory Riak cluster double.
//!
//! One `MemoryCluster` stands in for both seams the engine talks to: it answers the
//! riak-admin vocabulary as a `CommandExecutor` and the data protocol as a
//! `DataStore`. All state sits behind a single mutex and is owned by the instance,
//! so tests can build one each and share it across tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};
use crate::remote::{AdminCommand, CommandExecutor};

use super::{BucketProps, CrdtOp, DataStore};

#[derive(Debug, Clone)]
struct BucketTypeEntry {
    datatype: Option<String>,
    active: bool,
}

#[derive(Debug, Clone)]
enum CrdtValue {
    Counter(i64),
    Set(BTreeSet<String>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default)]
struct UserEntry {
    password: String,
    granted: BTreeSet<(String, String)>,
    source: bool,
}

/// Observable state of a principal, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSnapshot {
    pub username: String,
    pub password: String,
    /// (bucket type, bucket) pairs this user holds permissions on.
    pub granted: BTreeSet<(String, String)>,
    pub has_source: bool,
}

type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct ClusterState {
    bucket_types: BTreeMap<String, BucketTypeEntry>,
    objects: HashMap<ObjectKey, Vec<u8>>,
    datatypes: HashMap<ObjectKey, CrdtValue>,
    bucket_props: HashMap<(String, String), BucketProps>,
    users: BTreeMap<String, UserEntry>,
    issued: Vec<AdminCommand>,
    store_calls: usize,
    failing_commands: Vec<&'static str>,
    failing_store_ops: Vec<&'static str>,
}

impl ClusterState {
    fn take_command_failure(&mut self, kind: &str) -> bool {
        match self.failing_commands.iter().position(|k| *k == kind) {
            Some(i) => { self.failing_commands.remove(i); true }
            None => false,
        }
    }

    fn take_store_failure(&mut self, op: &str) -> bool {
        match self.failing_store_ops.iter().position(|k| *k == op) {
            Some(i) => { self.failing_store_ops.remove(i); true }
            None => false,
        }
    }

    fn begin_store_op(&mut self, op: &'static str) -> ProvisionResult<()> {
        self.store_calls += 1;
        if self.take_store_failure(op) {
            return Err(ProvisionError::store(format!("injected {} failure", op)));
        }
        Ok(())
    }

    fn require_active(&self, bucket_type: &str) -> ProvisionResult<&BucketTypeEntry> {
        match self.bucket_types.get(bucket_type) {
            Some(e) if e.active => Ok(e),
            Some(_) => Err(ProvisionError::store(format!("bucket type '{}' is not active", bucket_type))),
            None => Err(ProvisionError::store(format!("no bucket type named '{}'", bucket_type))),
        }
    }

    fn buckets_of(&self, bucket_type: &str) -> BTreeSet<String> {
        self.objects
            .keys()
            .chain(self.datatypes.keys())
            .filter(|(t, _, _)| t == bucket_type)
            .map(|(_, b, _)| b.clone())
            .collect()
    }

    fn user_mut(&mut self, username: &str) -> Result<&mut UserEntry, String> {
        self.users.get_mut(username).ok_or_else(|| format!("Error: User {} does not exist", username))
    }

    /// riak-admin semantics for one command: Ok(stdout) or Err(output) for a non-zero exit.
    fn apply(&mut self, cmd: &AdminCommand) -> Result<String, String> {
        match cmd {
            AdminCommand::ListBucketTypes => Ok(self
                .bucket_types
                .iter()
                .map(|(name, e)| format!("{} ({})\n", name, if e.active { "active" } else { "not active" }))
                .collect()),
            AdminCommand::CreateBucketType { name, datatype } => {
                if self.bucket_types.contains_key(name) {
                    return Err(format!("Error creating bucket type {}:\nalready_active", name));
                }
                self.bucket_types.insert(name.clone(), BucketTypeEntry { datatype: Some(datatype.clone()), active: false });
                Ok(format!("{} created\n", name))
            }
            AdminCommand::ActivateBucketType { name } => match self.bucket_types.get_mut(name) {
                Some(e) => { e.active = true; Ok(format!("{} has been activated\n", name)) }
                None => Err(format!("{} is not a valid bucket type", name)),
            },
            AdminCommand::AddUser { username, password } => {
                if self.users.contains_key(username) {
                    return Err(format!("Error adding user {}: role_exists", username));
                }
                self.users.insert(username.clone(), UserEntry { password: password.clone(), ..Default::default() });
                Ok(String::new())
            }
            AdminCommand::Grant { bucket_type, bucket, username } => {
                self.require_active(bucket_type).map_err(|e| e.to_string())?;
                let user = self.user_mut(username)?;
                user.granted.insert((bucket_type.clone(), bucket.clone()));
                Ok(String::new())
            }
            AdminCommand::Revoke { bucket_type, bucket, username } => {
                let user = self.user_mut(username)?;
                user.granted.remove(&(bucket_type.clone(), bucket.clone()));
                Ok(String::new())
            }
            AdminCommand::AddSource { username } => {
                self.user_mut(username)?.source = true;
                Ok(String::new())
            }
            AdminCommand::DelSource { username } => {
                self.user_mut(username)?.source = false;
                Ok(String::new())
            }
        }
    }

    fn fetch(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<Vec<u8>>> {
        self.require_active(bucket_type)?;
        Ok(self.objects.get(&(bucket_type.to_string(), bucket.to_string(), key.to_string())).cloned())
    }

    fn store(&mut self, bucket_type: &str, bucket: &str, key: &str, value: &[u8]) -> ProvisionResult<()> {
        let entry = self.require_active(bucket_type)?;
        if entry.datatype.is_some() {
            return Err(ProvisionError::store(format!("bucket type '{}' only accepts datatype operations", bucket_type)));
        }
        self.objects.insert((bucket_type.to_string(), bucket.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn mutate(&mut self, bucket_type: &str, bucket: &str, key: &str, op: &CrdtOp) -> ProvisionResult<()> {
        let expected = match op {
            CrdtOp::CounterIncrement(_) => "counter",
            CrdtOp::SetAdd(_) | CrdtOp::SetRemove(_) => "set",
            CrdtOp::MapTouch { .. } => "map",
        };
        let entry = self.require_active(bucket_type)?;
        if entry.datatype.as_deref() != Some(expected) {
            return Err(ProvisionError::store(format!("bucket type '{}' does not hold {} values", bucket_type, expected)));
        }
        let k = (bucket_type.to_string(), bucket.to_string(), key.to_string());
        match op {
            CrdtOp::CounterIncrement(n) => {
                match self.datatypes.entry(k).or_insert(CrdtValue::Counter(0)) {
                    CrdtValue::Counter(v) => *v += n,
                    _ => return Err(ProvisionError::store("datatype mismatch")),
                }
            }
            CrdtOp::SetAdd(item) => {
                match self.datatypes.entry(k).or_insert_with(|| CrdtValue::Set(BTreeSet::new())) {
                    CrdtValue::Set(s) => { s.insert(item.clone()); }
                    _ => return Err(ProvisionError::store("datatype mismatch")),
                }
            }
            CrdtOp::SetRemove(item) => match self.datatypes.get_mut(&k) {
                Some(CrdtValue::Set(s)) => { s.remove(item); }
                _ => return Err(ProvisionError::not_found(format!("set {}/{}/{} has no value to remove from", bucket_type, bucket, key))),
            },
            CrdtOp::MapTouch { register, value } => {
                match self.datatypes.entry(k).or_insert_with(|| CrdtValue::Map(BTreeMap::new())) {
                    CrdtValue::Map(m) => { m.insert(register.clone(), value.clone()); }
                    _ => return Err(ProvisionError::store("datatype mismatch")),
                }
            }
        }
        Ok(())
    }

    fn list_buckets(&self, bucket_type: &str) -> ProvisionResult<Vec<String>> {
        self.require_active(bucket_type)?;
        Ok(self.buckets_of(bucket_type).into_iter().collect())
    }

    fn set_bucket_props(&mut self, bucket_type: &str, bucket: &str, props: &BucketProps) -> ProvisionResult<()> {
        self.require_active(bucket_type)?;
        self.bucket_props.insert((bucket_type.to_string(), bucket.to_string()), props.clone());
        Ok(())
    }

    /// Authentication plus per-bucket authorization for a non-admin session.
    fn authorize(&self, username: &str, password: &str, bucket_type: &str, bucket: Option<&str>) -> ProvisionResult<()> {
        let user = match self.users.get(username) {
            Some(u) if u.password == password => u,
            _ => return Err(ProvisionError::PermissionDenied(format!("authentication failed for {}", username))),
        };
        if !user.source {
            return Err(ProvisionError::PermissionDenied(format!("no matching auth source for {}", username)));
        }
        let allowed = match bucket {
            Some(b) => user.granted.contains(&(bucket_type.to_string(), b.to_string())),
            None => user.granted.iter().any(|(t, _)| t == bucket_type),
        };
        if !allowed {
            return Err(ProvisionError::PermissionDenied(format!("{} has no permission on {}/{}", username, bucket_type, bucket.unwrap_or("*"))));
        }
        Ok(())
    }
}

/// Shared handle; clones see the same cluster.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Fresh cluster with only the always-present, active `default` bucket type.
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.state.lock().bucket_types.insert("default".to_string(), BucketTypeEntry { datatype: None, active: true });
        cluster
    }

    /// A data-protocol session authenticated as `username`.
    pub fn login(&self, username: &str, password: &str) -> ClusterSession {
        ClusterSession { cluster: self.clone(), username: username.to_string(), password: password.to_string() }
    }

    /// Make the next command of this kind (see `AdminCommand::kind`) exit non-zero.
    pub fn fail_next_command(&self, kind: &'static str) {
        self.state.lock().failing_commands.push(kind);
    }

    /// Make the next store call of this op (`fetch`, `store`, `mutate`, `list`, `props`) fail.
    pub fn fail_next_store(&self, op: &'static str) {
        self.state.lock().failing_store_ops.push(op);
    }

    pub fn issued_commands(&self) -> Vec<AdminCommand> {
        self.state.lock().issued.clone()
    }

    pub fn count_commands(&self, kind: &str) -> usize {
        self.state.lock().issued.iter().filter(|c| c.kind() == kind).count()
    }

    /// Calls made through the admin `DataStore` impl (not through sessions).
    pub fn store_calls(&self) -> usize {
        self.state.lock().store_calls
    }

    pub fn bucket_type_active(&self, name: &str) -> Option<bool> {
        self.state.lock().bucket_types.get(name).map(|e| e.active)
    }

    pub fn object(&self, bucket_type: &str, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(&(bucket_type.to_string(), bucket.to_string(), key.to_string())).cloned()
    }

    /// Keys stored in a plain bucket, sorted.
    pub fn keys(&self, bucket_type: &str, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .objects
            .keys()
            .filter(|(t, b, _)| t == bucket_type && b == bucket)
            .map(|(_, _, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn bucket_props(&self, bucket_type: &str, bucket: &str) -> Option<BucketProps> {
        self.state.lock().bucket_props.get(&(bucket_type.to_string(), bucket.to_string())).cloned()
    }

    pub fn user(&self, username: &str) -> Option<UserSnapshot> {
        self.state.lock().users.get(username).map(|u| UserSnapshot {
            username: username.to_string(),
            password: u.password.clone(),
            granted: u.granted.clone(),
            has_source: u.source,
        })
    }
}

#[async_trait]
impl CommandExecutor for MemoryCluster {
    async fn run(&self, command: &AdminCommand) -> ProvisionResult<String> {
        let mut st = self.state.lock();
        st.issued.push(command.clone());
        debug!(command = %command, "memory cluster command");
        if st.take_command_failure(command.kind()) {
            return Err(ProvisionError::RemoteCommand { command: command.to_string(), status: 1, output: "injected failure".into() });
        }
        st.apply(command)
            .map_err(|output| ProvisionError::RemoteCommand { command: command.to_string(), status: 1, output })
    }
}

#[async_trait]
impl DataStore for MemoryCluster {
    async fn fetch(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<Vec<u8>>> {
        let mut st = self.state.lock();
        st.begin_store_op("fetch")?;
        st.fetch(bucket_type, bucket, key)
    }

    async fn store(&self, bucket_type: &str, bucket: &str, key: &str, value: &[u8]) -> ProvisionResult<()> {
        let mut st = self.state.lock();
        st.begin_store_op("store")?;
        st.store(bucket_type, bucket, key, value)
    }

    async fn mutate(&self, bucket_type: &str, bucket: &str, key: &str, op: &CrdtOp) -> ProvisionResult<()> {
        let mut st = self.state.lock();
        st.begin_store_op("mutate")?;
        st.mutate(bucket_type, bucket, key, op)
    }

    async fn list_buckets(&self, bucket_type: &str) -> ProvisionResult<Vec<String>> {
        let mut st = self.state.lock();
        st.begin_store_op("list")?;
        st.list_buckets(bucket_type)
    }

    async fn set_bucket_props(&self, bucket_type: &str, bucket: &str, props: &BucketProps) -> ProvisionResult<()> {
        let mut st = self.state.lock();
        st.begin_store_op("props")?;
        st.set_bucket_props(bucket_type, bucket, props)
    }
}

/// Data-protocol view of the cluster as a bound app sees it: every call checks the
/// user's password, auth source and bucket grant.
#[derive(Clone, Debug)]
pub struct ClusterSession {
    cluster: MemoryCluster,
    username: String,
    password: String,
}

#[async_trait]
impl DataStore for ClusterSession {
    async fn fetch(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<Vec<u8>>> {
        let st = self.cluster.state.lock();
        st.authorize(&self.username, &self.password, bucket_type, Some(bucket))?;
        st.fetch(bucket_type, bucket, key)
    }

    async fn store(&self, bucket_type: &str, bucket: &str, key: &str, value: &[u8]) -> ProvisionResult<()> {
        let mut st = self.cluster.state.lock();
        st.authorize(&self.username, &self.password, bucket_type, Some(bucket))?;
        st.store(bucket_type, bucket, key, value)
    }

    async fn mutate(&self, bucket_type: &str, bucket: &str, key: &str, op: &CrdtOp) -> ProvisionResult<()> {
        let mut st = self.cluster.state.lock();
        st.authorize(&self.username, &self.password, bucket_type, Some(bucket))?;
        st.mutate(bucket_type, bucket, key, op)
    }

    async fn list_buckets(&self, bucket_type: &str) -> ProvisionResult<Vec<String>> {
        let st = self.cluster.state.lock();
        st.authorize(&self.username, &self.password, bucket_type, None)?;
        st.list_buckets(bucket_type)
    }

    async fn set_bucket_props(&self, bucket_type: &str, bucket: &str, _props: &BucketProps) -> ProvisionResult<()> {
        Err(ProvisionError::PermissionDenied(format!("{} may not change props of {}/{}", self.username, bucket_type, bucket)))
    }
}
