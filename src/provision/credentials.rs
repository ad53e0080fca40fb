use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, ProvisionResult};
use crate::remote::{AdminCommand, CommandExecutor};
use crate::security::{derive_password, derive_username};
use crate::store::DataStore;

/// Bucket holding one `PrincipalRecord` per user the broker created, keyed by username.
pub const USERS_BUCKET: &str = "riakapi_users";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Users-bucket entry. `confirmed` flips once riak-admin has created the user; an
/// unconfirmed record is a reservation left by an interrupted first bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub password: String,
    #[serde(default)]
    pub confirmed: bool,
}

impl PrincipalRecord {
    /// Bare-password values predate the JSON record and always had a Riak user behind them.
    fn decode(bytes: Vec<u8>, username: &str) -> ProvisionResult<Self> {
        if let Ok(record) = serde_json::from_slice::<PrincipalRecord>(&bytes) {
            return Ok(record);
        }
        let password = String::from_utf8(bytes)
            .map_err(|_| ProvisionError::store(format!("stored password for '{}' is not utf-8", username)))?;
        Ok(PrincipalRecord { password, confirmed: true })
    }

    fn encode(&self) -> ProvisionResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProvisionError::store(e.to_string()))
    }
}

/// riak-admin refuses `add-user` for an existing role; when repairing a reservation
/// that is the outcome we wanted.
fn user_already_exists(err: &ProvisionError) -> bool {
    match err {
        ProvisionError::RemoteCommand { output, .. } => output.contains("role_exists") || output.contains("already exists"),
        _ => false,
    }
}

/// Creates (at most once) the Riak user behind a binding token.
#[derive(Clone)]
pub struct CredentialIssuer {
    store: Arc<dyn DataStore>,
    executor: Arc<dyn CommandExecutor>,
    system_bucket_type: String,
    salt: Option<String>,
}

impl CredentialIssuer {
    pub fn new(
        store: Arc<dyn DataStore>,
        executor: Arc<dyn CommandExecutor>,
        system_bucket_type: impl Into<String>,
        salt: Option<String>,
    ) -> Self {
        Self { store, executor, system_bucket_type: system_bucket_type.into(), salt }
    }

    pub async fn record(&self, username: &str) -> ProvisionResult<Option<PrincipalRecord>> {
        let raw = self.store.fetch(&self.system_bucket_type, USERS_BUCKET, username).await?;
        raw.map(|bytes| PrincipalRecord::decode(bytes, username)).transpose()
    }

    async fn write_record(&self, username: &str, record: &PrincipalRecord) -> ProvisionResult<()> {
        self.store
            .store(&self.system_bucket_type, USERS_BUCKET, username, &record.encode()?)
            .await
    }

    /// Return the user for `token`, creating it on first use.
    ///
    /// A confirmed record short-circuits everything: no new password, no riak-admin
    /// call. On first use the password is reserved (unconfirmed) before the remote
    /// `add-user` and confirmed after it. A later call that finds an unconfirmed
    /// reservation re-issues `add-user` with the reserved password, so an interrupted
    /// first bind is repaired by the next one instead of blocking the token.
    pub async fn ensure_principal(&self, token: &str) -> ProvisionResult<Credentials> {
        if token.trim().is_empty() {
            return Err(ProvisionError::invalid("binding token is empty"));
        }
        let username = derive_username(token);
        let record = match self.record(&username).await? {
            Some(record) if record.confirmed => {
                debug!(user = %username, "user already present");
                return Ok(Credentials { username, password: record.password });
            }
            Some(reservation) => {
                warn!(user = %username, "password reserved but riak user never confirmed, re-issuing add-user");
                reservation
            }
            None => {
                if self.salt.is_none() {
                    warn!(user = %username, "generating password without salt");
                }
                let record = PrincipalRecord { password: derive_password(&username, self.salt.as_deref()), confirmed: false };
                self.write_record(&username, &record).await?;
                record
            }
        };

        let add = AdminCommand::AddUser { username: username.clone(), password: record.password.clone() };
        match self.executor.run(&add).await {
            Ok(_) => {}
            Err(e) if user_already_exists(&e) => {
                debug!(user = %username, "riak user already exists, confirming reservation");
            }
            Err(e) => return Err(e),
        }
        let confirmed = PrincipalRecord { password: record.password, confirmed: true };
        self.write_record(&username, &confirmed).await?;
        info!(user = %username, "riak user created");
        Ok(Credentials { username, password: confirmed.password })
    }
}
