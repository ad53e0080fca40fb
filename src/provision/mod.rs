//! Resource and credential provisioning.
//!
//! Each step is its own small component; `ProvisioningEngine` strings them together
//! into the create / bind / unbind / status lifecycle. No step retries and no step is
//! rolled back: the cluster's admin channel and data protocol share no transaction,
//! so steps are ordered so that a partial failure leaves the more repairable state.

pub mod access;
pub mod bucket_types;
pub mod credentials;
pub mod engine;
pub mod index;
pub mod liveness;
pub mod namespace;

pub use access::AccessControl;
pub use bucket_types::BucketTypeProvisioner;
pub use credentials::{CredentialIssuer, Credentials, PrincipalRecord, USERS_BUCKET};
pub use engine::{BindingEndpoints, ConnectionPayload, EngineSettings, ProvisioningEngine};
pub use index::{LocationIndex, INSTANCES_BUCKET};
pub use liveness::LivenessProber;
pub use namespace::{materialize_ops, NamespaceInitializer, MATERIALIZE_KEY};
