use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::RiakConfig;
use crate::error::{ProvisionError, ProvisionResult};

use super::{BucketProps, CrdtOp, DataStore};

/// Riak KV over its HTTP interface. One pooled `reqwest::Client` shared by every request.
#[derive(Clone)]
pub struct RiakHttpStore {
    client: Client,
    base: String,
    auth: Option<(String, String)>,
}

#[derive(Deserialize)]
struct BucketList {
    #[serde(default)]
    buckets: Vec<String>,
}

#[derive(Deserialize)]
struct DatatypeBody {
    #[serde(default)]
    context: Option<String>,
}

fn enc(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

impl RiakHttpStore {
    pub fn new(cfg: &RiakConfig) -> ProvisionResult<Self> {
        let mut builder = Client::builder();
        if let Some(pem) = &cfg.root_ca_cert {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| ProvisionError::store(format!("invalid RIAK_ROOT_CA_CERT: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if cfg.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| ProvisionError::store(e.to_string()))?;
        let auth = match (&cfg.user, &cfg.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        };
        Ok(Self { client, base: cfg.http_base_url(), auth })
    }

    fn bucket_url(&self, bucket_type: &str, bucket: &str) -> String {
        format!("{}/types/{}/buckets/{}", self.base, enc(bucket_type), enc(bucket))
    }

    fn key_url(&self, bucket_type: &str, bucket: &str, key: &str) -> String {
        format!("{}/keys/{}", self.bucket_url(bucket_type, bucket), enc(key))
    }

    fn datatype_url(&self, bucket_type: &str, bucket: &str, key: &str) -> String {
        format!("{}/datatypes/{}", self.bucket_url(bucket_type, bucket), enc(key))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((u, p)) => req.basic_auth(u, Some(p)),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> ProvisionResult<Response> {
        self.authed(req).send().await.map_err(|e| ProvisionError::store(format!("{}: {}", what, e)))
    }

    async fn expect_success(resp: Response, what: &str) -> ProvisionResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify(status, what, body.trim()))
    }

    async fn post_datatype(&self, bucket_type: &str, bucket: &str, key: &str, body: serde_json::Value) -> ProvisionResult<()> {
        let url = self.datatype_url(bucket_type, bucket, key);
        let resp = self.send(self.client.post(&url).json(&body), "datatype update").await?;
        Self::expect_success(resp, "datatype update").await?;
        Ok(())
    }

    /// Sets need the causal context of the current value before an element can be removed.
    async fn set_context(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<String>> {
        let url = self.datatype_url(bucket_type, bucket, key);
        let resp = self.send(self.client.get(&url), "datatype fetch").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_success(resp, "datatype fetch").await?;
        let body: DatatypeBody = resp.json().await.map_err(|e| ProvisionError::store(e.to_string()))?;
        Ok(body.context)
    }
}

fn classify(status: StatusCode, what: &str, body: &str) -> ProvisionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProvisionError::PermissionDenied(format!("{} rejected with HTTP {}: {}", what, status.as_u16(), body))
        }
        _ => ProvisionError::store(format!("{} failed with HTTP {}: {}", what, status.as_u16(), body)),
    }
}

#[async_trait]
impl DataStore for RiakHttpStore {
    async fn fetch(&self, bucket_type: &str, bucket: &str, key: &str) -> ProvisionResult<Option<Vec<u8>>> {
        let url = self.key_url(bucket_type, bucket, key);
        debug!(bucket_type, bucket, key, "riak fetch");
        let resp = self.send(self.client.get(&url), "fetch").await?;
        match resp.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            // Siblings: the bookkeeping buckets must live under a bucket type without allow_mult.
            StatusCode::MULTIPLE_CHOICES => {
                return Err(ProvisionError::store(format!(
                    "fetch of {}/{}/{} returned siblings; bucket type '{}' must not allow_mult",
                    bucket_type, bucket, key, bucket_type
                )))
            }
            _ => {}
        }
        let resp = Self::expect_success(resp, "fetch").await?;
        let bytes = resp.bytes().await.map_err(|e| ProvisionError::store(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn store(&self, bucket_type: &str, bucket: &str, key: &str, value: &[u8]) -> ProvisionResult<()> {
        let url = self.key_url(bucket_type, bucket, key);
        debug!(bucket_type, bucket, key, "riak store");
        let req = self.client.put(&url).header(reqwest::header::CONTENT_TYPE, "text/plain").body(value.to_vec());
        let resp = self.send(req, "store").await?;
        Self::expect_success(resp, "store").await?;
        Ok(())
    }

    async fn mutate(&self, bucket_type: &str, bucket: &str, key: &str, op: &CrdtOp) -> ProvisionResult<()> {
        debug!(bucket_type, bucket, key, ?op, "riak datatype mutate");
        let body = match op {
            CrdtOp::CounterIncrement(n) => json!({ "increment": n }),
            CrdtOp::SetAdd(v) => json!({ "add": v }),
            CrdtOp::SetRemove(v) => match self.set_context(bucket_type, bucket, key).await? {
                Some(ctx) => json!({ "remove": v, "context": ctx }),
                None => return Err(ProvisionError::not_found(format!("set {}/{}/{} has no value to remove from", bucket_type, bucket, key))),
            },
            CrdtOp::MapTouch { register, value } => {
                let mut update = serde_json::Map::new();
                update.insert(format!("{}_register", register), json!(value));
                json!({ "update": update })
            }
        };
        self.post_datatype(bucket_type, bucket, key, body).await
    }

    async fn list_buckets(&self, bucket_type: &str) -> ProvisionResult<Vec<String>> {
        let url = format!("{}/types/{}/buckets?buckets=true", self.base, enc(bucket_type));
        debug!(bucket_type, "riak list buckets");
        let resp = self.send(self.client.get(&url), "list buckets").await?;
        let resp = Self::expect_success(resp, "list buckets").await?;
        let list: BucketList = resp.json().await.map_err(|e| ProvisionError::store(e.to_string()))?;
        Ok(list.buckets)
    }

    async fn set_bucket_props(&self, bucket_type: &str, bucket: &str, props: &BucketProps) -> ProvisionResult<()> {
        let url = format!("{}/props", self.bucket_url(bucket_type, bucket));
        debug!(bucket_type, bucket, ?props, "riak set bucket props");
        let resp = self.send(self.client.put(&url).json(&json!({ "props": props })), "set bucket props").await?;
        Self::expect_success(resp, "set bucket props").await?;
        Ok(())
    }
}
