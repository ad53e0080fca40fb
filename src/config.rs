//! Environment-driven broker configuration.
//!
//! Everything is read once at startup into an immutable `BrokerConfig`. Loading goes
//! through a lookup closure so tests can feed a map instead of the process env.

use std::collections::HashMap;

use tracing::{debug, info, warn};

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_RIAK_HTTP_PORT: u16 = 8098;
pub const DEFAULT_RIAK_PB_PORT: u16 = 8087;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SYSTEM_BUCKET_TYPE: &str = "default";

/// Riak cluster coordinates and the admin credentials used for the data protocol.
#[derive(Clone, PartialEq, Eq)]
pub struct RiakConfig {
    pub hosts: Vec<String>,
    pub http_port: u16,
    pub pb_port: u16,
    /// "http" or "https"
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// PEM handed to bound apps and trusted by our own client.
    pub root_ca_cert: Option<String>,
    pub insecure_tls: bool,
}

impl RiakConfig {
    /// Base URL of the HTTP interface on the first cluster host.
    pub fn http_base_url(&self) -> String {
        let host = self.hosts.first().map(String::as_str).unwrap_or("127.0.0.1");
        if host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, host, self.http_port)
        } else {
            format!("{}://{}:{}", self.scheme, host, self.http_port)
        }
    }
}

impl std::fmt::Debug for RiakConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiakConfig")
            .field("hosts", &self.hosts)
            .field("http_port", &self.http_port)
            .field("pb_port", &self.pb_port)
            .field("scheme", &self.scheme)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("root_ca_cert", &self.root_ca_cert.as_ref().map(|_| "<pem>"))
            .field("insecure_tls", &self.insecure_tls)
            .finish()
    }
}

/// Where and how riak-admin commands are run.
#[derive(Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    /// Prefix commands with `sudo` (the ssh user needs passwordless sudo for riak-admin).
    pub sudo: bool,
}

impl SshConfig {
    pub fn has_auth_method(&self) -> bool {
        self.password.is_some() || self.private_key.is_some()
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("sudo", &self.sudo)
            .finish()
    }
}

/// Credentials the platform must present to this broker. Empty password disables the check.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiCredentials {
    pub username: String,
    pub password: String,
}

impl ApiCredentials {
    pub fn enabled(&self) -> bool { !self.password.is_empty() }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("username", &self.username)
            .field("password", &if self.enabled() { "<redacted>" } else { "" })
            .finish()
    }
}

#[derive(Clone)]
pub struct BrokerConfig {
    pub http_port: u16,
    pub riak: RiakConfig,
    pub ssh: SshConfig,
    pub api: ApiCredentials,
    pub salt: Option<String>,
    /// Bucket type that holds the broker's own bookkeeping buckets. Must not set
    /// `allow_mult`: sibling responses on these keys are treated as store failures.
    pub system_bucket_type: String,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("http_port", &self.http_port)
            .field("riak", &self.riak)
            .field("ssh", &self.ssh)
            .field("api", &self.api)
            .field("salt", &self.salt.as_ref().map(|_| "<redacted>"))
            .field("system_bucket_type", &self.system_bucket_type)
            .finish()
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_port(raw: Option<String>, key: &str, default: u16) -> u16 {
    match non_empty(raw) {
        None => default,
        Some(s) => match s.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => {
                warn!(key = key, value = %s, "invalid port, falling back to {}", default);
                default
            }
        },
    }
}

fn parse_flag(raw: Option<String>, default: bool) -> bool {
    match non_empty(raw).map(|s| s.to_ascii_lowercase()) {
        None => default,
        Some(s) => matches!(s.as_str(), "1" | "true" | "yes" | "on"),
    }
}

/// One `RIAK_HOSTS` entry as (host, port). Accepts `host`, `host:port`, bare IPv6
/// literals and `[v6]:port`. IPv6 hosts come back without brackets.
fn split_host_port(entry: &str) -> (&str, Option<&str>) {
    if let Some(rest) = entry.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, tail)) => (host, tail.strip_prefix(':').filter(|p| !p.is_empty())),
            None => (rest, None),
        };
    }
    match entry.split_once(':') {
        Some((host, port)) if !port.contains(':') => (host, Some(port)),
        _ => (entry, None),
    }
}

/// Split `RIAK_HOSTS` into bare host names. The HTTP and PB ports come from their
/// own settings, so a port inside an entry is ignored with a warning.
fn parse_hosts(raw: Option<String>) -> Vec<String> {
    let hosts: Vec<String> = non_empty(raw)
        .map(|s| {
            s.split(',')
                .map(|h| h.trim())
                .filter(|h| !h.is_empty())
                .filter_map(|h| {
                    let (host, port) = split_host_port(h);
                    if let Some(port) = port {
                        warn!(host, port, "port in RIAK_HOSTS ignored; use RIAKAPI_RIAK_HTTP_PORT / RIAKAPI_RIAK_PB_PORT");
                    }
                    (!host.is_empty()).then(|| host.to_string())
                })
                .collect()
        })
        .unwrap_or_default();
    if hosts.is_empty() { vec!["127.0.0.1".to_string()] } else { hosts }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Self {
        Self::from_lookup(|k| vars.get(k).cloned())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let hosts = parse_hosts(get("RIAK_HOSTS"));
        let riak = RiakConfig {
            http_port: parse_port(get("RIAKAPI_RIAK_HTTP_PORT"), "RIAKAPI_RIAK_HTTP_PORT", DEFAULT_RIAK_HTTP_PORT),
            pb_port: parse_port(get("RIAKAPI_RIAK_PB_PORT"), "RIAKAPI_RIAK_PB_PORT", DEFAULT_RIAK_PB_PORT),
            scheme: non_empty(get("RIAK_SCHEME")).unwrap_or_else(|| "http".to_string()),
            user: non_empty(get("RIAK_USER")),
            password: non_empty(get("RIAK_PASSWORD")),
            root_ca_cert: non_empty(get("RIAK_ROOT_CA_CERT")),
            insecure_tls: parse_flag(get("RIAK_INSECURE_TLS"), false),
            hosts,
        };

        // No SSH host: run riak-admin on the first riak node.
        let ssh = SshConfig {
            host: non_empty(get("SSH_HOST")).unwrap_or_else(|| riak.hosts[0].clone()),
            port: parse_port(get("SSH_PORT"), "SSH_PORT", DEFAULT_SSH_PORT),
            user: non_empty(get("SSH_USER")).unwrap_or_else(|| "riak".to_string()),
            password: non_empty(get("SSH_PASSWORD")),
            private_key: non_empty(get("SSH_PRIVATE_KEY")),
            sudo: parse_flag(get("SSH_SUDO"), true),
        };

        let api = ApiCredentials {
            username: get("RIAKAPI_USERNAME").unwrap_or_default(),
            password: get("RIAKAPI_PASSWORD").unwrap_or_default(),
        };

        let cfg = BrokerConfig {
            http_port: parse_port(get("RIAKAPI_HTTP_PORT"), "RIAKAPI_HTTP_PORT", DEFAULT_HTTP_PORT),
            riak,
            ssh,
            api,
            salt: non_empty(get("RIAKAPI_SALT")),
            system_bucket_type: non_empty(get("RIAKAPI_SYSTEM_BUCKET_TYPE"))
                .unwrap_or_else(|| DEFAULT_SYSTEM_BUCKET_TYPE.to_string()),
        };
        cfg.warn_degraded();
        debug!(hosts = ?cfg.riak.hosts, ssh_host = %cfg.ssh.host, "broker configuration parsed");
        info!("Service configuration loaded");
        cfg
    }

    fn warn_degraded(&self) {
        if self.salt.is_none() {
            warn!("'RIAKAPI_SALT' not set, not salting the passwords");
        }
        if !self.api.enabled() {
            warn!("'RIAKAPI_PASSWORD' not set, service security is disabled");
        }
        if !self.ssh.has_auth_method() {
            warn!("No ssh authentication methods present");
        }
    }
}
