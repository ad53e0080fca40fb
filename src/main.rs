use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use riakapi::config::BrokerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = BrokerConfig::from_env();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "riakapi",
        "riakapi starting: RUST_LOG='{}', http_port={}, riak_hosts={:?}, riak_http_port={}, riak_pb_port={}, ssh_host='{}'",
        rust_log, cfg.http_port, cfg.riak.hosts, cfg.riak.http_port, cfg.riak.pb_port, cfg.ssh.host
    );

    riakapi::server::run_with_config(cfg).await
}
