//!
//! riakapi HTTP server
//! -------------------
//! Axum router implementing the tsuru service API on top of `ProvisioningEngine`.
//!
//! Responsibilities:
//! - Basic-auth gate for the platform (disabled when no API password is configured).
//! - Mapping lifecycle requests onto engine calls and engine failures onto the short,
//!   stable messages tsuru shows to users.
//! - Wiring the production seams (Riak HTTP store, riak-admin over SSH) at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use tracing::info;

use crate::config::{ApiCredentials, BrokerConfig};
use crate::provision::{EngineSettings, ProvisioningEngine};
use crate::remote::SshExecutor;
use crate::store::RiakHttpStore;

pub mod auth;
pub mod endpoints;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProvisioningEngine>,
    pub api: Arc<ApiCredentials>,
}

impl AppState {
    pub fn new(engine: ProvisioningEngine, api: ApiCredentials) -> Self {
        Self { engine: Arc::new(engine), api: Arc::new(api) }
    }
}

/// All routes. `/healthcheck` stays outside the auth gate.
pub fn router(state: AppState) -> Router {
    let resources = Router::new()
        .route("/resources/plans", get(endpoints::get_plans))
        .route("/resources", post(endpoints::create_instance))
        .route(
            "/resources/{name}/bind-app",
            post(endpoints::bind_instance).delete(endpoints::unbind_instance),
        )
        .route(
            "/resources/{name}/bind",
            post(endpoints::bind_instance_event).delete(endpoints::unbind_instance_event),
        )
        .route("/resources/{name}", delete(endpoints::remove_instance))
        .route("/resources/{name}/status", get(endpoints::check_instance_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_basic_auth));

    Router::new()
        .route("/healthcheck", get(|| async { "WORKING" }))
        .merge(resources)
        .with_state(state)
}

/// Build the production engine: Riak over HTTP for data, riak-admin over SSH for admin.
pub fn build_engine(cfg: &BrokerConfig) -> anyhow::Result<ProvisioningEngine> {
    let store = RiakHttpStore::new(&cfg.riak).context("While creating the Riak HTTP client")?;
    let executor = SshExecutor::new(cfg.ssh.clone());
    Ok(ProvisioningEngine::new(Arc::new(store), Arc::new(executor), EngineSettings::from_config(cfg)))
}

pub async fn run_with_config(cfg: BrokerConfig) -> anyhow::Result<()> {
    let engine = build_engine(&cfg)?;
    let app = router(AppState::new(engine, cfg.api.clone()));

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting Riak API service on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("While binding {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}
