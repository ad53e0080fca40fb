//! tsuru service API handlers.
//!
//! Failures are logged with their cause and answered with a fixed message; the cause
//! never reaches the platform.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::classes::Plan;
use crate::error::{AppError, AppResult};

use super::AppState;

pub const MISSING_PARAMS_MSG: &str = "Missing parameters";
pub const BUCKET_CREATION_FAIL_MSG: &str = "Error declaring bucket type";
pub const ERROR_BUCKET_STATUS_MSG: &str = "Bucket error";
pub const USER_GRANTING_FAIL_MSG: &str = "Error granting user";
pub const USER_REVOKING_FAIL_MSG: &str = "Error revoking user";

#[derive(Debug, Default, Deserialize)]
pub struct CreateParams {
    pub name: Option<String>,
    pub plan: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BindParams {
    #[serde(rename = "app-host")]
    pub app_host: Option<String>,
}

fn param(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn missing_params(action: &str) -> AppError {
    error!("Could not {}: {}", action, MISSING_PARAMS_MSG);
    AppError::user("missing_params", MISSING_PARAMS_MSG)
}

type Ack = (StatusCode, Json<&'static str>);

/// Available plans: one per bucket type.
pub async fn get_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    debug!("Executing 'GetPlans' endpoint");
    Json(state.engine.plans())
}

/// New instance: a bucket of the plan's bucket type.
pub async fn create_instance(State(state): State<AppState>, Query(params): Query<CreateParams>) -> AppResult<Ack> {
    debug!("Executing 'CreateInstance' endpoint");
    let (Some(name), Some(plan)) = (param(&params.name), param(&params.plan)) else {
        return Err(missing_params("create the instance"));
    };
    if let Err(e) = state.engine.create_instance(name, plan).await {
        error!(instance = name, plan, code = e.code(), "Could not create the instance: {}", e);
        return Err(AppError::provision(&e, BUCKET_CREATION_FAIL_MSG));
    }
    info!("Instance '{}' created", name);
    Ok((StatusCode::OK, Json("")))
}

/// Bind an app: ensure its user, grant the bucket, return the env vars.
pub async fn bind_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<BindParams>,
) -> AppResult<(StatusCode, Json<BTreeMap<String, String>>)> {
    debug!("Executing 'BindInstance' endpoint");
    let Some(app_host) = param(&params.app_host) else {
        return Err(missing_params("bind the instance"));
    };
    match state.engine.bind_instance(&name, app_host).await {
        Ok(payload) => {
            info!("Instance '{}' bound to '{}'", name, app_host);
            Ok((StatusCode::CREATED, Json(payload.to_env_vars())))
        }
        Err(e) => {
            error!(instance = %name, app_host, code = e.code(), "Could not bind the instance: {}", e);
            Err(AppError::provision(&e, USER_GRANTING_FAIL_MSG))
        }
    }
}

/// Unbind an app: revoke its user's access to the bucket.
pub async fn unbind_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<BindParams>,
) -> AppResult<Ack> {
    debug!("Executing 'UnbindInstance' endpoint");
    let Some(app_host) = param(&params.app_host) else {
        return Err(missing_params("unbind the instance"));
    };
    if let Err(e) = state.engine.unbind_instance(&name, app_host).await {
        error!(instance = %name, app_host, code = e.code(), "Could not unbind the instance: {}", e);
        return Err(AppError::provision(&e, USER_REVOKING_FAIL_MSG));
    }
    info!("Instance '{}' unbound from '{}'", name, app_host);
    Ok((StatusCode::OK, Json("")))
}

/// Unit bind events carry nothing the broker needs.
pub async fn bind_instance_event(Path(name): Path<String>) -> Ack {
    debug!(instance = %name, "Executing 'BindInstanceEvent' endpoint (nothing to do)");
    (StatusCode::CREATED, Json(""))
}

pub async fn unbind_instance_event(Path(name): Path<String>) -> Ack {
    debug!(instance = %name, "Executing 'UnbindInstanceEvent' endpoint (nothing to do)");
    (StatusCode::OK, Json(""))
}

/// Buckets persist forever; removal is acknowledged only.
pub async fn remove_instance(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<Ack> {
    debug!("Executing 'RemoveInstance' endpoint");
    if let Err(e) = state.engine.remove_instance(&name).await {
        error!(instance = %name, "Could not remove the instance: {}", e);
        return Err(AppError::provision(&e, BUCKET_CREATION_FAIL_MSG));
    }
    Ok((StatusCode::OK, Json("")))
}

pub async fn check_instance_status(State(state): State<AppState>, Path(name): Path<String>) -> AppResult<StatusCode> {
    debug!("Executing 'CheckInstanceStatus' endpoint");
    match state.engine.check_status(&name).await {
        Ok(true) => {
            info!("Instance '{}' status ok", name);
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => {
            error!(instance = %name, "Bucket error: not alive");
            Err(AppError::internal("bucket_error", ERROR_BUCKET_STATUS_MSG))
        }
        Err(e) => {
            error!(instance = %name, code = e.code(), "Bucket error: {}", e);
            Err(AppError::provision(&e, ERROR_BUCKET_STATUS_MSG))
        }
    }
}
