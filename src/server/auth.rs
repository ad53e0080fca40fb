use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::error::AppError;
use crate::security::{constant_time_eq, parse_basic_auth};

use super::AppState;

/// Reject requests whose basic-auth credentials do not match the broker's API user.
/// Missing credentials count as wrong ones. A blank API password turns the check off.
pub async fn require_basic_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.api.enabled() {
        return next.run(req).await;
    }
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth)
        .map(|(user, pass)| {
            // Evaluate both comparisons so timing does not reveal which one failed.
            let user_ok = constant_time_eq(&user, &state.api.username);
            let pass_ok = constant_time_eq(&pass, &state.api.password);
            user_ok & pass_ok
        })
        .unwrap_or(false);
    if !authorized {
        error!(path = %req.uri().path(), "Not authorized access");
        return AppError::auth("unauthorized", "Login Required").into_response();
    }
    next.run(req).await
}
