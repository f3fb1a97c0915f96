use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::authz::errors::AuthzError;
use crate::authz::request::{CallContext, RequestAuthorizer};
use crate::authz::types::{
    AuthorizeRequest, AuthorizeResponse, GrantingRolesResponse, IntrospectRequest,
    IntrospectResponse,
};
use crate::authz::AuthzState;

pub fn router(state: Arc<AuthzState>) -> Router {
    Router::new()
        .route("/v1/authorize", post(handle_authorize))
        .route("/v1/introspect", post(handle_introspect))
        .route("/v1/permissions/{permission}/roles", get(handle_granting_roles))
        .route("/healthz", get(health))
        .with_state(state)
}

async fn handle_authorize(
    State(state): State<Arc<AuthzState>>,
    headers: HeaderMap,
    Json(req): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AuthzError> {
    let mut ctx = CallContext::new(headers);
    if let Some(method) = &req.method {
        ctx = ctx.with_method(method.as_str());
    }
    let (authorizer, _) = RequestAuthorizer::new_for_call(state, &ctx)?;

    let permission = match &req.permission {
        Some(permission) => permission.clone(),
        None if req.method.is_some() => authorizer.method_permission()?.to_string(),
        None => {
            return Err(AuthzError::BadRequest(
                "either `permission` or `method` is required".into(),
            ))
        }
    };

    let result = authorizer
        .authorize(&permission, &req.policies)
        .await?
        .into_grant(&permission, &req.resources)?;

    Ok(Json(AuthorizeResponse {
        granted: result.granted,
        matched_roles: result.matched_roles.into_iter().collect(),
        principal: result.principal,
    }))
}

async fn handle_introspect(
    State(state): State<Arc<AuthzState>>,
    headers: HeaderMap,
    Json(req): Json<IntrospectRequest>,
) -> Result<Json<IntrospectResponse>, AuthzError> {
    let ctx = CallContext::new(headers);
    let (authorizer, _) = RequestAuthorizer::new_for_call(state, &ctx)?;
    let roles = authorizer.roles(&req.policies).await?;
    let permissions = authorizer.permissions(&req.policies).await?;
    Ok(Json(IntrospectResponse {
        roles: roles.into_iter().collect(),
        permissions: permissions.into_iter().collect(),
    }))
}

async fn handle_granting_roles(
    State(state): State<Arc<AuthzState>>,
    Path(permission): Path<String>,
) -> impl IntoResponse {
    let granting = state.graph.roles_that_grant_access(&permission);
    Json(GrantingRolesResponse {
        roles: granting.role_ids.into_iter().collect(),
        resource_types: granting.resource_types.into_iter().collect(),
    })
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
