//! Request authentication.
//!
//! Agents present a bearer token whose SHA-256 digest is configured per
//! cluster; the middleware resolves it to the caller's cluster id and puts
//! an [`AgentCluster`] in the request extensions. Tenant identity comes from
//! headers set by the authenticating proxy in front of the service.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::ApiState;
use crate::error::{ApiError, ApiResult};

pub const USER_HEADER: &str = "x-fleet-user";
pub const ORG_HEADER: &str = "x-fleet-org";

/// Hex SHA-256 of an agent token, the form stored in configuration.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The data-plane cluster an authenticated agent acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCluster(pub String);

impl AgentCluster {
    /// Agents may only touch their own cluster. Mismatches look like a
    /// missing cluster.
    pub fn authorize(&self, cluster_id: &str) -> ApiResult<()> {
        if self.0.is_empty() || self.0 != cluster_id {
            debug!(caller = %self.0, requested = %cluster_id, "agent cluster mismatch");
            return Err(ApiError::not_found(format!("agent cluster {cluster_id}")));
        }
        Ok(())
    }
}

impl ApiState {
    pub fn cluster_for_token(&self, token: &str) -> Option<String> {
        let digest = token_digest(token);
        self.config
            .auth
            .agent_clusters
            .iter()
            .find(|a| a.token_sha256.eq_ignore_ascii_case(&digest))
            .map(|a| a.cluster_id.clone())
    }
}

/// Middleware for the agent routes.
pub async fn agent_auth(State(state): State<ApiState>, mut req: Request, next: Next) -> Response {
    let caller = bearer_token(req.headers()).and_then(|token| state.cluster_for_token(token));
    match caller {
        Some(cluster_id) => {
            req.extensions_mut().insert(AgentCluster(cluster_id));
            next.run(req).await
        }
        None => {
            debug!(path = %req.uri().path(), "rejected unauthenticated agent request");
            ApiError::not_found("agent cluster").into_response()
        }
    }
}

/// An authenticated tenant user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
    pub org: String,
    pub admin: bool,
}

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let user = header_string(&parts.headers, USER_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated("missing user identity".to_string()))?;
        let org = header_string(&parts.headers, ORG_HEADER)
            .ok_or_else(|| ApiError::Unauthenticated("missing organisation identity".to_string()))?;

        let auth = &state.config.auth;
        let admin = auth.admin_users.contains(&user);
        if !admin && !auth.allowed_org_ids.is_empty() && !auth.allowed_org_ids.contains(&org) {
            return Err(ApiError::Forbidden(format!(
                "organisation {org} is not allowed to use this service"
            )));
        }
        Ok(Caller { user, org, admin })
    }
}

/// A [`Caller`] listed in `auth.admin_users`.
#[derive(Debug, Clone)]
pub struct AdminCaller(pub Caller);

impl FromRequestParts<ApiState> for AdminCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;
        if !caller.admin {
            return Err(ApiError::Forbidden(format!("user {} is not an administrator", caller.user)));
        }
        Ok(AdminCaller(caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer s3cret".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("s3cret"));

        headers.insert("authorization", "Basic s3cret".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn agent_may_only_use_own_cluster() {
        let caller = AgentCluster("c1".to_string());
        assert!(caller.authorize("c1").is_ok());
        assert!(matches!(caller.authorize("c2"), Err(ApiError::NotFound(_))));
        assert!(AgentCluster(String::new()).authorize("").is_err());
    }
}
