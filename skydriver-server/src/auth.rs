//! Bearer-token role mapping, grounded on
//! `original_source/skydriver/rest_handlers.py`'s
//! `token_attribute_role_mapping_auth` plus its `is_testing()` bypass.
//! Real deployments verify against the configured OIDC provider; that
//! provider is an external collaborator per spec.md §1, so here the
//! token is checked against a shared HS256 secret carrying the same
//! `skydriver_role` claim the original maps role attributes onto.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    System,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub role: Role,
    pub sub: String,
}

impl AuthUser {
    pub fn require_system(&self) -> Result<(), ApiError> {
        if self.role == Role::System {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[derive(Deserialize, Default)]
struct Claims {
    sub: Option<String>,
    #[serde(default)]
    skydriver_role: Option<String>,
}

#[async_trait::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.config.ci_test_mode {
            return Ok(AuthUser {
                role: Role::System,
                sub: "ci-test".to_string(),
            });
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let key = DecodingKey::from_secret(state.config.auth_shared_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        let data = decode::<Claims>(token, &key, &validation).map_err(|_| ApiError::Unauthorized)?;

        let role = if data.claims.skydriver_role.as_deref() == Some("system") {
            Role::System
        } else {
            Role::User
        };
        Ok(AuthUser {
            role,
            sub: data.claims.sub.unwrap_or_default(),
        })
    }
}
