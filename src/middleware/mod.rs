//! Acting-user extraction. Credential issuance and verification are an
//! external collaborator's job (§6); this extractor only identifies which
//! already-authenticated user a request belongs to, by email lookup via
//! Basic Auth, mirroring the host's existing extractor shape.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let encoded = auth_header.strip_prefix("Basic ").ok_or(StatusCode::UNAUTHORIZED)?;
        let decoded = general_purpose::STANDARD.decode(encoded).map_err(|_| StatusCode::UNAUTHORIZED)?;
        let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let email = credentials.splitn(2, ':').next().ok_or(StatusCode::UNAUTHORIZED)?;

        let user = crate::models::User::find_by_email(email, &state.db)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter(|u| u.is_active)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser { user_id: user.id, email: user.email })
    }
}
