//! Principal extraction from gateway-signed headers.
//!
//! The gateway in front of this service authenticates callers and forwards
//! who they are as `x-principal-id` and `x-principal-role`, together with
//! `x-principal-signature`: a hex HMAC-SHA256 over `"{id}:{role}"` keyed
//! with the shared gateway secret. Requests whose headers are missing or
//! whose signature does not verify are rejected before any handler runs.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use uuid::Uuid;

use super::state::AppState;
use crate::error::AppError;
use crate::models::principal::Role;
use crate::services::signature;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";
pub const PRINCIPAL_SIGNATURE_HEADER: &str = "x-principal-signature";

/// Roles allowed to administer tokens.
pub const STAFF: &[Role] = &[Role::Admin, Role::SuperAdmin];
/// Roles that own and track tokens.
pub const USERS: &[Role] = &[Role::User];
pub const SUPERADMIN: &[Role] = &[Role::SuperAdmin];

/// Authentication error responses
#[derive(Debug)]
pub enum AuthError {
    MissingHeader(&'static str),
    MalformedHeader(&'static str),
    BadSignature,
    Forbidden { role: Role },
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Forbidden { .. } => AppError::Forbidden,
            _ => AppError::Unauthorized,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        tracing::debug!(reason = ?self, "Rejected request at auth gate");
        AppError::from(self).into_response()
    }
}

/// The caller as asserted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub id: Uuid,
    pub role: Role,
}

impl AuthenticatedPrincipal {
    /// The payload the gateway signs.
    pub fn signing_payload(id: Uuid, role: Role) -> String {
        format!("{}:{}", id, role)
    }

    pub fn require(&self, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden { role: self.role })
        }
    }

    pub fn is_staff(&self) -> bool {
        STAFF.contains(&self.role)
    }

    fn from_headers(headers: &HeaderMap, secret: &[u8]) -> Result<Self, AuthError> {
        let id = header(headers, PRINCIPAL_ID_HEADER)?;
        let role = header(headers, PRINCIPAL_ROLE_HEADER)?;
        let signature = header(headers, PRINCIPAL_SIGNATURE_HEADER)?;

        let id: Uuid = id
            .parse()
            .map_err(|_| AuthError::MalformedHeader(PRINCIPAL_ID_HEADER))?;
        let role: Role = role
            .parse()
            .map_err(|_| AuthError::MalformedHeader(PRINCIPAL_ROLE_HEADER))?;

        if !signature::verify(&Self::signing_payload(id, role), signature, secret) {
            return Err(AuthError::BadSignature);
        }

        Ok(Self { id, role })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .ok_or(AuthError::MissingHeader(name))?
        .to_str()
        .map_err(|_| AuthError::MalformedHeader(name))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedPrincipal {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Self::from_headers(
            &parts.headers,
            state.config.gateway_secret.expose_secret().as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const SECRET: &[u8] = b"gateway-secret";

    fn signed_headers(id: Uuid, role: Role, secret: &[u8]) -> HeaderMap {
        let signature =
            signature::sign(&AuthenticatedPrincipal::signing_payload(id, role), secret);
        let mut headers = HeaderMap::new();
        headers.insert(
            PRINCIPAL_ID_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        headers.insert(
            PRINCIPAL_ROLE_HEADER,
            HeaderValue::from_static(role.as_str()),
        );
        headers.insert(
            PRINCIPAL_SIGNATURE_HEADER,
            HeaderValue::from_str(&signature).unwrap(),
        );
        headers
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let id = Uuid::new_v4();
        let headers = signed_headers(id, Role::Admin, SECRET);

        let principal = AuthenticatedPrincipal::from_headers(&headers, SECRET).unwrap();
        assert_eq!(principal, AuthenticatedPrincipal { id, role: Role::Admin });
        assert!(principal.is_staff());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let headers = signed_headers(Uuid::new_v4(), Role::User, b"other-secret");
        assert!(matches!(
            AuthenticatedPrincipal::from_headers(&headers, SECRET),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn test_escalated_role_is_rejected() {
        let mut headers = signed_headers(Uuid::new_v4(), Role::User, SECRET);
        headers.insert(
            PRINCIPAL_ROLE_HEADER,
            HeaderValue::from_static("superadmin"),
        );
        assert!(matches!(
            AuthenticatedPrincipal::from_headers(&headers, SECRET),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        let mut headers = signed_headers(Uuid::new_v4(), Role::User, SECRET);
        headers.remove(PRINCIPAL_SIGNATURE_HEADER);
        assert!(matches!(
            AuthenticatedPrincipal::from_headers(&headers, SECRET),
            Err(AuthError::MissingHeader(PRINCIPAL_SIGNATURE_HEADER))
        ));

        let mut headers = signed_headers(Uuid::new_v4(), Role::User, SECRET);
        headers.insert(PRINCIPAL_ROLE_HEADER, HeaderValue::from_static("root"));
        assert!(matches!(
            AuthenticatedPrincipal::from_headers(&headers, SECRET),
            Err(AuthError::MalformedHeader(PRINCIPAL_ROLE_HEADER))
        ));
    }

    #[test]
    fn test_role_requirements() {
        let user = AuthenticatedPrincipal {
            id: Uuid::new_v4(),
            role: Role::User,
        };
        assert!(user.require(USERS).is_ok());
        assert!(matches!(
            user.require(STAFF),
            Err(AuthError::Forbidden { role: Role::User })
        ));
        assert!(user.require(SUPERADMIN).is_err());
    }
}
