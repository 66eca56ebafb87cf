use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use crate::error::AppError;

/// Bearer token guarding the admin routes. `None` leaves them open.
#[derive(Clone, Default)]
pub struct AdminToken(Option<Arc<str>>);

impl AdminToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Arc::from))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    pub fn accepts(&self, authorization: Option<&str>) -> bool {
        let Some(expected) = &self.0 else {
            return true;
        };
        let Some(presented) = authorization.and_then(|v| v.strip_prefix("Bearer ")) else {
            return false;
        };
        // Compare digests so the comparison time does not depend on the prefix matched.
        Sha256::digest(presented.trim().as_bytes()) == Sha256::digest(expected.as_bytes())
    }
}

pub async fn require_admin_token(
    State(token): State<AdminToken>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if !token.accepts(authorization) {
        warn!(path = %req.uri().path(), "Rejected admin request without a valid token");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_token_accepts_everything() {
        let token = AdminToken::new(None);
        assert!(!token.is_enabled());
        assert!(token.accepts(None));

        assert!(!AdminToken::new(Some(String::new())).is_enabled());
    }

    #[test]
    fn test_bearer_token_must_match() {
        let token = AdminToken::new(Some("s3cret".to_string()));
        assert!(token.accepts(Some("Bearer s3cret")));
        assert!(!token.accepts(Some("Bearer wrong")));
        assert!(!token.accepts(Some("s3cret")));
        assert!(!token.accepts(None));
    }
}
