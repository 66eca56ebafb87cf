use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use validator::Validate;

use crate::error::ErrorResponse;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Validation error: {0}")]
    InvalidInput(String),
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        let ValidationError::InvalidInput(msg) = self;
        let body = ErrorResponse {
            error: msg,
            error_code: "VALIDATION_ERROR".to_string(),
            details: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

/// JSON body that has passed `validator` checks.
///
/// An empty body deserializes to `T::default()`, so every field of `T` must be
/// optional for the request to make sense without one.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate + Default,
{
    type Rejection = ValidationError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| ValidationError::InvalidInput("Invalid request body".to_string()))?;

        let value: T = if bytes.iter().all(u8::is_ascii_whitespace) {
            T::default()
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ValidationError::InvalidInput(format!("Invalid JSON: {}", e)))?
        };

        value.validate().map_err(|e| {
            let errors = e
                .field_errors()
                .into_iter()
                .map(|(field, errors)| {
                    let error_messages: Vec<String> = errors
                        .iter()
                        .map(|e| {
                            e.message
                                .as_ref()
                                .map(|s| s.to_string())
                                .unwrap_or_else(|| e.code.to_string())
                        })
                        .collect();
                    format!("{}: {}", field, error_messages.join(", "))
                })
                .collect::<Vec<String>>()
                .join("; ");

            ValidationError::InvalidInput(format!("Validation failed: {}", errors))
        })?;

        Ok(ValidatedJson(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, Validate)]
    struct ReconcileParams {
        #[validate(range(min = 1, max = 64))]
        concurrency: Option<usize>,
    }

    fn request(body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_body_uses_defaults() {
        let ValidatedJson(body) = ValidatedJson::<ReconcileParams>::from_request(request(""), &())
            .await
            .unwrap();
        assert!(body.concurrency.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_value_is_rejected() {
        let result =
            ValidatedJson::<ReconcileParams>::from_request(request(r#"{"concurrency": 500}"#), &()).await;
        assert!(matches!(result, Err(ValidationError::InvalidInput(_))));

        let ValidatedJson(body) =
            ValidatedJson::<ReconcileParams>::from_request(request(r#"{"concurrency": 16}"#), &())
                .await
                .unwrap();
        assert_eq!(body.concurrency, Some(16));
    }
}
