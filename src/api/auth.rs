// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Every arena route except health requires `Authorization: Bearer <token>`
// matching `ARENA_ADMIN_TOKEN`. The variable is read per request so a token
// rotation needs no restart. An unset or empty variable rejects everything.
//
//   async fn handler(_auth: AuthBearer, ...) { ... }
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const TOKEN_ENV: &str = "ARENA_ADMIN_TOKEN";

/// Compare in constant time for equal lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validated bearer token.
pub struct AuthBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

fn reject(message: &'static str) -> AuthRejection {
    AuthRejection {
        status: StatusCode::FORBIDDEN,
        message,
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = std::env::var(TOKEN_ENV).unwrap_or_default();
        if expected.is_empty() {
            warn!("{TOKEN_ENV} is not set, rejecting authenticated request");
            return Err(reject("Server authentication not configured"));
        }

        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(token) = token else {
            warn!("missing or malformed Authorization header");
            return Err(reject("Missing or invalid authorization token"));
        };

        if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            warn!("invalid admin token presented");
            return Err(reject("Invalid authorization token"));
        }

        Ok(AuthBearer(token.to_string()))
    }
}
