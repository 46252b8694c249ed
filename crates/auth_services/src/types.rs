use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    /// Unique identifier of the user
    pub id: Uuid,
    /// Email address of the user
    pub email: String,
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject of the token, the user ID
    pub sub: String,
    /// Email address of the user
    #[serde(default)]
    pub email: String,
    /// Expiration timestamp of the token
    pub exp: usize,
    /// Issued at timestamp of the token
    pub iat: usize,
}

/// Custom error type for authentication-related errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token subject is not a user id
    #[error("Token subject is not a valid user id")]
    InvalidSubject,

    /// The token failed verification
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// The signing secret is not configured
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,
}

impl actix_web::ResponseError for AuthError {
    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            AuthError::MissingSecret => {
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal",
                    "message": "An internal error occurred"
                }))
            }
            AuthError::InvalidSubject | AuthError::Jwt(_) => {
                HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthenticated",
                    "message": "Invalid or missing authorization token"
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn test_token_errors_are_unauthenticated() {
        assert_eq!(AuthError::InvalidSubject.error_response().status(), 401);
    }

    #[test]
    fn test_missing_secret_is_internal() {
        assert_eq!(AuthError::MissingSecret.error_response().status(), 500);
    }
}
