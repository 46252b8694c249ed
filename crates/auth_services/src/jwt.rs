use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::types::{Actor, AuthError, Claims};

/// Signs and verifies HS256 access tokens
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Creates a service for the given shared secret.
    pub fn new(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Creates a service from the `JWT_SECRET` environment variable.
    pub fn from_env() -> Result<Self, AuthError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)?;
        Ok(Self::new(&SecretString::from(secret)))
    }

    /// Issues a one hour access token for `actor`.
    pub fn generate_access_token(&self, actor: &Actor) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: actor.id.to_string(),
            email: actor.email.clone(),
            exp: (now + Duration::hours(1)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Verifies the signature and expiry of a token.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(token_data.claims)
    }

    /// Verifies a token and returns the actor it identifies.
    pub fn extract_actor_from_token(&self, token: &str) -> Result<Actor, AuthError> {
        let claims = self.verify_token(token)?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)?;

        Ok(Actor {
            id,
            email: claims.email,
        })
    }
}
