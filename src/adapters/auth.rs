//! Bearer-token identity for the client-facing endpoints. The token is an
//! HS256 JWT whose `sub` is the caller's user id.

use {
    super::api_errors::ApiError,
    crate::{
        AppState,
        domain::{error::PipelineError, id::UserId},
    },
    axum::{
        extract::FromRequestParts,
        http::{header::AUTHORIZATION, request::Parts},
    },
    chrono::{Duration, Utc},
    jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode},
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue(user_id: &UserId, secret: &SecretString, ttl: Duration) -> Result<String, PipelineError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.as_str().to_string(),
        iat: now,
        exp: now + ttl.num_seconds(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| PipelineError::Validation(format!("cannot issue token: {e}")))
}

pub fn verify(token: &str, secret: &SecretString) -> Result<UserId, PipelineError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| PipelineError::Unauthenticated(e.to_string()))?
    .claims;

    UserId::new(claims.sub).map_err(|_| PipelineError::Unauthenticated("empty subject".into()))
}

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PipelineError::Unauthenticated("missing bearer token".into()))?;

        Ok(Self(verify(token, &state.client_jwt_secret)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::new(s.into())
    }

    #[test]
    fn issued_token_verifies_to_same_user() {
        let user = UserId::new("user-42").unwrap();
        let token = issue(&user, &secret("k1"), Duration::minutes(5)).unwrap();
        assert_eq!(verify(&token, &secret("k1")).unwrap(), user);
    }

    #[test]
    fn wrong_key_is_unauthenticated() {
        let user = UserId::new("user-42").unwrap();
        let token = issue(&user, &secret("k1"), Duration::minutes(5)).unwrap();
        assert!(matches!(
            verify(&token, &secret("k2")),
            Err(PipelineError::Unauthenticated(_))
        ));
    }

    #[test]
    fn expired_token_is_unauthenticated() {
        let user = UserId::new("user-42").unwrap();
        let token = issue(&user, &secret("k1"), Duration::hours(-1)).unwrap();
        assert!(matches!(
            verify(&token, &secret("k1")),
            Err(PipelineError::Unauthenticated(_))
        ));
    }
}
