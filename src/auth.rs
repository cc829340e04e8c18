//! Credential service
//!
//! Registers users, checks email/password pairs and issues HS256 bearer
//! tokens. Handlers receive the verified caller through the [`AuthUser`]
//! extractor, so identity is always an explicit per-request value.

use crate::api::ApiError;
use crate::db::Database;
use crate::error::{Result, SwapError};
use crate::types::User;
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Verified identity of the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
    pub email: String,
}

/// Signs and verifies bearer tokens
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_seconds: i64,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_seconds: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl_seconds: i64::try_from(ttl_seconds).unwrap_or(i64::MAX),
        }
    }

    /// Issue a token for a user
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            iat: now,
            exp: now.saturating_add(self.ttl_seconds),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| SwapError::Other(anyhow::anyhow!("Failed to sign token: {}", e)))
    }

    /// Verify a token and extract the caller identity
    pub fn verify(&self, token: &str) -> Result<AuthUser> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            debug!("Rejected token: {}", e);
            SwapError::Unauthenticated("Invalid or expired token".to_string())
        })?;

        Ok(AuthUser {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// User registration, login and token verification
pub struct CredentialService {
    db: Database,
    tokens: TokenIssuer,
    bcrypt_cost: u32,
}

impl CredentialService {
    pub fn new(db: Database, jwt_secret: &str, token_ttl_seconds: u64, bcrypt_cost: u32) -> Self {
        Self {
            db,
            tokens: TokenIssuer::new(jwt_secret, token_ttl_seconds),
            bcrypt_cost,
        }
    }

    /// Register a new account
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let name = name.trim();
        let email = normalize_email(email);

        if name.is_empty() {
            return Err(SwapError::InvalidInput("Name is required".to_string()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(SwapError::InvalidInput("A valid email is required".to_string()));
        }
        if password.trim().is_empty() {
            return Err(SwapError::InvalidInput("Password is required".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SwapError::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if self.db.find_user_by_email(&email).await?.is_some() {
            return Err(SwapError::UserExists(email));
        }

        let password_hash = hash_password(password.to_string(), self.bcrypt_cost).await?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email,
            password_hash,
            created_at: Utc::now(),
        };

        // The unique index still guards against a concurrent registration.
        self.db.create_user(&user).await?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    /// Check credentials and issue a token
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let email = normalize_email(email);

        let user = self
            .db
            .find_user_by_email(&email)
            .await?
            .ok_or(SwapError::InvalidCredentials)?;

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(SwapError::InvalidCredentials);
        }

        info!("User {} logged in", user.id);
        self.issue_token(&user)
    }

    pub fn issue_token(&self, user: &User) -> Result<String> {
        self.tokens.issue(user)
    }

    pub fn verify_token(&self, token: &str) -> Result<AuthUser> {
        self.tokens.verify(token)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_password(password: String, cost: u32) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| SwapError::Password(e.to_string()))?
        .map_err(|e| SwapError::Password(e.to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| SwapError::Password(e.to_string()))?
        .map_err(|e| SwapError::Password(e.to_string()))
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    Arc<CredentialService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| SwapError::Unauthenticated("No token provided".to_string()))?;

        let token = header
            .to_str()
            .ok()
            .and_then(bearer_token)
            .ok_or_else(|| SwapError::Unauthenticated("Malformed authorization header".to_string()))?;

        let credentials = Arc::<CredentialService>::from_ref(state);
        Ok(credentials.verify_token(token)?)
    }
}
