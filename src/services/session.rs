//! Session management: JWT access tokens, refresh tokens, and OAuth state

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub exp: i64,    // expiry timestamp
    pub iat: i64,    // issued at
}

#[derive(Debug)]
pub enum SessionError {
    InvalidToken,
    Expired,
    DatabaseError(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidToken => write!(f, "Invalid token"),
            SessionError::Expired => write!(f, "Token expired"),
            SessionError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

const ACCESS_TOKEN_EXPIRY_MINUTES: i64 = 10;
const REFRESH_TOKEN_EXPIRY_DAYS: i64 = 30;
const OAUTH_STATE_EXPIRY_MINUTES: i64 = 10;

/// Create a JWT access token valid for 10 minutes
pub fn create_access_token(user_id: i64, secret: &[u8]) -> Result<String, SessionError> {
    let now = Utc::now();
    let exp = now + Duration::minutes(ACCESS_TOKEN_EXPIRY_MINUTES);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| SessionError::InvalidToken)
}

/// Validate a JWT access token and return the user_id
pub fn validate_access_token(token: &str, secret: &[u8]) -> Result<i64, SessionError> {
    // Explicitly validate with HS256 algorithm only to prevent algorithm confusion attacks
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub", "iat"]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
            _ => SessionError::InvalidToken,
        })?;

    token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| SessionError::InvalidToken)
}

/// Random 32-byte token as hex
fn random_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes.as_slice())
}

/// Create a random refresh token and store it in the database
pub async fn create_refresh_token(user_id: i64, db: &PgPool) -> Result<String, SessionError> {
    let token = random_token();
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(&token)
    .bind(user_id)
    .bind(expires_at)
    .execute(db)
    .await
    .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    Ok(token)
}

/// Rotate a refresh token: validate the old token, delete it, and create a new one.
/// Returns (user_id, new_refresh_token) on success.
/// This prevents token reuse attacks - each refresh token can only be used once.
/// Uses a transaction to ensure the user isn't logged out if new token creation fails.
pub async fn rotate_refresh_token(
    old_token: &str,
    db: &PgPool,
) -> Result<(i64, String), SessionError> {
    let now = Utc::now();

    let mut tx = db
        .begin()
        .await
        .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    // Check and delete the old token atomically to prevent race conditions
    // If two requests try to use the same token, only one will succeed
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        DELETE FROM refresh_tokens
        WHERE id = $1 AND expires_at > $2
        RETURNING user_id
        "#,
    )
    .bind(old_token)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    let user_id = row.ok_or(SessionError::InvalidToken)?.0;

    let new_token = random_token();
    let expires_at = Utc::now() + Duration::days(REFRESH_TOKEN_EXPIRY_DAYS);

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(&new_token)
    .bind(user_id)
    .bind(expires_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    // Commit - if this fails, both operations are rolled back
    tx.commit()
        .await
        .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    Ok((user_id, new_token))
}

/// Delete a specific refresh token (logout from one device)
pub async fn revoke_refresh_token(token: &str, db: &PgPool) -> Result<(), SessionError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
        .bind(token)
        .execute(db)
        .await
        .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    Ok(())
}

/// Clean up expired refresh tokens (call periodically via cron)
pub async fn cleanup_expired_tokens(db: &PgPool) -> Result<u64, SessionError> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
        .execute(db)
        .await
        .map_err(|e| SessionError::DatabaseError(e.to_string()))?;

    Ok(result.rows_affected())
}

// OAuth state handling. Each authorize redirect stores its CSRF state and
// PKCE verifier here, plus the session user when an already-signed-in user
// is connecting an additional account.

pub async fn save_oauth_state(
    db: &PgPool,
    state: &str,
    code_verifier: &str,
    user_id: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO oauth_states (state, code_verifier, user_id)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(state)
    .bind(code_verifier)
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Consume an OAuth state, returning the PKCE verifier and the initiating
/// user (if the connect started from a signed-in session).
/// Atomic DELETE + RETURNING prevents race conditions where two requests
/// could get the same state before either deletes it.
pub async fn take_oauth_state(
    db: &PgPool,
    state: &str,
) -> Result<Option<(String, Option<i64>)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        DELETE FROM oauth_states
        WHERE state = $1 AND created_at > NOW() - INTERVAL '10 minutes'
        RETURNING code_verifier, user_id
        "#,
    )
    .bind(state)
    .fetch_optional(db)
    .await
}

/// Clean up abandoned OAuth states (call periodically via cron)
pub async fn cleanup_expired_oauth_states(db: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM oauth_states WHERE created_at < NOW() - ($1::text || ' minutes')::interval",
    )
    .bind(OAUTH_STATE_EXPIRY_MINUTES.to_string())
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

// Hex encoding helper since we don't want to add another dependency
mod hex {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

    pub fn encode(bytes: &[u8]) -> String {
        let mut result = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            result.push(HEX_CHARS[(byte >> 4) as usize] as char);
            result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_access_token_round_trip() {
        let token = create_access_token(42, SECRET).unwrap();
        let user_id = validate_access_token(&token, SECRET).unwrap();
        assert_eq!(user_id, 42);
    }

    #[test]
    fn test_access_token_rejects_wrong_secret() {
        let token = create_access_token(42, SECRET).unwrap();
        assert!(matches!(
            validate_access_token(&token, b"other-secret"),
            Err(SessionError::InvalidToken)
        ));
    }

    #[test]
    fn test_access_token_rejects_garbage() {
        assert!(validate_access_token("not.a.jwt", SECRET).is_err());
    }

    #[test]
    fn test_random_tokens_are_unique_hex() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
