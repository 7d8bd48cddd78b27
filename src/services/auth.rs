//! Authentication service: password hashing, API tokens, login.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{User, UserRole};

/// Claims of an API token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: String,
    /// Digest of the password hash at issue time; a password change revokes the token.
    pub validation_check: String,
    pub exp: i64,
    pub iat: i64,
}

/// API token returned by `GET /api/v1/token`.
#[derive(Debug, Serialize)]
pub struct ApiToken {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Hash a plaintext password with argon2id.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {e}")))
}

/// Verify a plaintext password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| AppError::Internal(format!("Invalid hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn validation_check(user: &User) -> String {
    hex::encode(Sha256::digest(user.password_hash.as_bytes()))
}

/// Issue an HS512 API token for `user`.
pub fn generate_api_token(
    user: &User,
    jwt_secret: &str,
    expiry_secs: i64,
) -> Result<ApiToken, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.username.clone(),
        user_id: user.id.to_string(),
        validation_check: validation_check(user),
        exp: (now + Duration::seconds(expiry_secs)).timestamp(),
        iat: now.timestamp(),
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {e}")))?;

    Ok(ApiToken {
        token,
        token_type: "Token".to_string(),
        expires_in: expiry_secs,
    })
}

/// Validate a token's signature and expiry and return the claims.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS512);

    jsonwebtoken::decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AppError::Unauthorized)
}

/// Resolve the active user a token was issued to.
pub async fn authenticate_token(
    pool: &PgPool,
    token: &str,
    jwt_secret: &str,
) -> Result<User, AppError> {
    let claims = validate_token(token, jwt_secret)?;
    let user_id: Uuid = claims
        .user_id
        .parse()
        .map_err(|_| AppError::Unauthorized)?;

    let user = find_active_user(pool, user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if claims.validation_check != validation_check(&user) {
        return Err(AppError::Unauthorized);
    }
    Ok(user)
}

/// Create a new user with hashed password.
pub async fn create_user(
    pool: &PgPool,
    username: &str,
    email: &str,
    password: &str,
    role: UserRole,
) -> Result<User, AppError> {
    let password_hash = hash_password(password)?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        RETURNING id, username, email, password_hash, role, is_active,
                  last_login, created_at, updated_at
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(role)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict("Username or email already exists".to_string())
        }
        _ => AppError::Database(e),
    })?;

    Ok(user)
}

/// Authenticate with the login form.
///
/// Unknown users, accounts without a password and wrong passwords all fail
/// with the same [`AppError::InvalidCredentials`]. A disabled account is only
/// reported once the password has been verified.
pub async fn login(
    pool: &PgPool,
    username: &str,
    password: &str,
    client_ip: &str,
) -> Result<User, AppError> {
    let username = strip_nul(username);
    let password = strip_nul(password);

    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, role, is_active, last_login, \
         created_at, updated_at FROM users WHERE username = $1",
    )
    .bind(&username)
    .fetch_optional(pool)
    .await?;

    let Some(user) = user else {
        tracing::warn!(target: "audit", username = %username, ip = %client_ip, "Login failed: unknown user");
        return Err(AppError::InvalidCredentials);
    };

    if user.password_hash.is_empty() || !verify_password(&password, &user.password_hash)? {
        tracing::warn!(target: "audit", username = %username, ip = %client_ip, "Login failed: invalid password");
        return Err(AppError::InvalidCredentials);
    }

    if !user.is_active {
        tracing::warn!(target: "audit", username = %username, ip = %client_ip, "Login failed: account disabled");
        return Err(AppError::Forbidden("User account is disabled".to_string()));
    }

    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(pool)
        .await?;

    tracing::info!(target: "audit", username = %username, ip = %client_ip, "User logged in");
    Ok(user)
}

/// Find an active user by ID.
pub async fn find_active_user(pool: &PgPool, id: Uuid) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, role, is_active, last_login, \
         created_at, updated_at FROM users WHERE id = $1 AND is_active = true",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

fn strip_nul(input: &str) -> String {
    input.replace('\0', "")
}
