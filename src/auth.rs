use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, NaiveDateTime, Utc};
use rand::RngCore;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::error::{AppError, FieldError, Result};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Passwords and tokens
// ---------------------------------------------------------------------------

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| AppError::Other(e.to_string()))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Other(e.to_string()))?;
    Ok(hash.to_string())
}

/// False for a wrong password and for a stored hash that does not parse.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Tokens are stored only as their SHA-256 digest.
fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn timestamp_in(delta: Duration) -> String {
    (Utc::now().naive_utc() + delta).format(TIMESTAMP_FORMAT).to_string()
}

fn is_expired(expires_at: &str) -> bool {
    match NaiveDateTime::parse_from_str(expires_at, TIMESTAMP_FORMAT) {
        Ok(t) => t <= Utc::now().naive_utc(),
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenTtl {
    pub access_minutes: i64,
    pub refresh_days: i64,
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self {
            access_minutes: 15,
            refresh_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub(crate) fn issue_tokens(conn: &Connection, user_id: i64, ttl: TokenTtl) -> Result<TokenPair> {
    let pair = TokenPair {
        access_token: generate_token(),
        refresh_token: generate_token(),
    };
    conn.execute(
        "INSERT INTO access_tokens (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![user_id, digest(&pair.access_token), timestamp_in(Duration::minutes(ttl.access_minutes))],
    )?;
    conn.execute(
        "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![user_id, digest(&pair.refresh_token), timestamp_in(Duration::days(ttl.refresh_days))],
    )?;
    Ok(pair)
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

/// Client address and agent recorded alongside security events.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub fn audit(
    conn: &Connection,
    user_id: i64,
    action: &str,
    meta: &RequestMeta,
    metadata: Option<serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (user_id, action, ip_address, user_agent, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            user_id,
            action,
            meta.ip,
            meta.user_agent,
            metadata.map(|m| m.to_string()),
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Register / login
// ---------------------------------------------------------------------------

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email_pattern().is_match(email)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub currency: String,
    pub subscription_tier: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserSummary,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone: Option<String>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

fn load_summary(conn: &Connection, user_id: i64) -> Result<UserSummary> {
    Ok(conn.query_row(
        "SELECT id, email, first_name, last_name, currency, subscription_tier FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(UserSummary {
                id: row.get(0)?,
                email: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                currency: row.get(4)?,
                subscription_tier: row.get(5)?,
            })
        },
    )?)
}

pub fn register(conn: &Connection, reg: &Registration, ttl: TokenTtl, meta: &RequestMeta) -> Result<AuthResponse> {
    let email = normalize_email(&reg.email);
    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new("password", "Password must be at least 8 characters"));
    }
    if reg.first_name.trim().is_empty() {
        errors.push(FieldError::new("firstName", "First name is required"));
    }
    if reg.last_name.trim().is_empty() {
        errors.push(FieldError::new("lastName", "Last name is required"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let existing: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [&email], |row| row.get(0))
        .optional()?;
    if existing.is_some() {
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&reg.password)?;
    let user_id: i64 = conn.query_row(
        "INSERT INTO users (email, password_hash, first_name, last_name, phone) \
         VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
        rusqlite::params![
            email,
            password_hash,
            reg.first_name.trim(),
            reg.last_name.trim(),
            reg.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        ],
        |row| row.get(0),
    )?;

    let tokens = issue_tokens(conn, user_id, ttl)?;
    audit(conn, user_id, "user_registered", meta, None)?;
    info!(user_id, "user registered");

    Ok(AuthResponse {
        user: load_summary(conn, user_id)?,
        tokens,
    })
}

pub fn login(
    conn: &Connection,
    email: &str,
    password: &str,
    ttl: TokenTtl,
    meta: &RequestMeta,
) -> Result<AuthResponse> {
    let email = normalize_email(email);
    let mut errors = Vec::new();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let found: Option<(i64, String, bool)> = conn
        .query_row(
            "SELECT id, password_hash, is_active FROM users WHERE email = ?1 AND deleted_at IS NULL",
            [&email],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((user_id, password_hash, is_active)) = found else {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };
    if !is_active {
        return Err(AppError::Forbidden("Account is deactivated".to_string()));
    }
    if !verify_password(password, &password_hash) {
        audit(
            conn,
            user_id,
            "login_failed",
            meta,
            Some(serde_json::json!({ "reason": "invalid_password" })),
        )?;
        warn!(user_id, "login failed");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let tokens = issue_tokens(conn, user_id, ttl)?;
    conn.execute("UPDATE users SET last_login = datetime('now') WHERE id = ?1", [user_id])?;
    audit(conn, user_id, "login_success", meta, None)?;
    info!(user_id, "login succeeded");

    Ok(AuthResponse {
        user: load_summary(conn, user_id)?,
        tokens,
    })
}

// ---------------------------------------------------------------------------
// Token lifecycle
// ---------------------------------------------------------------------------

/// Exchange a live refresh token for a new pair. The presented token is
/// revoked, so each refresh token works once.
pub fn refresh(conn: &mut Connection, refresh_token: Option<&str>, ttl: TokenTtl) -> Result<TokenPair> {
    let token = refresh_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Refresh token required".to_string()))?;
    let token_hash = digest(token);

    let tx = conn.transaction()?;
    let found: Option<(i64, String)> = tx
        .query_row(
            "SELECT user_id, expires_at FROM refresh_tokens WHERE token_hash = ?1 AND revoked = 0",
            [&token_hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let user_id = match found {
        Some((user_id, expires_at)) if !is_expired(&expires_at) => user_id,
        _ => return Err(AppError::Unauthorized("Invalid refresh token".to_string())),
    };

    tx.execute("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1", [&token_hash])?;
    let pair = issue_tokens(&tx, user_id, ttl)?;
    tx.commit()?;
    Ok(pair)
}

pub fn logout(conn: &Connection, refresh_token: Option<&str>) -> Result<()> {
    if let Some(token) = refresh_token.map(str::trim).filter(|t| !t.is_empty()) {
        conn.execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1",
            [digest(token)],
        )?;
    }
    Ok(())
}

pub const RESET_MESSAGE: &str = "If the email exists, a reset link has been sent";

/// Same answer whether or not the address is registered.
pub fn forgot_password(conn: &Connection, email: &str) -> Result<&'static str> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1 AND deleted_at IS NULL",
            [normalize_email(email)],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(user_id) = found {
        info!(user_id, "password reset requested");
    }
    Ok(RESET_MESSAGE)
}

// ---------------------------------------------------------------------------
// Request authentication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub subscription_tier: String,
}

/// Resolve an `Authorization` header value to the calling user.
pub fn authenticate(conn: &Connection, authorization: Option<&str>) -> Result<AuthUser> {
    let token = authorization
        .and_then(|h| h.split_whitespace().nth(1))
        .ok_or_else(|| AppError::Unauthorized("Access token required".to_string()))?;

    let found: Option<(i64, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM access_tokens WHERE token_hash = ?1",
            [digest(token)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((user_id, expires_at)) = found else {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    };
    if is_expired(&expires_at) {
        return Err(AppError::Unauthorized("Token expired".to_string()));
    }

    let user: Option<(AuthUser, bool)> = conn
        .query_row(
            "SELECT id, email, subscription_tier, is_active FROM users WHERE id = ?1 AND deleted_at IS NULL",
            [user_id],
            |row| {
                Ok((
                    AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        subscription_tier: row.get(2)?,
                    },
                    row.get(3)?,
                ))
            },
        )
        .optional()?;
    match user {
        None => Err(AppError::Unauthorized("User not found".to_string())),
        Some((_, false)) => Err(AppError::Forbidden("Account is deactivated".to_string())),
        Some((user, true)) => Ok(user),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::test_db;

    fn registration(email: &str, password: &str) -> Registration {
        Registration {
            email: email.into(),
            password: password.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone: None,
        }
    }

    fn bearer(token: &str) -> String {
        format!("Bearer {token}")
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn test_tokens_are_stored_hashed() {
        let (_dir, conn) = test_db();
        let resp = register(&conn, &registration("ada@example.com", "password123"), TokenTtl::default(), &RequestMeta::default()).unwrap();
        assert_eq!(resp.tokens.access_token.len(), 64);
        let stored: String = conn
            .query_row("SELECT token_hash FROM access_tokens", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, resp.tokens.access_token);
        assert_eq!(stored, digest(&resp.tokens.access_token));
    }

    #[test]
    fn test_register_validates_all_fields() {
        let (_dir, conn) = test_db();
        let mut reg = registration("not-an-email", "short");
        reg.first_name = " ".into();
        match register(&conn, &reg, TokenTtl::default(), &RequestMeta::default()) {
            Err(AppError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "password", "firstName"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_register_rejects_duplicate_email() {
        let (_dir, conn) = test_db();
        let ttl = TokenTtl::default();
        let meta = RequestMeta::default();
        let resp = register(&conn, &registration("Ada@Example.com ", "password123"), ttl, &meta).unwrap();
        assert_eq!(resp.user.email, "ada@example.com");
        assert_eq!(resp.user.subscription_tier, "free");
        assert!(matches!(
            register(&conn, &registration("ada@example.com", "password123"), ttl, &meta),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn test_login_and_audit_trail() {
        let (_dir, conn) = test_db();
        let ttl = TokenTtl::default();
        let meta = RequestMeta { ip: Some("127.0.0.1".into()), user_agent: Some("test".into()) };
        register(&conn, &registration("ada@example.com", "password123"), ttl, &meta).unwrap();

        assert!(matches!(
            login(&conn, "ada@example.com", "nope-nope", ttl, &meta),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            login(&conn, "nobody@example.com", "password123", ttl, &meta),
            Err(AppError::Unauthorized(_))
        ));
        let resp = login(&conn, "ADA@example.com", "password123", ttl, &meta).unwrap();
        assert_eq!(resp.user.first_name, "Ada");

        let actions: Vec<String> = conn
            .prepare("SELECT action FROM audit_log ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(actions, vec!["user_registered", "login_failed", "login_success"]);
        let last_login: Option<String> = conn
            .query_row("SELECT last_login FROM users WHERE id = ?1", [resp.user.id], |r| r.get(0))
            .unwrap();
        assert!(last_login.is_some());
    }

    #[test]
    fn test_login_inactive_account() {
        let (_dir, conn) = test_db();
        let ttl = TokenTtl::default();
        let meta = RequestMeta::default();
        register(&conn, &registration("ada@example.com", "password123"), ttl, &meta).unwrap();
        conn.execute("UPDATE users SET is_active = 0", []).unwrap();
        assert!(matches!(
            login(&conn, "ada@example.com", "password123", ttl, &meta),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_refresh_rotates_and_revokes() {
        let (_dir, mut conn) = test_db();
        let ttl = TokenTtl::default();
        let first = register(&conn, &registration("ada@example.com", "password123"), ttl, &RequestMeta::default())
            .unwrap()
            .tokens;
        let second = refresh(&mut conn, Some(&first.refresh_token), ttl).unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(matches!(
            refresh(&mut conn, Some(&first.refresh_token), ttl),
            Err(AppError::Unauthorized(_))
        ));
        assert!(refresh(&mut conn, Some(&second.refresh_token), ttl).is_ok());
        assert!(matches!(refresh(&mut conn, None, ttl), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_logout_revokes_refresh_token() {
        let (_dir, mut conn) = test_db();
        let ttl = TokenTtl::default();
        let tokens = register(&conn, &registration("ada@example.com", "password123"), ttl, &RequestMeta::default())
            .unwrap()
            .tokens;
        logout(&conn, Some(&tokens.refresh_token)).unwrap();
        logout(&conn, None).unwrap();
        assert!(refresh(&mut conn, Some(&tokens.refresh_token), ttl).is_err());
    }

    #[test]
    fn test_forgot_password_is_constant() {
        let (_dir, conn) = test_db();
        register(&conn, &registration("ada@example.com", "password123"), TokenTtl::default(), &RequestMeta::default()).unwrap();
        assert_eq!(forgot_password(&conn, "ada@example.com").unwrap(), RESET_MESSAGE);
        assert_eq!(forgot_password(&conn, "ghost@example.com").unwrap(), RESET_MESSAGE);
    }

    #[test]
    fn test_authenticate() {
        let (_dir, conn) = test_db();
        let resp = register(&conn, &registration("ada@example.com", "password123"), TokenTtl::default(), &RequestMeta::default()).unwrap();
        let header = bearer(&resp.tokens.access_token);

        let user = authenticate(&conn, Some(&header)).unwrap();
        assert_eq!(user.id, resp.user.id);
        assert_eq!(user.subscription_tier, "free");

        let msg = |r: Result<AuthUser>| r.unwrap_err().to_string();
        assert_eq!(msg(authenticate(&conn, None)), "Access token required");
        assert_eq!(msg(authenticate(&conn, Some("Bearer"))), "Access token required");
        assert_eq!(msg(authenticate(&conn, Some("Bearer deadbeef"))), "Invalid token");

        conn.execute("UPDATE users SET is_active = 0", []).unwrap();
        assert!(matches!(authenticate(&conn, Some(&header)), Err(AppError::Forbidden(_))));
        conn.execute("UPDATE users SET is_active = 1, deleted_at = datetime('now')", []).unwrap();
        assert_eq!(msg(authenticate(&conn, Some(&header))), "User not found");
    }

    #[test]
    fn test_authenticate_expired_token() {
        let (_dir, conn) = test_db();
        let user_id = crate::db::testing::add_user(&conn, "a@example.com");
        let ttl = TokenTtl { access_minutes: -1, refresh_days: 7 };
        let tokens = issue_tokens(&conn, user_id, ttl).unwrap();
        let err = authenticate(&conn, Some(&bearer(&tokens.access_token))).unwrap_err();
        assert_eq!(err.to_string(), "Token expired");
    }
}
