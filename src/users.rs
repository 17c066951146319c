use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{audit, hash_password, verify_password, RequestMeta, MIN_PASSWORD_LEN};
use crate::error::{AppError, FieldError, Result};

// ---------------------------------------------------------------------------
// Subscription tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Premium,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
        }
    }
}

impl FromStr for Tier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(AppError::BadRequest(format!("Unknown subscription tier: {other}"))),
        }
    }
}

/// Refuse new transactions once the plan's `max_transactions` is reached.
/// Plans without a limit never refuse.
pub fn check_transaction_limit(conn: &Connection, user_id: i64, tier: &str) -> Result<()> {
    let features: Option<String> = conn
        .query_row("SELECT features FROM subscription_plans WHERE name = ?1", [tier], |row| row.get(0))
        .optional()?;
    let Some(features) = features else {
        return Err(AppError::Internal("Invalid subscription plan"));
    };
    let features: serde_json::Value = serde_json::from_str(&features)?;
    let Some(limit) = features.get("max_transactions").and_then(serde_json::Value::as_i64) else {
        return Ok(());
    };
    let current: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    if current >= limit {
        return Err(AppError::LimitReached { limit, current });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub currency: String,
    pub timezone: String,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub subscription_ends_at: Option<String>,
    pub email_verified: bool,
    pub created_at: Option<String>,
    pub last_login: Option<String>,
}

pub fn profile(conn: &Connection, user_id: i64) -> Result<Profile> {
    conn.query_row(
        "SELECT id, email, first_name, last_name, phone, currency, timezone, subscription_tier, \
         subscription_status, subscription_ends_at, email_verified, created_at, last_login \
         FROM users WHERE id = ?1",
        [user_id],
        |row| {
            Ok(Profile {
                id: row.get(0)?,
                email: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                phone: row.get(4)?,
                currency: row.get(5)?,
                timezone: row.get(6)?,
                subscription_tier: row.get(7)?,
                subscription_status: row.get(8)?,
                subscription_ends_at: row.get(9)?,
                email_verified: row.get(10)?,
                created_at: row.get(11)?,
                last_login: row.get(12)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub currency: Option<String>,
    pub timezone: Option<String>,
}

pub fn update_profile(conn: &Connection, user_id: i64, patch: &ProfilePatch) -> Result<Profile> {
    let trimmed = |v: &Option<String>| v.as_deref().map(str::trim).map(str::to_string);
    let first_name = trimmed(&patch.first_name);
    let last_name = trimmed(&patch.last_name);
    let currency = trimmed(&patch.currency).map(|c| c.to_ascii_uppercase());

    let mut errors = Vec::new();
    if first_name.as_deref().is_some_and(str::is_empty) {
        errors.push(FieldError::new("firstName", "First name cannot be empty"));
    }
    if last_name.as_deref().is_some_and(str::is_empty) {
        errors.push(FieldError::new("lastName", "Last name cannot be empty"));
    }
    if let Some(c) = &currency {
        if c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_alphabetic()) {
            errors.push(FieldError::new("currency", "Currency must be a 3-letter code"));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    conn.execute(
        "UPDATE users SET \
         first_name = COALESCE(?1, first_name), \
         last_name = COALESCE(?2, last_name), \
         phone = COALESCE(?3, phone), \
         currency = COALESCE(?4, currency), \
         timezone = COALESCE(?5, timezone) \
         WHERE id = ?6",
        rusqlite::params![
            first_name,
            last_name,
            trimmed(&patch.phone),
            currency,
            trimmed(&patch.timezone).filter(|t| !t.is_empty()),
            user_id,
        ],
    )?;
    profile(conn, user_id)
}

fn stored_hash(conn: &Connection, user_id: i64) -> Result<String> {
    conn.query_row("SELECT password_hash FROM users WHERE id = ?1", [user_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

pub fn change_password(
    conn: &Connection,
    user_id: i64,
    current: &str,
    new: &str,
    meta: &RequestMeta,
) -> Result<()> {
    let mut errors = Vec::new();
    if current.is_empty() {
        errors.push(FieldError::new("currentPassword", "Current password required"));
    }
    if new.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new("newPassword", "New password must be at least 8 characters"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }
    if !verify_password(current, &stored_hash(conn, user_id)?) {
        return Err(AppError::Unauthorized("Current password is incorrect".to_string()));
    }

    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        rusqlite::params![hash_password(new)?, user_id],
    )?;
    audit(conn, user_id, "password_changed", meta, None)?;
    info!(user_id, "password changed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Statistics and subscription
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub transaction_count: i64,
    pub first_transaction: Option<String>,
    pub last_transaction: Option<String>,
}

pub fn statistics(conn: &Connection, user_id: i64) -> Result<Statistics> {
    Ok(conn.query_row(
        "SELECT COUNT(*), MIN(transaction_date), MAX(transaction_date) FROM transactions WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(Statistics {
                transaction_count: row.get(0)?,
                first_transaction: row.get(1)?,
                last_transaction: row.get(2)?,
            })
        },
    )?)
}

#[derive(Debug, Serialize)]
pub struct Subscription {
    pub subscription_tier: String,
    pub subscription_status: String,
    pub subscription_ends_at: Option<String>,
    pub display_name: String,
    pub price_monthly: f64,
    pub price_yearly: f64,
    pub features: serde_json::Value,
}

pub fn subscription(conn: &Connection, user_id: i64) -> Result<Subscription> {
    let row: Option<(Subscription, String)> = conn
        .query_row(
            "SELECT u.subscription_tier, u.subscription_status, u.subscription_ends_at, \
             p.display_name, p.price_monthly, p.price_yearly, p.features \
             FROM users u JOIN subscription_plans p ON u.subscription_tier = p.name \
             WHERE u.id = ?1",
            [user_id],
            |row| {
                Ok((
                    Subscription {
                        subscription_tier: row.get(0)?,
                        subscription_status: row.get(1)?,
                        subscription_ends_at: row.get(2)?,
                        display_name: row.get(3)?,
                        price_monthly: row.get(4)?,
                        price_yearly: row.get(5)?,
                        features: serde_json::Value::Null,
                    },
                    row.get(6)?,
                ))
            },
        )
        .optional()?;
    let Some((mut sub, features)) = row else {
        return Err(AppError::NotFound("Subscription not found".to_string()));
    };
    sub.features = serde_json::from_str(&features)?;
    Ok(sub)
}

/// Switch plans without taking payment. The new period runs one month.
pub fn upgrade(conn: &Connection, user_id: i64, plan: &str, meta: &RequestMeta) -> Result<Tier> {
    let tier = match plan.parse::<Tier>() {
        Ok(t @ (Tier::Premium | Tier::Enterprise)) => t,
        _ => return Err(AppError::Validation(vec![FieldError::new("plan", "Invalid plan")])),
    };
    conn.execute(
        "UPDATE users SET subscription_tier = ?1, subscription_status = 'active', \
         subscription_ends_at = datetime('now', '+1 month') WHERE id = ?2",
        rusqlite::params![tier.as_str(), user_id],
    )?;
    audit(
        conn,
        user_id,
        "subscription_upgraded",
        meta,
        Some(serde_json::json!({ "new_plan": tier.as_str() })),
    )?;
    info!(user_id, plan = tier.as_str(), "subscription upgraded");
    Ok(tier)
}

// ---------------------------------------------------------------------------
// Account deletion and activity
// ---------------------------------------------------------------------------

/// Soft delete: the row stays for the audit trail, every session ends.
pub fn delete_account(conn: &mut Connection, user_id: i64, password: &str, meta: &RequestMeta) -> Result<()> {
    if password.is_empty() {
        return Err(AppError::Validation(vec![FieldError::new(
            "password",
            "Password required for account deletion",
        )]));
    }
    if !verify_password(password, &stored_hash(conn, user_id)?) {
        return Err(AppError::Unauthorized("Incorrect password".to_string()));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE users SET deleted_at = datetime('now'), is_active = 0 WHERE id = ?1",
        [user_id],
    )?;
    tx.execute("UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1", [user_id])?;
    tx.execute("DELETE FROM access_tokens WHERE user_id = ?1", [user_id])?;
    audit(&tx, user_id, "account_deleted", meta, None)?;
    tx.commit()?;
    info!(user_id, "account deleted");
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct Activity {
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ActivityPagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub activities: Vec<Activity>,
    pub pagination: ActivityPagination,
}

pub fn activity(conn: &Connection, user_id: i64, page: Option<i64>, limit: Option<i64>) -> Result<ActivityPage> {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, 100);

    let mut stmt = conn.prepare(
        "SELECT action, ip_address, user_agent, metadata, created_at FROM audit_log \
         WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let activities = stmt
        .query_map(rusqlite::params![user_id, limit, (page - 1) * limit], |row| {
            let metadata: Option<String> = row.get(3)?;
            Ok(Activity {
                action: row.get(0)?,
                ip_address: row.get(1)?,
                user_agent: row.get(2)?,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM audit_log WHERE user_id = ?1", [user_id], |row| {
        row.get(0)
    })?;

    Ok(ActivityPage {
        activities,
        pagination: ActivityPagination { page, limit, total },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_txn, add_user, test_db};

    fn user_with_password(conn: &Connection, email: &str, password: &str) -> i64 {
        let id = add_user(conn, email);
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            rusqlite::params![hash_password(password).unwrap(), id],
        )
        .unwrap();
        id
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Premium".parse::<Tier>().unwrap(), Tier::Premium);
        assert_eq!(" enterprise ".parse::<Tier>().unwrap(), Tier::Enterprise);
        assert!("gold".parse::<Tier>().is_err());
        assert_eq!(Tier::Free.as_str(), "free");
    }

    #[test]
    fn test_transaction_limit() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        conn.execute(
            "UPDATE subscription_plans SET features = '{\"max_transactions\": 2}' WHERE name = 'free'",
            [],
        )
        .unwrap();
        assert!(check_transaction_limit(&conn, user, "free").is_ok());
        add_txn(&conn, user, "2025-01-01", "A", -1.0, None, "expense");
        add_txn(&conn, user, "2025-01-02", "B", -1.0, None, "expense");
        match check_transaction_limit(&conn, user, "free") {
            Err(AppError::LimitReached { limit, current }) => assert_eq!((limit, current), (2, 2)),
            other => panic!("expected limit error, got {other:?}"),
        }
        assert!(check_transaction_limit(&conn, user, "enterprise").is_ok());
        assert!(matches!(
            check_transaction_limit(&conn, user, "platinum"),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn test_profile_update() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let patch = ProfilePatch {
            first_name: Some(" Grace ".into()),
            currency: Some("eur".into()),
            ..Default::default()
        };
        let p = update_profile(&conn, user, &patch).unwrap();
        assert_eq!(p.first_name, "Grace");
        assert_eq!(p.last_name, "User");
        assert_eq!(p.currency, "EUR");
        assert_eq!(p.timezone, "UTC");

        let bad = ProfilePatch { currency: Some("EURO".into()), last_name: Some("".into()), ..Default::default() };
        match update_profile(&conn, user, &bad) {
            Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_profile_missing_user() {
        let (_dir, conn) = test_db();
        assert!(matches!(profile(&conn, 999), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_change_password() {
        let (_dir, conn) = test_db();
        let user = user_with_password(&conn, "a@example.com", "old-password");
        let meta = RequestMeta::default();
        assert!(matches!(
            change_password(&conn, user, "wrong-password", "new-password", &meta),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            change_password(&conn, user, "old-password", "short", &meta),
            Err(AppError::Validation(_))
        ));
        change_password(&conn, user, "old-password", "new-password", &meta).unwrap();
        assert!(verify_password("new-password", &stored_hash(&conn, user).unwrap()));
    }

    #[test]
    fn test_statistics() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        assert_eq!(
            statistics(&conn, user).unwrap(),
            Statistics { transaction_count: 0, first_transaction: None, last_transaction: None }
        );
        add_txn(&conn, user, "2025-03-01", "A", -1.0, None, "expense");
        add_txn(&conn, user, "2024-11-15", "B", -1.0, None, "expense");
        let stats = statistics(&conn, user).unwrap();
        assert_eq!(stats.transaction_count, 2);
        assert_eq!(stats.first_transaction.as_deref(), Some("2024-11-15"));
        assert_eq!(stats.last_transaction.as_deref(), Some("2025-03-01"));
    }

    #[test]
    fn test_subscription_and_upgrade() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let sub = subscription(&conn, user).unwrap();
        assert_eq!(sub.display_name, "Free");
        assert_eq!(sub.features["max_transactions"], 1000);

        let meta = RequestMeta::default();
        assert!(matches!(upgrade(&conn, user, "free", &meta), Err(AppError::Validation(_))));
        assert_eq!(upgrade(&conn, user, "enterprise", &meta).unwrap(), Tier::Enterprise);
        let sub = subscription(&conn, user).unwrap();
        assert_eq!(sub.subscription_tier, "enterprise");
        assert!(sub.subscription_ends_at.is_some());
        assert!(sub.features["max_transactions"].is_null());
    }

    #[test]
    fn test_delete_account_soft_deletes_and_revokes() {
        let (_dir, mut conn) = test_db();
        let user = user_with_password(&conn, "a@example.com", "password123");
        conn.execute(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES (?1, 'h', '2999-01-01 00:00:00')",
            [user],
        )
        .unwrap();
        let meta = RequestMeta::default();
        assert!(matches!(
            delete_account(&mut conn, user, "bad-password", &meta),
            Err(AppError::Unauthorized(_))
        ));
        delete_account(&mut conn, user, "password123", &meta).unwrap();

        let (deleted_at, active): (Option<String>, bool) = conn
            .query_row("SELECT deleted_at, is_active FROM users WHERE id = ?1", [user], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert!(deleted_at.is_some());
        assert!(!active);
        let revoked: bool = conn
            .query_row("SELECT revoked FROM refresh_tokens WHERE user_id = ?1", [user], |r| r.get(0))
            .unwrap();
        assert!(revoked);
    }

    #[test]
    fn test_activity_pagination() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let meta = RequestMeta { ip: Some("10.0.0.1".into()), user_agent: None };
        for action in ["one", "two", "three"] {
            audit(&conn, user, action, &meta, Some(serde_json::json!({ "n": action }))).unwrap();
        }
        let page = activity(&conn, user, Some(1), Some(2)).unwrap();
        assert_eq!(page.pagination, ActivityPagination { page: 1, limit: 2, total: 3 });
        assert_eq!(page.activities[0].action, "three");
        assert_eq!(page.activities[0].metadata.as_ref().unwrap()["n"], "three");
        let page = activity(&conn, user, Some(2), Some(2)).unwrap();
        assert_eq!(page.activities.len(), 1);
        assert_eq!(page.activities[0].ip_address.as_deref(), Some("10.0.0.1"));
    }
}
