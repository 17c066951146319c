use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS subscription_plans (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    price_monthly REAL NOT NULL DEFAULT 0,
    price_yearly REAL NOT NULL DEFAULT 0,
    features TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    phone TEXT,
    currency TEXT NOT NULL DEFAULT 'USD',
    timezone TEXT NOT NULL DEFAULT 'UTC',
    subscription_tier TEXT NOT NULL DEFAULT 'free',
    subscription_status TEXT NOT NULL DEFAULT 'active',
    subscription_ends_at TEXT,
    email_verified INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    deleted_at TEXT,
    last_login TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (subscription_tier) REFERENCES subscription_plans(name)
);

CREATE TABLE IF NOT EXISTS access_tokens (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS refresh_tokens (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    transaction_date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount REAL NOT NULL,
    category TEXT,
    transaction_type TEXT NOT NULL,
    payment_method TEXT,
    merchant TEXT,
    notes TEXT,
    tags TEXT,
    is_recurring INTEGER NOT NULL DEFAULT 0,
    recurring_frequency TEXT,
    source_file TEXT,
    imported_at TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_dedup
    ON transactions (user_id, transaction_date, amount, description);

CREATE INDEX IF NOT EXISTS idx_transactions_user_date
    ON transactions (user_id, transaction_date);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    ip_address TEXT,
    user_agent TEXT,
    metadata TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id)
);
";

// (name, display_name, price_monthly, price_yearly, max_transactions)
const DEFAULT_PLANS: &[(&str, &str, f64, f64, Option<i64>)] = &[
    ("free", "Free", 0.0, 0.0, Some(1000)),
    ("premium", "Premium", 9.99, 99.0, Some(50_000)),
    ("enterprise", "Enterprise", 29.99, 299.0, None),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM subscription_plans", [], |row| row.get(0))?;
    if count == 0 {
        for plan in DEFAULT_PLANS {
            let features = serde_json::json!({ "max_transactions": plan.4 }).to_string();
            conn.execute(
                "INSERT INTO subscription_plans (name, display_name, price_monthly, price_yearly, features) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![plan.0, plan.1, plan.2, plan.3, features],
            )?;
        }
    }
    Ok(())
}

/// Shared fixture for module tests: a fresh database with one user.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    pub fn add_user(conn: &Connection, email: &str) -> i64 {
        conn.execute(
            "INSERT INTO users (email, password_hash, first_name, last_name) VALUES (?1, 'x', 'Test', 'User')",
            [email],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    pub fn add_txn(
        conn: &Connection,
        user_id: i64,
        date: &str,
        description: &str,
        amount: f64,
        category: Option<&str>,
        txn_type: &str,
    ) -> i64 {
        conn.execute(
            "INSERT INTO transactions (user_id, transaction_date, description, amount, category, transaction_type) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_id, date, description, amount, category, txn_type],
        )
        .unwrap();
        conn.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_db;
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "users",
            "subscription_plans",
            "access_tokens",
            "refresh_tokens",
            "transactions",
            "audit_log",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM subscription_plans", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_free_plan_has_transaction_limit() {
        let (_dir, conn) = test_db();
        let features: String = conn
            .query_row("SELECT features FROM subscription_plans WHERE name = 'free'", [], |r| r.get(0))
            .unwrap();
        let v: serde_json::Value = serde_json::from_str(&features).unwrap();
        assert_eq!(v["max_transactions"], 1000);
    }

    #[test]
    fn test_duplicate_transactions_are_allowed_by_storage() {
        let (_dir, conn) = test_db();
        let user = testing::add_user(&conn, "a@example.com");
        testing::add_txn(&conn, user, "2024-01-05", "X", -10.0, Some("Other"), "expense");
        testing::add_txn(&conn, user, "2024-01-05", "X", -10.0, Some("Other"), "expense");
        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }
}
