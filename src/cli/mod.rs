pub mod categorize;
pub mod groups;
pub mod import;
pub mod init;
pub mod report;
pub mod user;

use clap::{Parser, Subcommand};
use rusqlite::{Connection, OptionalExtension};

use crate::db::get_connection;
use crate::error::{AppError, Result};
use crate::settings::load_settings;

/// Open the configured database, refusing to create one implicitly.
pub(crate) fn open_db() -> Result<Connection> {
    let db_path = load_settings().db_path();
    if !db_path.exists() {
        return Err(AppError::Settings(format!(
            "No database found at {}\nRun `spendwise init` to create one.",
            db_path.display()
        )));
    }
    get_connection(&db_path)
}

/// Active user id and plan for an email address.
pub(crate) fn resolve_user(conn: &Connection, email: &str) -> Result<(i64, String)> {
    let email = crate::auth::normalize_email(email);
    conn.query_row(
        "SELECT id, subscription_tier FROM users WHERE email = ?1 AND is_active = 1 AND deleted_at IS NULL",
        [&email],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("No active user with email: {email}")))
}

#[derive(Parser)]
#[command(name = "spendwise", about = "Personal finance tracker: CSV import, categorization and spending analytics.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for spendwise data (default: platform data dir)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Run the REST API server.
    Serve {
        /// Address to listen on, e.g. 0.0.0.0:5000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Manage user accounts.
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Import a bank or credit-card CSV export for a user.
    Import {
        /// Path to the CSV file
        file: String,
        /// Email of the user who owns the transactions
        #[arg(long)]
        user: String,
        /// Sign convention: bank-statement or credit-card
        #[arg(long)]
        mode: Option<String>,
    },
    /// Re-run the keyword rules on uncategorized transactions.
    Categorize {
        #[arg(long)]
        user: String,
    },
    /// List uncategorized transactions grouped by merchant.
    Groups {
        #[arg(long)]
        user: String,
    },
    /// Assign one category to every uncategorized row of a merchant group.
    QuickCategorize {
        #[arg(long)]
        user: String,
        /// Merchant key as shown by `spendwise groups`
        merchant: String,
        /// Category to assign
        category: String,
    },
    /// Show KPIs and top spending categories.
    Report {
        #[arg(long)]
        user: String,
        /// Start date: YYYY-MM-DD
        #[arg(long = "from")]
        from_date: Option<String>,
        /// End date: YYYY-MM-DD
        #[arg(long = "to")]
        to_date: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a user account.
    Add {
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long = "first-name")]
        first_name: String,
        #[arg(long = "last-name")]
        last_name: String,
    },
    /// List user accounts.
    List,
}
