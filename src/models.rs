use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    /// Credit-card payment or refund; kept out of spend analytics.
    Payment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Payment => "payment",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "payment" => Ok(Self::Payment),
            other => Err(AppError::BadRequest(format!("Unknown transaction type: {other}"))),
        }
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: AppError| FromSqlError::Other(Box::new(e)))
    }
}

/// Sign convention of an import source. Bank statements and credit-card
/// exports disagree on what a positive number means, so the caller names
/// the convention explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    #[default]
    BankStatement,
    CreditCard,
}

impl ImportMode {
    pub fn key(&self) -> &'static str {
        match self {
            Self::BankStatement => "bank_statement",
            Self::CreditCard => "credit_card",
        }
    }
}

impl FromStr for ImportMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "bank_statement" | "bank" => Ok(Self::BankStatement),
            "credit_card" | "card" => Ok(Self::CreditCard),
            other => Err(AppError::BadRequest(format!("Unknown import mode: {other}"))),
        }
    }
}

/// One parsed CSV record with whatever headers the bank chose.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "serde_json::Map<String, serde_json::Value>")]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: &str, value: &str) {
        self.fields.push((header.trim().to_string(), value.to_string()));
    }

    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut row = Self::new();
        for (k, v) in pairs {
            row.push(k, v);
        }
        row
    }

    /// Case-insensitive header lookup. Blank values count as absent.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, v)| k.eq_ignore_ascii_case(header.trim()) && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    }

    pub fn has(&self, header: &str) -> bool {
        self.get(header).is_some()
    }

    pub fn first_of(&self, headers: &[&str]) -> Option<&str> {
        headers.iter().find_map(|h| self.get(h))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for RawRow {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut row = Self::new();
        for (k, v) in map {
            let value = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            };
            row.push(&k, &value);
        }
        row
    }
}

/// Source-independent shape of one financial event, ready for import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTransaction {
    pub transaction_date: String,
    pub description: String,
    pub amount: f64,
    #[serde(default)]
    pub category: String,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub merchant: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_date: String,
    pub description: String,
    pub amount: f64,
    pub category: Option<String>,
    pub transaction_type: TransactionType,
    pub payment_method: Option<String>,
    pub merchant: Option<String>,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub is_recurring: bool,
    pub recurring_frequency: Option<String>,
    pub source_file: Option<String>,
    pub imported_at: Option<String>,
    pub created_at: String,
}

impl Transaction {
    pub const COLUMNS: &'static str = "id, user_id, transaction_date, description, amount, category, \
         transaction_type, payment_method, merchant, notes, tags, is_recurring, \
         recurring_frequency, source_file, imported_at, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let tags: Option<String> = row.get("tags")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            transaction_date: row.get("transaction_date")?,
            description: row.get("description")?,
            amount: row.get("amount")?,
            category: row.get("category")?,
            transaction_type: row.get("transaction_type")?,
            payment_method: row.get("payment_method")?,
            merchant: row.get("merchant")?,
            notes: row.get("notes")?,
            tags: tags
                .and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default(),
            is_recurring: row.get("is_recurring")?,
            recurring_frequency: row.get("recurring_frequency")?,
            source_file: row.get("source_file")?,
            imported_at: row.get("imported_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Projection returned for each row a bulk import inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportedTransaction {
    pub id: i64,
    pub transaction_date: String,
    pub description: String,
    pub amount: f64,
    pub category: String,
}
