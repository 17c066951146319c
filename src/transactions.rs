use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, FieldError, Result};
use crate::models::{Transaction, TransactionType};
use crate::normalizer::parse_iso_date;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;
const SORTABLE: &[&str] = &["transaction_date", "amount", "category", "created_at"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub pagination: Pagination,
}

/// Growing WHERE clause with positional parameters.
struct Filter {
    clause: String,
    params: Vec<rusqlite::types::Value>,
}

impl Filter {
    fn for_user(user_id: i64) -> Self {
        Self {
            clause: "WHERE user_id = ?1".to_string(),
            params: vec![user_id.into()],
        }
    }

    fn push(&mut self, sql: &str, value: impl Into<rusqlite::types::Value>) {
        self.params.push(value.into());
        let n = self.params.len();
        self.clause.push_str(&format!(" AND {}", sql.replace('?', &format!("?{n}"))));
    }
}

pub fn list(conn: &Connection, user_id: i64, query: &ListQuery) -> Result<TransactionPage> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| AppError::BadRequest("Page out of range".to_string()))?;

    let mut filter = Filter::for_user(user_id);
    if let Some(start) = query.start_date.as_deref().filter(|s| !s.is_empty()) {
        filter.push("transaction_date >= ?", start.to_string());
    }
    if let Some(end) = query.end_date.as_deref().filter(|s| !s.is_empty()) {
        filter.push("transaction_date <= ?", end.to_string());
    }
    if let Some(category) = query.category.as_deref().filter(|s| !s.is_empty()) {
        filter.push("category = ?", category.to_string());
    }
    if let Some(t) = query.transaction_type.as_deref().filter(|s| !s.is_empty()) {
        let t: TransactionType = t.parse()?;
        filter.push("transaction_type = ?", t.as_str().to_string());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.is_empty()) {
        filter.push("(description LIKE ? OR merchant LIKE ?)", format!("%{search}%"));
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM transactions {}", filter.clause),
        rusqlite::params_from_iter(filter.params.iter()),
        |row| row.get(0),
    )?;

    let sort_field = query
        .sort_by
        .as_deref()
        .filter(|s| SORTABLE.contains(s))
        .unwrap_or("transaction_date");
    let order = match query.sort_order.as_deref() {
        Some(o) if o.eq_ignore_ascii_case("asc") => "ASC",
        _ => "DESC",
    };

    let sql = format!(
        "SELECT {} FROM transactions {} ORDER BY {sort_field} {order}, id {order} LIMIT {limit} OFFSET {offset}",
        Transaction::COLUMNS,
        filter.clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let transactions = stmt
        .query_map(rusqlite::params_from_iter(filter.params.iter()), Transaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(TransactionPage {
        transactions,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    })
}

pub fn get(conn: &Connection, user_id: i64, id: i64) -> Result<Transaction> {
    conn.query_row(
        &format!("SELECT {} FROM transactions WHERE id = ?1 AND user_id = ?2", Transaction::COLUMNS),
        [id, user_id],
        Transaction::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    #[serde(default)]
    pub transaction_date: String,
    #[serde(default)]
    pub description: String,
    pub amount: Option<f64>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub transaction_type: String,
    pub payment_method: Option<String>,
    pub merchant: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_recurring: Option<bool>,
    pub recurring_frequency: Option<String>,
}

fn validate_new(txn: &NewTransaction) -> std::result::Result<(String, f64, TransactionType), Vec<FieldError>> {
    let mut errors = Vec::new();
    let date = parse_iso_date(&txn.transaction_date);
    if date.is_none() {
        errors.push(FieldError::new("transactionDate", "Valid date required"));
    }
    if txn.description.trim().is_empty() {
        errors.push(FieldError::new("description", "Description required"));
    }
    let amount = txn.amount.filter(|a| a.is_finite());
    if amount.is_none() {
        errors.push(FieldError::new("amount", "Valid amount required"));
    }
    if txn.category.trim().is_empty() {
        errors.push(FieldError::new("category", "Category required"));
    }
    let txn_type = match txn.transaction_type.as_str() {
        "income" => Some(TransactionType::Income),
        "expense" => Some(TransactionType::Expense),
        _ => {
            errors.push(FieldError::new("transactionType", "Type must be income or expense"));
            None
        }
    };
    match (date, amount, txn_type) {
        (Some(d), Some(a), Some(t)) if errors.is_empty() => Ok((d, a, t)),
        _ => Err(errors),
    }
}

fn tags_json(tags: &Option<Vec<String>>) -> Result<Option<String>> {
    tags.as_ref()
        .map(|t| serde_json::to_string(t))
        .transpose()
        .map_err(AppError::from)
}

pub fn create(conn: &Connection, user_id: i64, txn: &NewTransaction) -> Result<Transaction> {
    let (date, amount, txn_type) = validate_new(txn).map_err(AppError::Validation)?;
    let id: i64 = conn.query_row(
        "INSERT INTO transactions \
         (user_id, transaction_date, description, amount, category, transaction_type, \
          payment_method, merchant, notes, tags, is_recurring, recurring_frequency) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) RETURNING id",
        rusqlite::params![
            user_id,
            date,
            txn.description.trim(),
            amount,
            txn.category.trim(),
            txn_type,
            txn.payment_method,
            txn.merchant,
            txn.notes,
            tags_json(&txn.tags)?,
            txn.is_recurring.unwrap_or(false),
            txn.recurring_frequency,
        ],
        |row| row.get(0),
    )?;
    get(conn, user_id, id)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    pub transaction_date: Option<String>,
    pub description: Option<String>,
    pub amount: Option<f64>,
    pub category: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub payment_method: Option<String>,
    pub merchant: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub fn update(conn: &Connection, user_id: i64, id: i64, patch: &TransactionPatch) -> Result<Transaction> {
    let mut errors = Vec::new();
    let date = match patch.transaction_date.as_deref() {
        Some(d) => {
            let parsed = parse_iso_date(d);
            if parsed.is_none() {
                errors.push(FieldError::new("transactionDate", "Valid date required"));
            }
            parsed
        }
        None => None,
    };
    if patch.description.as_deref().is_some_and(|d| d.trim().is_empty()) {
        errors.push(FieldError::new("description", "Description required"));
    }
    if patch.amount.is_some_and(|a| !a.is_finite()) {
        errors.push(FieldError::new("amount", "Valid amount required"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let changed = conn.execute(
        "UPDATE transactions SET \
         transaction_date = COALESCE(?1, transaction_date), \
         description = COALESCE(?2, description), \
         amount = COALESCE(?3, amount), \
         category = COALESCE(?4, category), \
         transaction_type = COALESCE(?5, transaction_type), \
         payment_method = COALESCE(?6, payment_method), \
         merchant = COALESCE(?7, merchant), \
         notes = COALESCE(?8, notes), \
         tags = COALESCE(?9, tags) \
         WHERE id = ?10 AND user_id = ?11",
        rusqlite::params![
            date,
            patch.description.as_deref().map(str::trim),
            patch.amount,
            patch.category,
            patch.transaction_type,
            patch.payment_method,
            patch.merchant,
            patch.notes,
            tags_json(&patch.tags)?,
            id,
            user_id,
        ],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound("Transaction not found".to_string()));
    }
    get(conn, user_id, id)
}

pub fn delete(conn: &Connection, user_id: i64, id: i64) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM transactions WHERE id = ?1 AND user_id = ?2",
        [id, user_id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound("Transaction not found".to_string()));
    }
    Ok(())
}

pub fn bulk_delete(conn: &mut Connection, user_id: i64, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Err(AppError::BadRequest("Transaction IDs array required".to_string()));
    }
    let tx = conn.transaction()?;
    let mut deleted = 0usize;
    {
        let mut stmt = tx.prepare_cached("DELETE FROM transactions WHERE id = ?1 AND user_id = ?2")?;
        for id in ids {
            deleted += stmt.execute([*id, user_id])?;
        }
    }
    tx.commit()?;
    Ok(deleted)
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CategoryUse {
    pub category: Option<String>,
    pub transaction_type: TransactionType,
}

pub fn distinct_categories(conn: &Connection, user_id: i64) -> Result<Vec<CategoryUse>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT category, transaction_type FROM transactions \
         WHERE user_id = ?1 ORDER BY category, transaction_type",
    )?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(CategoryUse {
                category: row.get(0)?,
                transaction_type: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
