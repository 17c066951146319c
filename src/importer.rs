use std::io::Read;
use std::path::Path;

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{CanonicalTransaction, ImportMode, ImportedTransaction, RawRow};
use crate::normalizer::{normalize_row, normalize_rows, sanitize};

// ---------------------------------------------------------------------------
// CSV reading
// ---------------------------------------------------------------------------

/// Read a bank export into raw rows keyed by its own header line.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<RawRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(RawRow::from_pairs(
            headers.iter().map(String::as_str).zip(record.iter()),
        ));
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Bulk import
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub total: usize,
    pub transactions: Vec<ImportedTransaction>,
}

/// Insert a batch for one user, skipping rows that already exist with the
/// same date, amount and description. The batch runs in a single IMMEDIATE
/// transaction: it holds the write lock from the first duplicate check to
/// commit, so two concurrent uploads of one file cannot both miss each
/// other's rows. Any storage error rolls back the whole batch.
pub fn bulk_import(
    conn: &mut Connection,
    user_id: i64,
    rows: &[CanonicalTransaction],
    source_file: Option<&str>,
) -> Result<ImportSummary> {
    if rows.is_empty() {
        return Err(AppError::BadRequest("Transactions array required".to_string()));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let imported_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut inserted = Vec::new();
    let mut duplicates = 0usize;

    {
        let mut exists = tx.prepare_cached(
            "SELECT 1 FROM transactions WHERE user_id = ?1 AND transaction_date = ?2 AND amount = ?3 AND description = ?4",
        )?;
        let mut insert = tx.prepare_cached(
            "INSERT INTO transactions \
             (user_id, transaction_date, description, amount, category, transaction_type, merchant, source_file, imported_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             RETURNING id, transaction_date, description, amount, category",
        )?;

        for row in rows {
            if exists.exists(rusqlite::params![user_id, row.transaction_date, row.amount, row.description])? {
                duplicates += 1;
                continue;
            }
            let record = insert.query_row(
                rusqlite::params![
                    user_id,
                    row.transaction_date,
                    row.description,
                    row.amount,
                    row.category,
                    row.transaction_type,
                    row.merchant,
                    source_file,
                    imported_at,
                ],
                |r| {
                    Ok(ImportedTransaction {
                        id: r.get(0)?,
                        transaction_date: r.get(1)?,
                        description: r.get(2)?,
                        amount: r.get(3)?,
                        category: r.get(4)?,
                    })
                },
            )?;
            debug!(id = record.id, "staged imported transaction");
            inserted.push(record);
        }
    }

    tx.commit()?;

    info!(
        user_id,
        imported = inserted.len(),
        duplicates,
        total = rows.len(),
        source_file = source_file.unwrap_or(""),
        "bulk import committed"
    );

    Ok(ImportSummary {
        imported: inserted.len(),
        duplicates,
        total: rows.len(),
        transactions: inserted,
    })
}

/// Parse, normalize and import a CSV file; the file name becomes the
/// provenance tag on every inserted row.
pub fn import_csv_file(
    conn: &mut Connection,
    user_id: i64,
    file_path: &Path,
    mode: ImportMode,
) -> Result<ImportSummary> {
    let file = std::fs::File::open(file_path)?;
    let raw_rows = parse_csv(std::io::BufReader::new(file))?;
    if raw_rows.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No transactions found in {}",
            file_path.display()
        )));
    }
    let rows: Vec<CanonicalTransaction> = normalize_rows(&raw_rows, mode)
        .into_iter()
        .map(sanitize)
        .collect();
    let source_file = file_path.file_name().and_then(|n| n.to_str());
    bulk_import(conn, user_id, &rows, source_file)
}

/// Decode an uploaded `transactions` array. Objects carrying a
/// `transactionDate` key are already canonical; anything else is a raw CSV
/// row and goes through the normalizer under `mode`.
pub fn rows_from_json(value: &serde_json::Value, mode: ImportMode) -> Result<Vec<CanonicalTransaction>> {
    let items = match value.as_array() {
        Some(items) if !items.is_empty() => items,
        _ => return Err(AppError::BadRequest("Transactions array required".to_string())),
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let bad = |e: serde_json::Error| AppError::BadRequest(format!("Invalid transaction at index {i}: {e}"));
            if item.get("transactionDate").is_some() {
                let txn: CanonicalTransaction = serde_json::from_value(item.clone()).map_err(bad)?;
                Ok(sanitize(txn))
            } else {
                let raw: RawRow = serde_json::from_value(item.clone()).map_err(bad)?;
                Ok(normalize_row(&raw, mode))
            }
        })
        .collect()
}
