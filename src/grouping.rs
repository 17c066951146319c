use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::categorizer::is_uncategorized;
use crate::error::{AppError, Result};
use crate::merchant::extract_merchant;
use crate::models::{Transaction, TransactionType};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantGroup {
    pub merchant: String,
    pub transactions: Vec<Transaction>,
    pub count: usize,
    pub total_amount: f64,
}

/// Explicit merchant if the row has one, otherwise the key derived from
/// its description.
pub fn merchant_key(txn: &Transaction) -> String {
    match txn.merchant.as_deref().map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => extract_merchant(&txn.description),
    }
}

/// Group uncategorized transactions by merchant key, largest groups first.
/// Payments are never grouped.
pub fn group_uncategorized(transactions: &[Transaction]) -> Vec<MerchantGroup> {
    let mut groups: HashMap<String, Vec<Transaction>> = HashMap::new();
    let pending = transactions
        .iter()
        .filter(|t| t.transaction_type != TransactionType::Payment && is_uncategorized(t.category.as_deref()));
    for txn in pending {
        groups.entry(merchant_key(txn)).or_default().push(txn.clone());
    }

    let mut out: Vec<MerchantGroup> = groups
        .into_iter()
        .map(|(merchant, transactions)| MerchantGroup {
            count: transactions.len(),
            total_amount: transactions.iter().map(|t| t.amount.abs()).sum(),
            merchant,
            transactions,
        })
        .collect();
    out.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(b.total_amount.total_cmp(&a.total_amount))
            .then_with(|| a.merchant.cmp(&b.merchant))
    });
    out
}

/// Absolute spend per category, largest first. Payments are not spend.
pub fn category_totals(transactions: &[Transaction]) -> Vec<(String, f64)> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for txn in transactions.iter().filter(|t| t.transaction_type != TransactionType::Payment) {
        let name = txn.category.clone().unwrap_or_else(|| crate::categorizer::OTHER.to_string());
        *totals.entry(name).or_default() += txn.amount.abs();
    }
    let mut out: Vec<(String, f64)> = totals.into_iter().collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

pub fn load_user_transactions(conn: &Connection, user_id: i64) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE user_id = ?1 ORDER BY transaction_date DESC, id DESC",
        Transaction::COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], Transaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn merchant_groups(conn: &Connection, user_id: i64) -> Result<Vec<MerchantGroup>> {
    Ok(group_uncategorized(&load_user_transactions(conn, user_id)?))
}

#[derive(Debug, Clone, Serialize)]
pub struct RowOutcome {
    pub id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuickCategorizeReport {
    pub merchant: String,
    pub category: String,
    pub updated: usize,
    pub failed: usize,
    pub results: Vec<RowOutcome>,
}

/// Assign `category` to every uncategorized transaction in one merchant
/// group. Each row is updated on its own; a failure is recorded for that
/// row and the rest continue.
pub fn quick_categorize(
    conn: &Connection,
    user_id: i64,
    merchant: &str,
    category: &str,
) -> Result<QuickCategorizeReport> {
    let category = category.trim();
    if category.is_empty() {
        return Err(AppError::BadRequest("Category required".to_string()));
    }
    let group = merchant_groups(conn, user_id)?
        .into_iter()
        .find(|g| g.merchant == merchant)
        .ok_or_else(|| AppError::NotFound(format!("No uncategorized transactions for merchant: {merchant}")))?;

    let mut stmt = conn.prepare("UPDATE transactions SET category = ?1 WHERE id = ?2 AND user_id = ?3")?;
    let results: Vec<RowOutcome> = group
        .transactions
        .iter()
        .map(|txn| match stmt.execute(rusqlite::params![category, txn.id, user_id]) {
            Ok(1) => RowOutcome { id: txn.id, success: true, error: None },
            Ok(_) => RowOutcome {
                id: txn.id,
                success: false,
                error: Some("Transaction not found".to_string()),
            },
            Err(e) => {
                warn!(id = txn.id, error = %e, "quick-categorize row update failed");
                RowOutcome { id: txn.id, success: false, error: Some(e.to_string()) }
            }
        })
        .collect();

    let updated = results.iter().filter(|r| r.success).count();
    let failed = results.len() - updated;
    info!(user_id, merchant, category, updated, failed, "quick-categorize applied");

    Ok(QuickCategorizeReport {
        merchant: merchant.to_string(),
        category: category.to_string(),
        updated,
        failed,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_txn, add_user, test_db};

    fn txn(id: i64, merchant: Option<&str>, description: &str, amount: f64, category: Option<&str>) -> Transaction {
        Transaction {
            id,
            user_id: 1,
            transaction_date: "2024-01-05".into(),
            description: description.into(),
            amount,
            category: category.map(str::to_string),
            transaction_type: TransactionType::Expense,
            payment_method: None,
            merchant: merchant.map(str::to_string),
            notes: None,
            tags: vec![],
            is_recurring: false,
            recurring_frequency: None,
            source_file: None,
            imported_at: None,
            created_at: "2024-01-05 00:00:00".into(),
        }
    }

    #[test]
    fn test_groups_only_uncategorized() {
        let txns = vec![
            txn(1, Some("A"), "a one", -5.0, Some("Other")),
            txn(2, Some("A"), "a two", -7.5, Some("Other")),
            txn(3, Some("B"), "b", -3.0, Some("Food")),
        ];
        let groups = group_uncategorized(&txns);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].merchant, "A");
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].total_amount, 12.5);
    }

    #[test]
    fn test_payments_are_not_grouped() {
        let mut payment = txn(2, Some("AUTOPAY"), "AUTOPAY THANK YOU", 250.0, Some("Other"));
        payment.transaction_type = TransactionType::Payment;
        let txns = vec![txn(1, Some("AUTOPAY"), "AUTOPAY FEE", -2.0, Some("Other")), payment];
        let groups = group_uncategorized(&txns);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 1);
        assert_eq!(groups[0].transactions[0].id, 1);
    }

    #[test]
    fn test_quick_categorize_leaves_payments_alone() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let payment = add_txn(&conn, user, "2024-01-05", "AUTOPAY THANK YOU", 250.0, Some("Other"), "payment");
        let fee = add_txn(&conn, user, "2024-01-06", "AUTOPAY THANK YOU", -2.0, Some("Other"), "expense");

        let groups = merchant_groups(&conn, user).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 1);

        let report = quick_categorize(&conn, user, &groups[0].merchant, "Fees").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.results[0].id, fee);
        let cat: String = conn
            .query_row("SELECT category FROM transactions WHERE id = ?1", [payment], |r| r.get(0))
            .unwrap();
        assert_eq!(cat, "Other");
    }

    #[test]
    fn test_missing_merchant_uses_extracted_key() {
        let txns = vec![
            txn(1, None, "PURCHASE 01/02/2024 CORNER DELI 42 NYC", -5.0, None),
            txn(2, None, "Corner Deli 42 Brooklyn", -6.0, Some("")),
            txn(3, Some("  "), "corner deli 42", 4.0, Some("other")),
        ];
        let groups = group_uncategorized(&txns);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].merchant, "CORNER DELI 42");
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].total_amount, 15.0);
    }

    #[test]
    fn test_sorted_by_count_descending() {
        let txns = vec![
            txn(1, Some("SMALL"), "x", -100.0, None),
            txn(2, Some("BIG"), "x", -1.0, None),
            txn(3, Some("BIG"), "x", -1.0, None),
            txn(4, Some("BIG"), "x", -1.0, None),
            txn(5, Some("MID"), "x", -1.0, None),
            txn(6, Some("MID"), "x", -1.0, None),
        ];
        let names: Vec<_> = group_uncategorized(&txns).into_iter().map(|g| g.merchant).collect();
        assert_eq!(names, vec!["BIG", "MID", "SMALL"]);
    }

    #[test]
    fn test_category_totals_skip_payments() {
        let mut payment = txn(3, None, "AUTOPAY", 500.0, Some("Payment"));
        payment.transaction_type = TransactionType::Payment;
        let txns = vec![
            txn(1, None, "x", -10.0, Some("Groceries")),
            txn(2, None, "y", -5.0, Some("Groceries")),
            payment,
            txn(4, None, "z", -20.0, None),
        ];
        let totals = category_totals(&txns);
        assert_eq!(totals, vec![("Other".to_string(), 20.0), ("Groceries".to_string(), 15.0)]);
    }

    #[test]
    fn test_quick_categorize_updates_group_with_per_row_results() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let a = add_txn(&conn, user, "2024-01-05", "ACME WIDGETS 1", -10.0, Some("Other"), "expense");
        let b = add_txn(&conn, user, "2024-01-06", "ACME WIDGETS 1", -20.0, None, "expense");
        let done = add_txn(&conn, user, "2024-01-07", "ACME WIDGETS 1", -30.0, Some("Shopping"), "expense");

        let report = quick_categorize(&conn, user, "ACME WIDGETS 1", "Shopping").unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.failed, 0);
        let mut ids: Vec<i64> = report.results.iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec![a, b]);
        assert!(!ids.contains(&done));
        assert!(merchant_groups(&conn, user).unwrap().is_empty());
    }

    #[test]
    fn test_quick_categorize_reports_failed_rows() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        let ok = add_txn(&conn, user, "2024-01-05", "ACME", -10.0, None, "expense");
        let blocked = add_txn(&conn, user, "2024-01-06", "ACME", -20.0, None, "expense");
        conn.execute_batch(&format!(
            "CREATE TRIGGER lock_row BEFORE UPDATE ON transactions WHEN OLD.id = {blocked} \
             BEGIN SELECT RAISE(ABORT, 'row locked'); END;"
        ))
        .unwrap();

        let report = quick_categorize(&conn, user, "ACME", "Shopping").unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 1);
        let failed = report.results.iter().find(|r| !r.success).unwrap();
        assert_eq!(failed.id, blocked);
        assert!(failed.error.as_deref().unwrap_or("").contains("row locked"));
        let cat: String = conn
            .query_row("SELECT category FROM transactions WHERE id = ?1", [ok], |r| r.get(0))
            .unwrap();
        assert_eq!(cat, "Shopping");
    }

    #[test]
    fn test_quick_categorize_unknown_merchant() {
        let (_dir, conn) = test_db();
        let user = add_user(&conn, "a@example.com");
        assert!(matches!(
            quick_categorize(&conn, user, "NOPE", "Shopping"),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            quick_categorize(&conn, user, "NOPE", "  "),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_quick_categorize_ignores_other_users() {
        let (_dir, conn) = test_db();
        let a = add_user(&conn, "a@example.com");
        let b = add_user(&conn, "b@example.com");
        add_txn(&conn, a, "2024-01-05", "ACME", -10.0, None, "expense");
        let theirs = add_txn(&conn, b, "2024-01-05", "ACME", -10.0, None, "expense");
        quick_categorize(&conn, a, "ACME", "Shopping").unwrap();
        let cat: Option<String> = conn
            .query_row("SELECT category FROM transactions WHERE id = ?1", [theirs], |r| r.get(0))
            .unwrap();
        assert!(cat.is_none());
    }
}
