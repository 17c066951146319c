use chrono::NaiveDate;

use crate::categorizer::{self, CategorizePath};
use crate::merchant::extract_merchant;
use crate::models::{CanonicalTransaction, ImportMode, RawRow, TransactionType};

// ---------------------------------------------------------------------------
// Header lookup table
// ---------------------------------------------------------------------------

/// Canonical field a CSV header can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Description,
    Amount,
    Merchant,
    Category,
}

/// Candidate headers per field, in priority order.
pub const HEADER_MAP: &[(Field, &[&str])] = &[
    (Field::Date, &["Date", "Transaction Date", "Trans. Date", "Timestamp"]),
    (Field::Description, &["Description", "Merchant", "Name", "Memo"]),
    (Field::Amount, &["Amount", "Debit", "Credit", "Value", "Total"]),
    (Field::Merchant, &["Merchant"]),
    (Field::Category, &["Category", "Type"]),
];

pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

fn lookup<'a>(row: &'a RawRow, field: Field) -> Option<&'a str> {
    HEADER_MAP
        .iter()
        .find(|(f, _)| *f == field)
        .and_then(|(_, headers)| row.first_of(headers))
}

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

pub fn parse_amount(raw: &str) -> f64 {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return -inner.trim().parse::<f64>().unwrap_or(0.0);
    }
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// `YYYY-MM-DD`, optionally followed by a `T` or space time part, which is
/// dropped. Anything else trailing the date is rejected.
pub fn parse_iso_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let head = raw.get(..10)?;
    let tail = &raw[10..];
    if !tail.is_empty() && !tail.starts_with(|c: char| c == 'T' || c == ' ') {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Parse the date formats banks actually export into `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    parse_iso_date(raw).or_else(|| {
        ["%m/%d/%Y", "%Y/%m/%d", "%m/%d/%y"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
            .map(|d| d.format("%Y-%m-%d").to_string())
    })
}

fn without_negative_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

fn today() -> String {
    chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Map one raw CSV row onto the canonical transaction shape. Never fails:
/// missing or unreadable values fall back to defaults.
pub fn normalize_row(row: &RawRow, mode: ImportMode) -> CanonicalTransaction {
    let transaction_date = lookup(row, Field::Date)
        .and_then(parse_date)
        .unwrap_or_else(today);

    let description = lookup(row, Field::Description)
        .unwrap_or(UNKNOWN_DESCRIPTION)
        .to_string();

    let raw_amount = lookup(row, Field::Amount).map(parse_amount).unwrap_or(0.0);

    let (amount, transaction_type, path) = match mode {
        ImportMode::BankStatement => {
            let has_debit = row.has("Debit");
            let has_credit = row.has("Credit");
            if has_debit && !has_credit {
                (-raw_amount.abs(), TransactionType::Expense, CategorizePath::Expense)
            } else if has_credit && !has_debit {
                (raw_amount.abs(), TransactionType::Income, CategorizePath::IncomeExpense)
            } else if raw_amount >= 0.0 {
                (raw_amount, TransactionType::Income, CategorizePath::IncomeExpense)
            } else {
                (raw_amount, TransactionType::Expense, CategorizePath::IncomeExpense)
            }
        }
        ImportMode::CreditCard => {
            if raw_amount < 0.0 {
                (raw_amount.abs(), TransactionType::Payment, CategorizePath::Expense)
            } else {
                (-raw_amount, TransactionType::Expense, CategorizePath::Expense)
            }
        }
    };
    let amount = without_negative_zero(amount);

    let merchant = lookup(row, Field::Merchant)
        .map(str::to_string)
        .unwrap_or_else(|| extract_merchant(&description));

    let category = match lookup(row, Field::Category) {
        Some(explicit) => explicit.to_string(),
        None if transaction_type == TransactionType::Payment => categorizer::PAYMENT.to_string(),
        None => categorizer::categorize(&description, amount, path).to_string(),
    };

    CanonicalTransaction {
        transaction_date,
        description,
        amount,
        category,
        transaction_type,
        merchant: Some(merchant).filter(|m| !m.is_empty()),
    }
}

pub fn normalize_rows(rows: &[RawRow], mode: ImportMode) -> Vec<CanonicalTransaction> {
    rows.iter().map(|row| normalize_row(row, mode)).collect()
}

/// Tidy a canonical row submitted directly by a client: trims text, gives
/// blank fields the same defaults the normalizer uses.
pub fn sanitize(mut txn: CanonicalTransaction) -> CanonicalTransaction {
    txn.description = txn.description.trim().to_string();
    if txn.description.is_empty() {
        txn.description = UNKNOWN_DESCRIPTION.to_string();
    }
    txn.transaction_date = parse_date(&txn.transaction_date).unwrap_or_else(today);
    if !txn.amount.is_finite() {
        txn.amount = 0.0;
    }
    txn.category = txn.category.trim().to_string();
    if txn.category.is_empty() {
        txn.category = categorizer::OTHER.to_string();
    }
    txn.merchant = txn
        .merchant
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .or_else(|| Some(extract_merchant(&txn.description)).filter(|m| !m.is_empty()));
    txn
}
