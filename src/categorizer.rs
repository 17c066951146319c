use rusqlite::Connection;

use crate::error::Result;
use crate::models::TransactionType;

pub const INCOME: &str = "Income";
pub const PAYMENT: &str = "Payment";
pub const OTHER: &str = "Other";

/// Keyword rules, checked top to bottom. The first category with a keyword
/// contained in the lower-cased description wins.
pub const RULES: &[(&str, &[&str])] = &[
    (
        "Food & Dining",
        &[
            "restaurant", "cafe", "coffee", "starbucks", "dunkin", "mcdonald", "burger", "pizza",
            "chipotle", "taco", "sushi", "bakery", "diner", "doordash", "grubhub", "uber eats",
        ],
    ),
    (
        "Groceries",
        &[
            "grocery", "supermarket", "safeway", "kroger", "whole foods", "trader joe", "aldi",
            "publix", "wegmans", "costco",
        ],
    ),
    (
        "Gas & Fuel",
        &["gas station", "fuel", "shell", "chevron", "exxon", "mobil", "texaco", "sunoco", "valero"],
    ),
    (
        "Transportation",
        &["uber", "lyft", "taxi", "transit", "metro", "parking", "toll", "bus pass"],
    ),
    (
        "Housing & Rent",
        &["rent payment", "monthly rent", "mortgage", "apartment", "landlord", "property management", "hoa"],
    ),
    (
        "Utilities",
        &["utilities", "utility", "electric", "water bill", "comcast", "xfinity", "verizon", "at&t", "t-mobile", "internet"],
    ),
    (
        "Subscriptions",
        &["netflix", "spotify", "hulu", "disney+", "youtube premium", "apple.com/bill", "icloud", "dropbox", "patreon", "subscription"],
    ),
    (
        "Entertainment",
        &["entertainment", "cinema", "movie", "theater", "theatre", "concert", "ticketmaster", "steam", "playstation", "xbox"],
    ),
    (
        "Healthcare",
        &["pharmacy", "cvs", "walgreens", "medical", "doctor", "dental", "hospital", "clinic", "health"],
    ),
    (
        "Shopping",
        &["amazon", "target", "walmart", "best buy", "ebay", "etsy", "ikea", "shopping", "store"],
    ),
    (
        "Insurance",
        &["insurance", "geico", "state farm", "progressive", "allstate"],
    ),
    (
        "Travel",
        &["airline", "airlines", "hotel", "marriott", "hilton", "airbnb", "expedia", "booking.com", "amtrak"],
    ),
];

/// Which fallback applies before the keyword rules run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorizePath {
    /// Bank statements and manual entry: non-negative amounts are income.
    IncomeExpense,
    /// Credit-card imports: every row is spend, whatever its sign.
    Expense,
}

/// All category names the categorizer can produce.
pub fn vocabulary() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = RULES.iter().map(|(name, _)| *name).collect();
    names.extend([INCOME, PAYMENT, OTHER]);
    names
}

pub fn categorize(description: &str, amount: f64, path: CategorizePath) -> &'static str {
    if path == CategorizePath::IncomeExpense && amount >= 0.0 {
        return INCOME;
    }
    let desc = description.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| desc.contains(k)))
        .map(|(name, _)| *name)
        .unwrap_or(OTHER)
}

pub fn is_uncategorized(category: Option<&str>) -> bool {
    match category.map(str::trim) {
        None | Some("") => true,
        Some(c) => c.eq_ignore_ascii_case(OTHER),
    }
}

pub struct CategorizeResult {
    pub categorized: usize,
    pub still_uncategorized: usize,
}

/// Re-run the keyword rules over a user's uncategorized income and expense
/// rows, e.g. after the ruleset grew.
pub fn categorize_transactions(conn: &Connection, user_id: i64) -> Result<CategorizeResult> {
    let mut stmt = conn.prepare(
        "SELECT id, description, amount, transaction_type FROM transactions \
         WHERE user_id = ?1 AND transaction_type != 'payment' \
         AND (category IS NULL OR trim(category) = '' OR lower(category) = 'other')",
    )?;
    let pending: Vec<(i64, String, f64, TransactionType)> = stmt
        .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut categorized = 0usize;
    let mut still_uncategorized = 0usize;

    for (txn_id, description, amount, txn_type) in &pending {
        // Rows already typed as expense never fall back to Income.
        let path = match txn_type {
            TransactionType::Income => CategorizePath::IncomeExpense,
            _ => CategorizePath::Expense,
        };
        let category = categorize(description, *amount, path);
        if category == OTHER {
            still_uncategorized += 1;
            continue;
        }
        conn.execute(
            "UPDATE transactions SET category = ?1 WHERE id = ?2",
            rusqlite::params![category, txn_id],
        )?;
        categorized += 1;
    }

    Ok(CategorizeResult {
        categorized,
        still_uncategorized,
    })
}
