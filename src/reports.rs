use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::fmt::money;

// ---------------------------------------------------------------------------
// Date range helper
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    /// Both boundaries or neither. Blank values count as missing.
    pub fn from_bounds(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>> {
        let start = start.map(str::trim).filter(|s| !s.is_empty());
        let end = end.map(str::trim).filter(|s| !s.is_empty());
        match (start, end) {
            (Some(s), Some(e)) => Ok(Some(Self {
                start: s.to_string(),
                end: e.to_string(),
            })),
            (Some(_), None) => Err(AppError::BadRequest(
                "startDate requires endDate (both date boundaries must be specified)".to_string(),
            )),
            (None, Some(_)) => Err(AppError::BadRequest(
                "endDate requires startDate (both date boundaries must be specified)".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }
}

/// WHERE clause scoping a query to one user and an optional date range.
fn scope(user_id: i64, range: Option<&DateRange>) -> (String, Vec<Value>) {
    let mut clause = "user_id = ?1".to_string();
    let mut params: Vec<Value> = vec![user_id.into()];
    if let Some(r) = range {
        clause.push_str(" AND transaction_date BETWEEN ?2 AND ?3");
        params.push(r.start.clone().into());
        params.push(r.end.clone().into());
    }
    (clause, params)
}

const MONTH: &str = "strftime('%Y-%m', transaction_date)";
const INCOME_SUM: &str = "COALESCE(SUM(CASE WHEN transaction_type = 'income' THEN amount ELSE 0 END), 0)";
const EXPENSE_SUM: &str = "COALESCE(SUM(CASE WHEN transaction_type = 'expense' THEN ABS(amount) ELSE 0 END), 0)";

// ---------------------------------------------------------------------------
// KPIs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_savings: f64,
    pub savings_rate: f64,
    pub transaction_count: i64,
    pub avg_transaction: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct CategoryTotal {
    pub category: Option<String>,
    pub total: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MonthTotals {
    pub month: String,
    pub income: f64,
    pub expenses: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiReport {
    pub kpis: Kpis,
    pub top_categories: Vec<CategoryTotal>,
    pub monthly_trend: Vec<MonthTotals>,
}

fn savings_rate(income: f64, expenses: f64) -> f64 {
    if income > 0.0 {
        (income - expenses) / income * 100.0
    } else {
        0.0
    }
}

pub fn kpis(conn: &Connection, user_id: i64, range: Option<&DateRange>) -> Result<KpiReport> {
    let (clause, values) = scope(user_id, range);
    let params = || rusqlite::params_from_iter(values.iter());

    let (total_income, total_expenses, transaction_count, avg_transaction): (f64, f64, i64, f64) = conn
        .query_row(
            &format!(
                "SELECT {INCOME_SUM}, {EXPENSE_SUM}, COUNT(*), COALESCE(AVG(ABS(amount)), 0) \
                 FROM transactions WHERE {clause} AND transaction_type != 'payment'"
            ),
            params(),
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT category, SUM(ABS(amount)) AS total FROM transactions \
         WHERE {clause} AND transaction_type = 'expense' \
         GROUP BY category ORDER BY total DESC LIMIT 5"
    ))?;
    let top_categories = stmt
        .query_map(params(), |row| {
            Ok(CategoryTotal {
                category: row.get(0)?,
                total: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {MONTH} AS month, {INCOME_SUM}, {EXPENSE_SUM} FROM transactions \
         WHERE {clause} AND transaction_type != 'payment' \
         GROUP BY month ORDER BY month DESC LIMIT 12"
    ))?;
    let monthly_trend = stmt
        .query_map(params(), |row| {
            Ok(MonthTotals {
                month: row.get(0)?,
                income: row.get(1)?,
                expenses: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(KpiReport {
        kpis: Kpis {
            total_income,
            total_expenses,
            net_savings: total_income - total_expenses,
            savings_rate: savings_rate(total_income, total_expenses),
            transaction_count,
            avg_transaction,
        },
        top_categories,
        monthly_trend,
    })
}

// ---------------------------------------------------------------------------
// Spending by category
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct CategorySpend {
    pub category: Option<String>,
    pub total: f64,
    pub count: i64,
    pub average: f64,
}

pub fn spending_by_category(
    conn: &Connection,
    user_id: i64,
    range: Option<&DateRange>,
) -> Result<Vec<CategorySpend>> {
    let (clause, params) = scope(user_id, range);
    let mut stmt = conn.prepare(&format!(
        "SELECT category, SUM(ABS(amount)) AS total, COUNT(*), AVG(ABS(amount)) \
         FROM transactions WHERE {clause} AND transaction_type = 'expense' \
         GROUP BY category ORDER BY total DESC"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(CategorySpend {
                category: row.get(0)?,
                total: row.get(1)?,
                count: row.get(2)?,
                average: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Monthly comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct MonthlyCategoryTotal {
    pub month: String,
    pub transaction_type: String,
    pub category: Option<String>,
    pub total: f64,
}

pub fn monthly_comparison(conn: &Connection, user_id: i64) -> Result<Vec<MonthlyCategoryTotal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MONTH} AS month, transaction_type, category, SUM(ABS(amount)) AS total \
         FROM transactions WHERE user_id = ?1 AND transaction_type != 'payment' \
         GROUP BY month, transaction_type, category \
         ORDER BY month DESC, total DESC LIMIT 100"
    ))?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(MonthlyCategoryTotal {
                month: row.get(0)?,
                transaction_type: row.get(1)?,
                category: row.get(2)?,
                total: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Trends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendPeriod {
    Day,
    Week,
    Month,
    Year,
}

impl TrendPeriod {
    /// Unknown or missing periods fall back to monthly buckets.
    pub fn parse_or_month(s: Option<&str>) -> Self {
        match s.map(|p| p.trim().to_ascii_lowercase()).as_deref() {
            Some("day") => Self::Day,
            Some("week") => Self::Week,
            Some("year") => Self::Year,
            _ => Self::Month,
        }
    }

    /// SQL expression naming the bucket's first day.
    fn bucket_sql(&self) -> &'static str {
        match self {
            Self::Day => "date(transaction_date)",
            // Step back six days, then forward to the next Monday.
            Self::Week => "date(transaction_date, '-6 days', 'weekday 1')",
            Self::Month => "strftime('%Y-%m-01', transaction_date)",
            Self::Year => "strftime('%Y-01-01', transaction_date)",
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrendBucket {
    pub period: String,
    pub income: f64,
    pub expenses: f64,
    pub transaction_count: i64,
}

pub fn trends(conn: &Connection, user_id: i64, period: TrendPeriod) -> Result<Vec<TrendBucket>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} AS period, {INCOME_SUM}, {EXPENSE_SUM}, COUNT(*) FROM transactions \
         WHERE user_id = ?1 AND transaction_type != 'payment' \
         GROUP BY period ORDER BY period DESC LIMIT 24",
        period.bucket_sql()
    ))?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok(TrendBucket {
                period: row.get(0)?,
                income: row.get(1)?,
                expenses: row.get(2)?,
                transaction_count: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, PartialEq)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: &'static str,
    pub message: String,
    pub impact: &'static str,
}

pub fn insights(conn: &Connection, user_id: i64, today: NaiveDate) -> Result<Vec<Insight>> {
    let this_month = today.format("%Y-%m").to_string();
    let mut out = Vec::new();

    let avg_monthly: f64 = conn.query_row(
        &format!(
            "SELECT COALESCE(AVG(monthly_total), 0) FROM ( \
               SELECT SUM(ABS(amount)) AS monthly_total FROM transactions \
               WHERE user_id = ?1 AND transaction_type = 'expense' GROUP BY {MONTH})"
        ),
        [user_id],
        |row| row.get(0),
    )?;

    let (income, expenses): (f64, f64) = conn.query_row(
        &format!(
            "SELECT {INCOME_SUM}, {EXPENSE_SUM} FROM transactions \
             WHERE user_id = ?1 AND {MONTH} = ?2"
        ),
        rusqlite::params![user_id, this_month],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    if avg_monthly > 0.0 && expenses > avg_monthly * 1.2 {
        out.push(Insight {
            kind: "warning",
            title: "Higher Than Average Spending",
            message: format!(
                "You're spending {:.0}% more this month compared to your average.",
                (expenses / avg_monthly - 1.0) * 100.0
            ),
            impact: "high",
        });
    }

    let top: Option<(Option<String>, f64)> = conn
        .query_row(
            &format!(
                "SELECT category, SUM(ABS(amount)) AS total FROM transactions \
                 WHERE user_id = ?1 AND transaction_type = 'expense' AND {MONTH} = ?2 \
                 GROUP BY category ORDER BY total DESC LIMIT 1"
            ),
            rusqlite::params![user_id, this_month],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    if let Some((category, total)) = top {
        out.push(Insight {
            kind: "info",
            title: "Top Spending Category",
            message: format!(
                "{} is your largest expense this month at {}.",
                category.as_deref().unwrap_or(crate::categorizer::OTHER),
                money(total)
            ),
            impact: "medium",
        });
    }

    let rate = savings_rate(income, expenses);
    if income > 0.0 && rate < 10.0 {
        out.push(Insight {
            kind: "warning",
            title: "Low Savings Rate",
            message: format!(
                "Your savings rate is {rate:.1}%. Financial experts recommend saving at least 20% of income."
            ),
            impact: "high",
        });
    } else if rate >= 20.0 {
        out.push(Insight {
            kind: "success",
            title: "Great Savings!",
            message: format!("You're saving {rate:.1}% of your income. Keep up the excellent work!"),
            impact: "positive",
        });
    }

    Ok(out)
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

pub const EXPORT_HEADER: &[&str] = &[
    "transaction_date",
    "description",
    "amount",
    "category",
    "transaction_type",
    "payment_method",
    "merchant",
];

#[derive(Debug, Serialize, PartialEq)]
pub struct ExportRow {
    pub transaction_date: String,
    pub description: String,
    pub amount: f64,
    pub category: Option<String>,
    pub transaction_type: String,
    pub payment_method: Option<String>,
    pub merchant: Option<String>,
}

pub fn export_rows(conn: &Connection, user_id: i64, range: Option<&DateRange>) -> Result<Vec<ExportRow>> {
    let (clause, params) = scope(user_id, range);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE {clause} ORDER BY transaction_date DESC, id DESC",
        EXPORT_HEADER.join(", ")
    ))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(ExportRow {
                transaction_date: row.get(0)?,
                description: row.get(1)?,
                amount: row.get(2)?,
                category: row.get(3)?,
                transaction_type: row.get(4)?,
                payment_method: row.get(5)?,
                merchant: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Render export rows as CSV. The header is written even for an empty export.
pub fn to_csv(rows: &[ExportRow]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    wtr.write_record(EXPORT_HEADER)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| AppError::Other(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AppError::Other(e.to_string()))
}
