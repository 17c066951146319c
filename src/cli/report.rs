use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::fmt::{money, percent};
use crate::grouping::{category_totals, load_user_transactions};
use crate::reports::{self, DateRange};

use super::{open_db, resolve_user};

pub fn run(user: &str, from_date: Option<&str>, to_date: Option<&str>) -> Result<()> {
    let range = DateRange::from_bounds(from_date, to_date)?;
    let conn = open_db()?;
    let (user_id, _) = resolve_user(&conn, user)?;
    let report = reports::kpis(&conn, user_id, range.as_ref())?;
    let k = &report.kpis;

    let mut summary = Table::new();
    summary.set_header(vec!["Metric", "Value"]);
    summary.add_row(vec![Cell::new("Income"), Cell::new(money(k.total_income))]);
    summary.add_row(vec![Cell::new("Expenses"), Cell::new(money(k.total_expenses))]);
    summary.add_row(vec![Cell::new("Net savings"), Cell::new(money(k.net_savings))]);
    summary.add_row(vec![Cell::new("Savings rate"), Cell::new(percent(k.savings_rate))]);
    summary.add_row(vec![Cell::new("Transactions"), Cell::new(k.transaction_count)]);
    summary.add_row(vec![Cell::new("Average"), Cell::new(money(k.avg_transaction))]);

    let title = match &range {
        Some(r) => format!("Summary {} to {}", r.start, r.end),
        None => "Summary (all time)".to_string(),
    };
    println!("{title}\n{summary}");

    if !report.top_categories.is_empty() {
        let mut top = Table::new();
        top.set_header(vec!["Category", "Spent"]);
        for c in &report.top_categories {
            top.add_row(vec![
                Cell::new(c.category.as_deref().unwrap_or(crate::categorizer::OTHER)),
                Cell::new(money(c.total)),
            ]);
        }
        println!("\nTop categories\n{top}");
    }

    let in_range: Vec<_> = load_user_transactions(&conn, user_id)?
        .into_iter()
        .filter(|t| match &range {
            Some(r) => t.transaction_date.as_str() >= r.start.as_str() && t.transaction_date.as_str() <= r.end.as_str(),
            None => true,
        })
        .collect();
    let totals = category_totals(&in_range);
    if !totals.is_empty() {
        let mut all = Table::new();
        all.set_header(vec!["Category", "Total"]);
        for (category, total) in totals {
            all.add_row(vec![Cell::new(category), Cell::new(money(total))]);
        }
        println!("\nAll categories\n{all}");
    }
    Ok(())
}
