use comfy_table::{Cell, Table};

use crate::categorizer::vocabulary;
use crate::error::Result;
use crate::fmt::money;
use crate::grouping::{merchant_groups, quick_categorize};

use super::{open_db, resolve_user};

pub fn list(user: &str) -> Result<()> {
    let conn = open_db()?;
    let (user_id, _) = resolve_user(&conn, user)?;
    let groups = merchant_groups(&conn, user_id)?;

    if groups.is_empty() {
        println!("Nothing to categorize.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Merchant", "Count", "Total", "Latest"]);
    for group in &groups {
        let latest = group
            .transactions
            .iter()
            .map(|t| t.transaction_date.as_str())
            .max()
            .unwrap_or("");
        table.add_row(vec![
            Cell::new(&group.merchant),
            Cell::new(group.count),
            Cell::new(money(group.total_amount)),
            Cell::new(latest),
        ]);
    }
    println!("Uncategorized merchants\n{table}");
    println!("Known categories: {}", vocabulary().join(", "));
    Ok(())
}

pub fn apply(user: &str, merchant: &str, category: &str) -> Result<()> {
    let conn = open_db()?;
    let (user_id, _) = resolve_user(&conn, user)?;
    let report = quick_categorize(&conn, user_id, merchant, category)?;
    println!(
        "{} \u{2192} {}: {} updated, {} failed",
        report.merchant, report.category, report.updated, report.failed
    );
    for outcome in report.results.iter().filter(|r| !r.success) {
        eprintln!("  #{}: {}", outcome.id, outcome.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}
