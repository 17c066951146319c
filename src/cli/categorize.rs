use crate::categorizer::categorize_transactions;
use crate::error::Result;

use super::{open_db, resolve_user};

pub fn run(user: &str) -> Result<()> {
    let conn = open_db()?;
    let (user_id, _) = resolve_user(&conn, user)?;
    let result = categorize_transactions(&conn, user_id)?;
    println!(
        "{} categorized, {} still uncategorized",
        result.categorized, result.still_uncategorized
    );
    Ok(())
}
