use std::path::PathBuf;

use crate::categorizer::categorize_transactions;
use crate::error::Result;
use crate::importer::import_csv_file;
use crate::models::ImportMode;
use crate::settings::load_settings;
use crate::users::check_transaction_limit;

use super::{open_db, resolve_user};

pub fn run(file: &str, user: &str, mode: Option<&str>) -> Result<()> {
    let mode = match mode {
        Some(m) => m.parse::<ImportMode>()?,
        None => load_settings().default_import_mode,
    };
    let file_path = PathBuf::from(file);
    let mut conn = open_db()?;
    let (user_id, tier) = resolve_user(&conn, user)?;
    check_transaction_limit(&conn, user_id, &tier)?;

    let summary = import_csv_file(&mut conn, user_id, &file_path, mode)?;
    println!(
        "{} imported, {} skipped (duplicates) of {} rows [{}]",
        summary.imported,
        summary.duplicates,
        summary.total,
        mode.key()
    );

    let result = categorize_transactions(&conn, user_id)?;
    println!(
        "{} categorized, {} still uncategorized",
        result.categorized, result.still_uncategorized
    );
    Ok(())
}
