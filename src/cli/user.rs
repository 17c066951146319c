use comfy_table::{Cell, Table};

use crate::auth::{register, Registration, RequestMeta};
use crate::error::Result;
use crate::settings::load_settings;

use super::open_db;

pub fn add(email: &str, password: &str, first_name: &str, last_name: &str) -> Result<()> {
    let conn = open_db()?;
    let reg = Registration {
        email: email.to_string(),
        password: password.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone: None,
    };
    let resp = register(&conn, &reg, load_settings().token_ttl(), &RequestMeta::default())?;
    println!("Added user {} (id {})", resp.user.email, resp.user.id);
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_db()?;
    let mut stmt = conn.prepare(
        "SELECT u.id, u.email, u.first_name || ' ' || u.last_name, u.subscription_tier, \
         (SELECT COUNT(*) FROM transactions t WHERE t.user_id = u.id) \
         FROM users u WHERE u.is_active = 1 AND u.deleted_at IS NULL ORDER BY u.id",
    )?;
    let rows: Vec<(i64, String, String, String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Email", "Name", "Plan", "Transactions"]);
    for (id, email, name, tier, count) in rows {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(email),
            Cell::new(name),
            Cell::new(tier),
            Cell::new(count),
        ]);
    }
    println!("Users\n{table}");
    Ok(())
}
