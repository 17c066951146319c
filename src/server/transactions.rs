use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{AppState, CurrentUser};
use crate::error::{AppError, OrInternal, Result};
use crate::grouping::{self, MerchantGroup, QuickCategorizeReport};
use crate::importer::{self, ImportSummary};
use crate::models::{ImportMode, Transaction};
use crate::transactions::{self, CategoryUse, ListQuery, NewTransaction, TransactionPage, TransactionPatch};
use crate::users;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/bulk-import", post(bulk_import))
        .route("/bulk-delete", post(bulk_delete))
        .route("/meta/categories", get(categories))
        .route("/merchant-groups", get(merchant_groups))
        .route("/quick-categorize", post(quick_categorize))
        .route("/{id}", get(fetch).put(update).delete(remove))
}

async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<TransactionPage>> {
    state
        .run(move |conn| transactions::list(conn, user.id, &query))
        .await
        .or_internal("Failed to fetch transactions")
        .map(Json)
}

async fn fetch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Transaction>> {
    state
        .run(move |conn| transactions::get(conn, user.id, id))
        .await
        .or_internal("Failed to fetch transaction")
        .map(Json)
}

async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<NewTransaction>,
) -> Result<(StatusCode, Json<Transaction>)> {
    let txn = state
        .run(move |conn| {
            users::check_transaction_limit(conn, user.id, &user.subscription_tier)?;
            transactions::create(conn, user.id, &body)
        })
        .await
        .or_internal("Failed to create transaction")?;
    Ok((StatusCode::CREATED, Json(txn)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkImportBody {
    #[serde(default)]
    transactions: Value,
    source_file: Option<String>,
    mode: Option<String>,
}

async fn bulk_import(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<BulkImportBody>,
) -> Result<(StatusCode, Json<ImportSummary>)> {
    let mode = match body.mode.as_deref() {
        Some(m) => m.parse::<ImportMode>()?,
        None => state.settings.default_import_mode,
    };
    let rows = importer::rows_from_json(&body.transactions, mode)?;
    let source_file = body.source_file;
    let summary = state
        .run(move |conn| {
            users::check_transaction_limit(conn, user.id, &user.subscription_tier)?;
            importer::bulk_import(conn, user.id, &rows, source_file.as_deref())
        })
        .await
        .or_internal("Failed to import transactions")?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(patch): Json<TransactionPatch>,
) -> Result<Json<Transaction>> {
    state
        .run(move |conn| transactions::update(conn, user.id, id, &patch))
        .await
        .or_internal("Failed to update transaction")
        .map(Json)
}

async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    state
        .run(move |conn| transactions::delete(conn, user.id, id))
        .await
        .or_internal("Failed to delete transaction")?;
    Ok(Json(json!({ "message": "Transaction deleted successfully" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkDeleteBody {
    #[serde(default)]
    transaction_ids: Vec<i64>,
}

async fn bulk_delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<Value>> {
    let deleted = state
        .run(move |conn| transactions::bulk_delete(conn, user.id, &body.transaction_ids))
        .await
        .or_internal("Failed to delete transactions")?;
    Ok(Json(json!({
        "deleted": deleted,
        "message": format!("{deleted} transactions deleted"),
    })))
}

async fn categories(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<CategoryUse>>> {
    state
        .run(move |conn| transactions::distinct_categories(conn, user.id))
        .await
        .or_internal("Failed to fetch categories")
        .map(Json)
}

async fn merchant_groups(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<MerchantGroup>>> {
    state
        .run(move |conn| grouping::merchant_groups(conn, user.id))
        .await
        .or_internal("Failed to group transactions")
        .map(Json)
}

#[derive(Deserialize)]
struct QuickCategorizeBody {
    merchant: Option<String>,
    category: Option<String>,
}

async fn quick_categorize(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<QuickCategorizeBody>,
) -> Result<Json<QuickCategorizeReport>> {
    let merchant = body
        .merchant
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Merchant required".to_string()))?;
    let category = body.category.unwrap_or_default();
    state
        .run(move |conn| grouping::quick_categorize(conn, user.id, &merchant, &category))
        .await
        .or_internal("Failed to categorize transactions")
        .map(Json)
}
