use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::{AppState, CurrentUser};
use crate::error::{OrInternal, Result};
use crate::reports::{self, CategorySpend, DateRange, Insight, KpiReport, MonthlyCategoryTotal, TrendBucket, TrendPeriod};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/kpis", get(kpis))
        .route("/spending-by-category", get(spending_by_category))
        .route("/monthly-comparison", get(monthly_comparison))
        .route("/trends", get(trends))
        .route("/insights", get(insights))
        .route("/export", get(export))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    start_date: Option<String>,
    end_date: Option<String>,
    format: Option<String>,
}

impl RangeQuery {
    fn range(&self) -> Result<Option<DateRange>> {
        DateRange::from_bounds(self.start_date.as_deref(), self.end_date.as_deref())
    }
}

async fn kpis(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<RangeQuery>,
) -> Result<Json<KpiReport>> {
    let range = q.range()?;
    state
        .run(move |conn| reports::kpis(conn, user.id, range.as_ref()))
        .await
        .or_internal("Failed to fetch KPIs")
        .map(Json)
}

async fn spending_by_category(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<CategorySpend>>> {
    let range = q.range()?;
    state
        .run(move |conn| reports::spending_by_category(conn, user.id, range.as_ref()))
        .await
        .or_internal("Failed to fetch category data")
        .map(Json)
}

async fn monthly_comparison(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<MonthlyCategoryTotal>>> {
    state
        .run(move |conn| reports::monthly_comparison(conn, user.id))
        .await
        .or_internal("Failed to fetch monthly data")
        .map(Json)
}

#[derive(Deserialize)]
struct TrendsQuery {
    period: Option<String>,
}

async fn trends(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<TrendsQuery>,
) -> Result<Json<Vec<TrendBucket>>> {
    let period = TrendPeriod::parse_or_month(q.period.as_deref());
    state
        .run(move |conn| reports::trends(conn, user.id, period))
        .await
        .or_internal("Failed to fetch trends")
        .map(Json)
}

async fn insights(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<Insight>>> {
    let today = chrono::Local::now().date_naive();
    state
        .run(move |conn| reports::insights(conn, user.id, today))
        .await
        .or_internal("Failed to generate insights")
        .map(Json)
}

async fn export(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<RangeQuery>,
) -> Result<Response> {
    let range = q.range()?;
    let rows = state
        .run(move |conn| reports::export_rows(conn, user.id, range.as_ref()))
        .await
        .or_internal("Failed to export data")?;

    if q.format.as_deref() == Some("csv") {
        let body = reports::to_csv(&rows).or_internal("Failed to export data")?;
        Ok((
            [
                (CONTENT_TYPE, "text/csv"),
                (CONTENT_DISPOSITION, "attachment; filename=transactions.csv"),
            ],
            body,
        )
            .into_response())
    } else {
        Ok(Json(rows).into_response())
    }
}
