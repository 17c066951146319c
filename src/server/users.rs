use axum::extract::{Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use zeroize::Zeroize;

use super::{AppState, CurrentUser};
use crate::auth::RequestMeta;
use crate::error::{OrInternal, Result};
use crate::users::{self, ActivityPage, Profile, ProfilePatch, Statistics, Subscription};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile).put(update_profile))
        .route("/password", put(change_password))
        .route("/statistics", get(statistics))
        .route("/subscription", get(subscription))
        .route("/subscription/upgrade", post(upgrade))
        .route("/account", delete(delete_account))
        .route("/activity", get(activity))
}

async fn profile(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Profile>> {
    state
        .run(move |conn| users::profile(conn, user.id))
        .await
        .or_internal("Failed to fetch profile")
        .map(Json)
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>> {
    state
        .run(move |conn| users::update_profile(conn, user.id, &patch))
        .await
        .or_internal("Failed to update profile")
        .map(Json)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordBody {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

impl Drop for PasswordBody {
    fn drop(&mut self) {
        self.current_password.zeroize();
        self.new_password.zeroize();
    }
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    meta: RequestMeta,
    Json(body): Json<PasswordBody>,
) -> Result<Json<Value>> {
    state
        .run(move |conn| users::change_password(conn, user.id, &body.current_password, &body.new_password, &meta))
        .await
        .or_internal("Failed to change password")?;
    Ok(Json(json!({ "message": "Password updated successfully" })))
}

async fn statistics(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Statistics>> {
    state
        .run(move |conn| users::statistics(conn, user.id))
        .await
        .or_internal("Failed to fetch statistics")
        .map(Json)
}

async fn subscription(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Subscription>> {
    state
        .run(move |conn| users::subscription(conn, user.id))
        .await
        .or_internal("Failed to fetch subscription")
        .map(Json)
}

#[derive(Deserialize)]
struct UpgradeBody {
    #[serde(default)]
    plan: String,
}

async fn upgrade(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    meta: RequestMeta,
    Json(body): Json<UpgradeBody>,
) -> Result<Json<Value>> {
    let tier = state
        .run(move |conn| users::upgrade(conn, user.id, &body.plan, &meta))
        .await
        .or_internal("Failed to upgrade subscription")?;
    Ok(Json(json!({
        "message": "Subscription upgraded successfully",
        "plan": tier.as_str(),
    })))
}

#[derive(Deserialize)]
struct DeleteAccountBody {
    #[serde(default)]
    password: String,
}

impl Drop for DeleteAccountBody {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

async fn delete_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    meta: RequestMeta,
    Json(body): Json<DeleteAccountBody>,
) -> Result<Json<Value>> {
    state
        .run(move |conn| users::delete_account(conn, user.id, &body.password, &meta))
        .await
        .or_internal("Failed to delete account")?;
    Ok(Json(json!({ "message": "Account deleted successfully" })))
}

#[derive(Deserialize)]
struct ActivityQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

async fn activity(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ActivityQuery>,
) -> Result<Json<ActivityPage>> {
    state
        .run(move |conn| users::activity(conn, user.id, q.page, q.limit))
        .await
        .or_internal("Failed to fetch activity")
        .map(Json)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::server::testing::TestApp;

    #[tokio::test]
    async fn test_profile_and_statistics() {
        let app = TestApp::new();
        let token = app.register("a@example.com").await;

        let (status, body) = app
            .send("PUT", "/api/user/profile", Some(&token), Some(json!({ "currency": "gbp", "timezone": "Europe/London" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currency"], "GBP");
        assert_eq!(body["timezone"], "Europe/London");

        let (status, body) = app.send("GET", "/api/user/statistics", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transactionCount"], 0);
        assert!(body["firstTransaction"].is_null());
    }

    #[tokio::test]
    async fn test_upgrade_and_activity() {
        let app = TestApp::new();
        let token = app.register("a@example.com").await;
        let (status, body) = app
            .send("POST", "/api/user/subscription/upgrade", Some(&token), Some(json!({ "plan": "premium" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"], "premium");

        let (_, sub) = app.send("GET", "/api/user/subscription", Some(&token), None).await;
        assert_eq!(sub["display_name"], "Premium");
        assert_eq!(sub["features"]["max_transactions"], 50000);

        let (status, body) = app
            .send("POST", "/api/user/subscription/upgrade", Some(&token), Some(json!({ "plan": "gold" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["message"], "Invalid plan");

        let (status, body) = app.send("GET", "/api/user/activity?limit=1", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["activities"][0]["action"], "subscription_upgraded");
    }

    #[tokio::test]
    async fn test_delete_account_locks_out_tokens() {
        let app = TestApp::new();
        let token = app.register("a@example.com").await;
        let (status, _) = app
            .send("DELETE", "/api/user/account", Some(&token), Some(json!({ "password": "wrong-one" })))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .send("DELETE", "/api/user/account", Some(&token), Some(json!({ "password": "password123" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.send("GET", "/api/user/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_change_password() {
        let app = TestApp::new();
        let token = app.register("a@example.com").await;
        let (status, _) = app
            .send(
                "PUT",
                "/api/user/password",
                Some(&token),
                Some(json!({ "currentPassword": "password123", "newPassword": "better-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "email": "a@example.com", "password": "better-password" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
}
