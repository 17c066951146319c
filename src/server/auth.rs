use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use zeroize::Zeroize;

use super::AppState;
use crate::auth::{self, AuthResponse, Registration, RequestMeta, TokenPair};
use crate::error::{OrInternal, Result};

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

impl Drop for LoginBody {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ForgotBody {
    #[serde(default)]
    email: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
}

async fn register(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<Registration>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let ttl = state.settings.token_ttl();
    let resp = state
        .run(move |conn| auth::register(conn, &body, ttl, &meta))
        .await
        .or_internal("Registration failed")?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn login(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(body): Json<LoginBody>,
) -> Result<Json<AuthResponse>> {
    let ttl = state.settings.token_ttl();
    state
        .run(move |conn| auth::login(conn, &body.email, &body.password, ttl, &meta))
        .await
        .or_internal("Login failed")
        .map(Json)
}

async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshBody>) -> Result<Json<TokenPair>> {
    let ttl = state.settings.token_ttl();
    state
        .run(move |conn| auth::refresh(conn, body.refresh_token.as_deref(), ttl))
        .await
        .or_internal("Invalid refresh token")
        .map(Json)
}

async fn logout(State(state): State<AppState>, Json(body): Json<RefreshBody>) -> Result<Json<Value>> {
    state
        .run(move |conn| auth::logout(conn, body.refresh_token.as_deref()))
        .await
        .or_internal("Logout failed")?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}

async fn forgot_password(State(state): State<AppState>, Json(body): Json<ForgotBody>) -> Result<Json<Value>> {
    let message = state
        .run(move |conn| auth::forgot_password(conn, &body.email))
        .await
        .or_internal("Request failed")?;
    Ok(Json(json!({ "message": message })))
}
