use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::csrf::{CsrfForm, NoFields};
use crate::auth::session::Session;
use crate::content::notifications::{self, NotificationFeed};
use crate::error::{ApiError, ApiResult};
use crate::extractors::ApiUser;
use crate::state::AppState;

/// Missing or stale CSRF token. The bell script reloads the page on this status.
const CSRF_EXPIRED: u16 = 419;

#[derive(Debug, Serialize)]
pub struct ReadAck {
    pub success: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/notifications", get(feed))
        .route("/notifications/read", post(mark_read).fallback(wrong_method))
}

async fn wrong_method(ApiUser(_user): ApiUser) -> ApiError {
    ApiError::method_not_allowed()
}

pub async fn feed(State(state): State<AppState>, ApiUser(user): ApiUser) -> ApiResult<Json<NotificationFeed>> {
    let conn = state.db.get()?;
    let feed = notifications::fetch(&conn, user.id, state.config.content.notification_limit)?;
    Ok(Json(feed))
}

pub async fn mark_read(
    State(state): State<AppState>,
    ApiUser(user): ApiUser,
    session: Session,
    form: Result<Form<CsrfForm<NoFields>>, FormRejection>,
) -> ApiResult<Json<ReadAck>> {
    let valid = matches!(&form, Ok(Form(form)) if form.is_valid(&session));
    if !valid {
        let status = StatusCode::from_u16(CSRF_EXPIRED).unwrap_or(StatusCode::FORBIDDEN);
        return Err(ApiError::new(status, "Invalid CSRF token."));
    }

    let conn = state.db.get()?;
    let flipped = notifications::mark_all_read(&conn, user.id)?;
    tracing::debug!(user_id = user.id, flipped, "notifications marked read");
    Ok(Json(ReadAck { success: true }))
}
