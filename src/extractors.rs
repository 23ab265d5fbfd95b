use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::session::{self, FlashKind, Session, SessionUser};
use crate::error::{ApiError, AppError};
use crate::state::AppState;

pub const LOGIN_REQUIRED: &str = "You need to log in to access this page.";

/// The session attached by the session middleware.
impl FromRequestParts<AppState> for Session {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| AppError::Internal("Missing session extension".into()))
    }
}

/// Represents the currently authenticated user on HTML pages.
/// Anonymous visitors are sent to the login page with a flash message.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub SessionUser);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        if let Some(user) = session.user {
            return Ok(CurrentUser(user));
        }

        let flashed = state
            .db
            .get()
            .map_err(AppError::from)
            .and_then(|conn| {
                session::set_flash(&conn, &session.token, FlashKind::Error, LOGIN_REQUIRED)
                    .map_err(AppError::from)
            });
        if let Err(e) = flashed {
            return Err(e.into_response());
        }

        Err(Redirect::to("/login").into_response())
    }
}

/// Authenticated user for the JSON endpoints; anonymous callers get a 401 JSON error.
#[derive(Debug, Clone)]
pub struct ApiUser(pub SessionUser);

impl FromRequestParts<AppState> for ApiUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .and_then(|s| s.user.clone())
            .map(ApiUser)
            .ok_or_else(ApiError::unauthenticated)
    }
}
