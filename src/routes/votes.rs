use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::auth::csrf::CsrfForm;
use crate::auth::session::Session;
use crate::content::votes::{self, Direction, ItemType, VoteError, VoteTally};
use crate::error::{ApiError, ApiResult};
use crate::extractors::ApiUser;
use crate::state::AppState;

/// Raw vote form. Everything arrives as text and is checked by [`VoteForm::parse`].
#[derive(Debug, Default, Deserialize)]
pub struct VoteForm {
    pub item_type: Option<String>,
    pub item_id: Option<String>,
    pub vote: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteRequest {
    pub item: ItemType,
    pub item_id: i64,
    pub direction: Direction,
}

impl VoteForm {
    pub fn parse(&self) -> Option<VoteRequest> {
        let item = self.item_type.as_deref()?.parse().ok()?;
        let item_id = self.item_id.as_deref()?.trim().parse::<i64>().ok().filter(|id| *id > 0)?;
        let direction = Direction::from_value(self.vote.as_deref()?.trim().parse().ok()?)?;
        Some(VoteRequest {
            item,
            item_id,
            direction,
        })
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/vote", post(cast).fallback(wrong_method))
}

/// Anonymous callers hear about the missing login before the wrong method.
async fn wrong_method(ApiUser(_user): ApiUser) -> ApiError {
    ApiError::method_not_allowed()
}

pub async fn cast(
    State(state): State<AppState>,
    ApiUser(user): ApiUser,
    session: Session,
    form: Result<Form<CsrfForm<VoteForm>>, FormRejection>,
) -> ApiResult<Json<VoteTally>> {
    let invalid_csrf = || ApiError::new(StatusCode::FORBIDDEN, "Invalid CSRF token.");
    let Ok(Form(form)) = form else {
        return Err(invalid_csrf());
    };
    if !form.is_valid(&session) {
        return Err(invalid_csrf());
    }

    let request = form.data.parse().ok_or_else(ApiError::invalid_data)?;

    let conn = state.db.get()?;
    match votes::cast_vote(&conn, request.item, request.item_id, user.id, request.direction) {
        Ok(tally) => Ok(Json(tally)),
        Err(VoteError::ItemNotFound(..)) => Err(ApiError::invalid_data()),
        Err(VoteError::Database(e)) => Err(e.into()),
    }
}
