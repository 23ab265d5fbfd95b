use axum::extract::{Form, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::auth::csrf::{self, CsrfForm};
use crate::auth::session::{FlashKind, Session};
use crate::content::comments::{self, CommentAction, CommentCommand, CommentForm};
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::routes::home::flash_redirect;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CommentQuery {
    pub action: Option<String>,
    pub id: Option<String>,
}

impl CommentQuery {
    fn action(&self) -> Option<CommentAction> {
        self.action.as_deref().and_then(CommentAction::parse)
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/comments", get(not_a_form).post(submit))
}

async fn not_a_form(CurrentUser(_user): CurrentUser) -> Redirect {
    Redirect::to("/")
}

/// `POST /comments?action=store|update|delete[&id=N]`. Every outcome is reported as a flash
/// message on the page the engine points back to.
pub async fn submit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Query(query): Query<CommentQuery>,
    Form(form): Form<CsrfForm<CommentForm>>,
) -> AppResult<Response> {
    let Some(action) = query.action() else {
        return Ok(Redirect::to("/").into_response());
    };

    let conn = state.db.get()?;
    if !form.is_valid(&session) {
        let back = form
            .data
            .post_id
            .as_deref()
            .and_then(|id| id.trim().parse::<i64>().ok())
            .map(|id| format!("/posts/{}", id))
            .unwrap_or_else(|| "/".to_string());
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, &back);
    }

    let command = CommentCommand::from_form(action, form.data, query.id.as_deref());
    match comments::execute(&conn, user.id, &command)? {
        Ok(success) => flash_redirect(
            &conn,
            &session,
            FlashKind::Success,
            command.success_message(),
            &success.target.to_string(),
        ),
        Err(failure) => flash_redirect(
            &conn,
            &session,
            FlashKind::Error,
            &failure.reason.to_string(),
            &failure.target.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_actions_are_dispatched() {
        let q = |a: &str| CommentQuery {
            action: Some(a.to_string()),
            id: None,
        };
        assert_eq!(q("store").action(), Some(CommentAction::Store));
        assert_eq!(q("update").action(), Some(CommentAction::Update));
        assert_eq!(q("delete").action(), Some(CommentAction::Delete));
        assert_eq!(q("STORE").action(), None);
        assert_eq!(q("purge").action(), None);
        assert_eq!(CommentQuery::default().action(), None);
    }
}
