use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::session::{self, Flash, FlashKind, Session, SessionUser};
use crate::content::notifications;
use crate::content::posts::{self, PageLink, Pagination, PostSummary};
use crate::error::AppResult;
use crate::routes::filters;
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Navigation chrome shared by every page: who is logged in, the CSRF token for forms and
/// scripts, the pending flash message and the notification badge count.
pub struct PageContext {
    pub user: Option<SessionUser>,
    pub csrf_token: String,
    pub flash: Option<Flash>,
    pub unread_count: i64,
}

impl PageContext {
    /// Consumes the session's flash message.
    pub fn load(conn: &Connection, session: &Session) -> rusqlite::Result<Self> {
        let unread_count = match &session.user {
            Some(user) => notifications::unread_count(conn, user.id)?,
            None => 0,
        };
        Ok(Self {
            user: session.user.clone(),
            csrf_token: session.csrf_token.clone(),
            flash: session::take_flash(conn, &session.token)?,
            unread_count,
        })
    }

    /// Id of the logged-in user, 0 for anonymous visitors. Ids start at 1.
    pub fn viewer_id(&self) -> i64 {
        self.user.as_ref().map_or(0, |u| u.id)
    }
}

/// Sets a flash message on the session and redirects.
pub fn flash_redirect(
    conn: &Connection,
    session: &Session,
    kind: FlashKind,
    message: &str,
    to: &str,
) -> AppResult<Response> {
    session::set_flash(conn, &session.token, kind, message)?;
    Ok(Redirect::to(to).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    /// Requested page number; anything that is not a positive integer means page 1.
    pub fn number(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse().ok())
            .filter(|p| *p >= 1)
            .unwrap_or(1)
    }
}

#[derive(Template)]
#[template(path = "pages/home.html")]
pub struct HomeTemplate {
    pub page: PageContext,
    pub posts: Vec<PostSummary>,
    pub pagination: Pagination,
    pub page_url: &'static str,
}

pub async fn index(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let (posts, pagination) = posts::list_page(
        &conn,
        None,
        query.number(),
        state.config.content.posts_per_page,
    )?;

    Ok(Html(HomeTemplate {
        page: PageContext::load(&conn, &session)?,
        posts,
        pagination,
        page_url: "/",
    })
    .into_response())
}
