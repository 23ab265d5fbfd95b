use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::auth::accounts;
use crate::auth::session::{FlashKind, Session};
use crate::content::posts::{self, PageLink, Pagination, PostSummary};
use crate::db::models::User;
use crate::error::AppResult;
use crate::routes::filters;
use crate::routes::home::{flash_redirect, Html, PageContext, PageQuery};
use crate::state::AppState;

/// Public profile: avatar, bio and the user's posts.
#[derive(Template)]
#[template(path = "pages/user.html")]
pub struct UserTemplate {
    pub page: PageContext,
    pub profile: User,
    pub posts: Vec<PostSummary>,
    pub pagination: Pagination,
    pub page_url: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/users/{id}", get(show))
}

pub async fn show(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let Some(profile) = accounts::find_user(&conn, id)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, "User not found.", "/");
    };

    let (posts, pagination) = posts::list_page(
        &conn,
        Some(profile.id),
        query.number(),
        state.config.content.posts_per_page,
    )?;

    Ok(Html(UserTemplate {
        page: PageContext::load(&conn, &session)?,
        page_url: format!("/users/{}", profile.id),
        profile,
        posts,
        pagination,
    })
    .into_response())
}
