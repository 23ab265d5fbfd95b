use askama::Template;
use axum::extract::{Form, Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::auth::csrf::{self, CsrfForm};
use crate::auth::session::{FlashKind, Session};
use crate::content::comments::{self, CommentThread, MAX_COMMENT_CHARS};
use crate::content::posts::{
    self, CoverChange, PageLink, Pagination, PostDetail, PostDraft, PostSummary,
};
use crate::db::models::Post;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::routes::filters;
use crate::routes::home::{flash_redirect, Html, PageContext, PageQuery};
use crate::routes::form_fields::FormFields;
use crate::state::AppState;

const NOT_OWNED: &str = "Post not found or you do not have permission.";

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub page: PageContext,
    pub detail: PostDetail,
    pub threads: Vec<CommentThread>,
    pub max_comment_chars: usize,
}

#[derive(Template)]
#[template(path = "pages/post_form.html")]
pub struct PostFormTemplate {
    pub page: PageContext,
    pub heading: &'static str,
    pub action: String,
    pub submit_label: &'static str,
    pub title: String,
    pub content: String,
    pub cover_image: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "pages/post_delete.html")]
pub struct PostDeleteTemplate {
    pub page: PageContext,
    pub post: Post,
}

#[derive(Template)]
#[template(path = "pages/dashboard.html")]
pub struct DashboardTemplate {
    pub page: PageContext,
    pub posts: Vec<PostSummary>,
    pub pagination: Pagination,
    pub page_url: &'static str,
    pub return_to: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteForm {
    pub confirm: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/posts", axum::routing::post(create))
        .route("/posts/new", get(new_page))
        .route("/posts/{id}", get(show))
        .route("/posts/{id}/edit", get(edit_page).post(update))
        .route("/posts/{id}/delete", get(delete_page).post(delete))
}

// -- Reading --

pub async fn show(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let viewer = session.user_id();

    let Some(detail) = posts::detail(&conn, id, viewer)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, "Post not found.", "/");
    };
    let threads = comments::thread_for_post(&conn, id, viewer)?;

    Ok(Html(PostTemplate {
        page: PageContext::load(&conn, &session)?,
        detail,
        threads,
        max_comment_chars: MAX_COMMENT_CHARS,
    })
    .into_response())
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let (posts, pagination) = posts::list_page(
        &conn,
        Some(user.id),
        query.number(),
        state.config.content.posts_per_page,
    )?;

    Ok(Html(DashboardTemplate {
        page: PageContext::load(&conn, &session)?,
        posts,
        pagination,
        page_url: "/dashboard",
        return_to: "/dashboard",
    })
    .into_response())
}

// -- Create / edit --

fn create_form(page: PageContext) -> PostFormTemplate {
    PostFormTemplate {
        page,
        heading: "New post",
        action: "/posts".to_string(),
        submit_label: "Publish",
        title: String::new(),
        content: String::new(),
        cover_image: None,
        errors: Vec::new(),
    }
}

fn edit_form(page: PageContext, post: &Post) -> PostFormTemplate {
    PostFormTemplate {
        page,
        heading: "Edit post",
        action: format!("/posts/{}/edit", post.id),
        submit_label: "Save changes",
        title: post.title.clone(),
        content: post.content.clone(),
        cover_image: post.cover_image.clone(),
        errors: Vec::new(),
    }
}

pub async fn new_page(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    session: Session,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    Ok(Html(create_form(PageContext::load(&conn, &session)?)).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    mut fields: FormFields,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !fields.csrf_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, "/posts/new");
    }

    let draft = PostDraft::new(fields.text("title"), fields.text("content"));
    let cover = fields.take_file("cover_image");

    match posts::create(&conn, &state.uploads, user.id, &draft, cover)? {
        Ok(post_id) => flash_redirect(
            &conn,
            &session,
            FlashKind::Success,
            "Post published.",
            &format!("/posts/{}", post_id),
        ),
        Err(errors) => {
            let mut form = create_form(PageContext::load(&conn, &session)?);
            form.title = draft.title;
            form.content = draft.content;
            form.errors = errors;
            Ok(Html(form).into_response())
        }
    }
}

pub async fn edit_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let Some(post) = posts::find_owned(&conn, id, user.id)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, NOT_OWNED, "/dashboard");
    };
    Ok(Html(edit_form(PageContext::load(&conn, &session)?, &post)).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
    mut fields: FormFields,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let edit_url = format!("/posts/{}/edit", id);
    if !fields.csrf_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, &edit_url);
    }
    let Some(post) = posts::find_owned(&conn, id, user.id)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, NOT_OWNED, "/dashboard");
    };

    let draft = PostDraft::new(fields.text("title"), fields.text("content"));
    let cover = match fields.take_file("cover_image") {
        Some(file) => CoverChange::Replace(file),
        None if fields.flag("remove_cover") => CoverChange::Remove,
        None => CoverChange::Keep,
    };

    match posts::update(&conn, &state.uploads, &post, &draft, cover)? {
        Ok(post_id) => flash_redirect(
            &conn,
            &session,
            FlashKind::Success,
            "Post updated.",
            &format!("/posts/{}", post_id),
        ),
        Err(errors) => {
            let mut form = edit_form(PageContext::load(&conn, &session)?, &post);
            form.title = draft.title;
            form.content = draft.content;
            form.errors = errors;
            Ok(Html(form).into_response())
        }
    }
}

// -- Delete --

pub async fn delete_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let Some(post) = posts::find_owned(&conn, id, user.id)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, NOT_OWNED, "/dashboard");
    };
    Ok(Html(PostDeleteTemplate {
        page: PageContext::load(&conn, &session)?,
        post,
    })
    .into_response())
}

/// Deletes only when the form confirms with `confirm=yes`; anything else cancels back to the post.
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
    Form(form): Form<CsrfForm<DeleteForm>>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !form.is_valid(&session) {
        return flash_redirect(
            &conn,
            &session,
            FlashKind::Error,
            csrf::INVALID_MESSAGE,
            &format!("/posts/{}/delete", id),
        );
    }
    if posts::find_owned(&conn, id, user.id)?.is_none() {
        return flash_redirect(&conn, &session, FlashKind::Error, NOT_OWNED, "/dashboard");
    }

    if form.data.confirm.as_deref() != Some("yes") {
        return Ok(Redirect::to(&format!("/posts/{}", id)).into_response());
    }

    posts::delete(&conn, &state.uploads, id, user.id)?;
    flash_redirect(&conn, &session, FlashKind::Success, "Post deleted.", "/dashboard")
}
