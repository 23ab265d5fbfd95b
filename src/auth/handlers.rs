use askama::Template;
use axum::extract::{Form, State};
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::auth::accounts;
use crate::auth::csrf::{self, CsrfForm, NoFields};
use crate::auth::middleware::{clear_session_cookie, session_cookie};
use crate::auth::session::{self, FlashKind, Session};
use crate::error::AppResult;
use crate::routes::home::{flash_redirect, Html, PageContext};
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/register.html")]
pub struct RegisterTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub username: String,
    pub email: String,
}

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub page: PageContext,
    pub errors: Vec<String>,
    pub identifier: String,
}

// -- Request types --

#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    /// Email or username.
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub password: String,
}

// -- Registration --

pub async fn register_page(State(state): State<AppState>, session: Session) -> AppResult<Response> {
    if session.user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let conn = state.db.get()?;
    Ok(Html(RegisterTemplate {
        page: PageContext::load(&conn, &session)?,
        errors: Vec::new(),
        username: String::new(),
        email: String::new(),
    })
    .into_response())
}

pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfForm<RegisterForm>>,
) -> AppResult<Response> {
    if session.user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let conn = state.db.get()?;
    if !form.is_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, "/register");
    }

    let data = form.data;
    let outcome = accounts::register(
        &conn,
        &data.username,
        &data.email,
        &data.password,
        state.config.auth.bcrypt_cost,
    )?;

    match outcome {
        Ok(_) => flash_redirect(
            &conn,
            &session,
            FlashKind::Success,
            "Account created. Log in to continue.",
            "/login",
        ),
        Err(errors) => Ok(Html(RegisterTemplate {
            page: PageContext::load(&conn, &session)?,
            errors,
            username: data.username.trim().to_string(),
            email: data.email.trim().to_string(),
        })
        .into_response()),
    }
}

// -- Login / logout --

pub async fn login_page(State(state): State<AppState>, session: Session) -> AppResult<Response> {
    if session.user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let conn = state.db.get()?;
    Ok(Html(LoginTemplate {
        page: PageContext::load(&conn, &session)?,
        errors: Vec::new(),
        identifier: String::new(),
    })
    .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfForm<LoginForm>>,
) -> AppResult<Response> {
    if session.user.is_some() {
        return Ok(Redirect::to("/dashboard").into_response());
    }
    let conn = state.db.get()?;
    if !form.is_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, "/login");
    }

    let auth = &state.config.auth;
    let data = form.data;
    let user = match accounts::authenticate(&conn, &data.identifier, &data.password, auth.bcrypt_cost)? {
        Ok(user) => user,
        Err(errors) => {
            tracing::info!(identifier = %data.identifier.trim(), "failed login");
            return Ok(Html(LoginTemplate {
                page: PageContext::load(&conn, &session)?,
                errors,
                identifier: data.identifier.trim().to_string(),
            })
            .into_response());
        }
    };

    let fresh = session::rotate(&conn, &session.token, user.id, auth.session_hours)?;
    session::set_flash(
        &conn,
        &fresh.token,
        FlashKind::Success,
        &format!("Welcome back, {}!", user.username),
    )?;
    tracing::info!(user_id = user.id, "user logged in");

    Ok((
        AppendHeaders([(header::SET_COOKIE, session_cookie(auth, &fresh.token))]),
        Redirect::to("/dashboard"),
    )
        .into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<CsrfForm<NoFields>>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !form.is_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, "/");
    }

    session::destroy(&conn, &session.token)?;
    if let Some(user_id) = session.user_id() {
        tracing::info!(user_id, "user logged out");
    }

    Ok((
        AppendHeaders([(header::SET_COOKIE, clear_session_cookie(&state.config.auth))]),
        Redirect::to("/"),
    )
        .into_response())
}
