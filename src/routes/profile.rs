use askama::Template;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::auth::accounts::{self, AvatarChange, Validated, MAX_BIO_CHARS};
use crate::auth::csrf;
use crate::auth::session::{FlashKind, Session};
use crate::db::models::User;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::routes::filters;
use crate::routes::form_fields::FormFields;
use crate::routes::home::{flash_redirect, Html, PageContext};
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub page: PageContext,
    pub account: User,
    pub max_bio_chars: usize,
    pub return_to: &'static str,
}

/// The `?action=` of a profile form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAction {
    Username,
    Bio,
    Password,
    Avatar,
}

impl ProfileAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "username" => Some(Self::Username),
            "bio" => Some(Self::Bio),
            "password" => Some(Self::Password),
            "avatar" => Some(Self::Avatar),
            _ => None,
        }
    }

    fn success_message(self) -> &'static str {
        match self {
            Self::Username => "Username updated.",
            Self::Bio => "About section updated.",
            Self::Password => "Password updated.",
            Self::Avatar => "Profile photo updated.",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileQuery {
    pub action: Option<String>,
}

/// Only the two pages that embed the avatar form may be returned to.
pub fn return_target(raw: &str) -> &'static str {
    match raw.trim() {
        "/dashboard" => "/dashboard",
        _ => "/profile",
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/profile", get(show).post(submit))
}

pub async fn show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let Some(account) = accounts::find_user(&conn, user.id)? else {
        return flash_redirect(&conn, &session, FlashKind::Error, "User not found.", "/login");
    };

    Ok(Html(ProfileTemplate {
        page: PageContext::load(&conn, &session)?,
        account,
        max_bio_chars: MAX_BIO_CHARS,
        return_to: "/profile",
    })
    .into_response())
}

pub async fn submit(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Query(query): Query<ProfileQuery>,
    mut fields: FormFields,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !fields.csrf_valid(&session) {
        return flash_redirect(&conn, &session, FlashKind::Error, csrf::INVALID_MESSAGE, "/profile");
    }

    let Some(action) = query.action.as_deref().and_then(ProfileAction::parse) else {
        return flash_redirect(&conn, &session, FlashKind::Error, "Invalid action.", "/profile");
    };

    let mut back = "/profile";
    let mut success = action.success_message();
    let outcome: Validated<()> = match action {
        ProfileAction::Username => {
            accounts::change_username(&conn, user.id, fields.text("username"))?.map(|name| {
                tracing::info!(user_id = user.id, username = %name, "username changed");
            })
        }
        ProfileAction::Bio => accounts::change_bio(&conn, user.id, fields.text("bio"))?,
        ProfileAction::Password => accounts::change_password(
            &conn,
            user.id,
            fields.text("current_password"),
            fields.text("new_password"),
            fields.text("confirm_password"),
            state.config.auth.bcrypt_cost,
        )?,
        ProfileAction::Avatar => {
            back = return_target(fields.text("return_to"));
            let change = match fields.take_file("avatar") {
                Some(file) => Some(AvatarChange::Replace(file)),
                None if fields.text("remove_avatar") == "1" => {
                    success = "Profile photo removed.";
                    Some(AvatarChange::Remove)
                }
                None => None,
            };
            match change {
                Some(change) => accounts::change_avatar(&conn, &state.uploads, user.id, change)?,
                None => Err(vec!["Select an image or check remove current photo.".to_string()]),
            }
        }
    };

    match outcome {
        Ok(()) => flash_redirect(&conn, &session, FlashKind::Success, success, back),
        Err(errors) => {
            let message = errors
                .first()
                .map(String::as_str)
                .unwrap_or("Could not update the profile.");
            flash_redirect(&conn, &session, FlashKind::Error, message, back)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions() {
        assert_eq!(ProfileAction::parse("bio"), Some(ProfileAction::Bio));
        assert_eq!(ProfileAction::parse("avatar"), Some(ProfileAction::Avatar));
        assert_eq!(ProfileAction::parse("email"), None);
    }

    #[test]
    fn return_target_is_restricted() {
        assert_eq!(return_target("/dashboard"), "/dashboard");
        assert_eq!(return_target("/profile"), "/profile");
        assert_eq!(return_target("https://evil.example"), "/profile");
        assert_eq!(return_target(""), "/profile");
    }
}
