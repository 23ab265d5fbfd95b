use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use super::session;
use crate::config::AuthConfig;
use crate::error::AppError;
use crate::state::AppState;

// -- Cookie helpers --

pub fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let max_age_secs = auth.session_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        auth.cookie_name,
        token,
        max_age_secs,
        if auth.secure_cookie { "; Secure" } else { "" }
    )
}

pub fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", auth.cookie_name)
}

pub fn get_cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

/// Middleware that resolves the session cookie to a [`session::Session`] and stores it in the
/// request extensions. Visitors without a valid session get a new anonymous one, and the cookie
/// is set on the way out unless the handler already issued one (login rotates the token).
pub async fn attach_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = &state.config.auth;
    let token = get_cookie_value(req.headers(), &auth.cookie_name).map(str::to_owned);

    let session = {
        let conn = state.db.get()?;
        let existing = match token {
            Some(token) => session::load(&conn, &token)?,
            None => None,
        };
        match existing {
            Some(session) => session,
            None => session::create(&conn, None, auth.session_hours)?,
        }
    };

    let new_cookie = session
        .is_new
        .then(|| session_cookie(auth, &session.token));
    req.extensions_mut().insert(session);

    let mut response = next.run(req).await;

    if let Some(cookie) = new_cookie {
        if !response.headers().contains_key(header::SET_COOKIE) {
            let value = HeaderValue::from_str(&cookie).map_err(|e| AppError::Internal(e.to_string()))?;
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    Ok(response)
}

/// Load-only variant for the JSON endpoints. A valid cookie attaches its session; anything else
/// leaves the request without one, so anonymous API calls never write a session row.
pub async fn load_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth = &state.config.auth;
    if let Some(token) = get_cookie_value(req.headers(), &auth.cookie_name).map(str::to_owned) {
        let conn = state.db.get()?;
        if let Some(session) = session::load(&conn, &token)? {
            req.extensions_mut().insert(session);
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(secure: bool) -> AuthConfig {
        AuthConfig {
            cookie_name: "sid".into(),
            session_hours: 2,
            bcrypt_cost: 4,
            secure_cookie: secure,
        }
    }

    #[test]
    fn cookie_attributes() {
        assert_eq!(
            session_cookie(&auth(false), "abc"),
            "sid=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=7200"
        );
        assert!(session_cookie(&auth(true), "abc").ends_with("; Secure"));
        assert_eq!(
            clear_session_cookie(&auth(false)),
            "sid=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0"
        );
    }

    #[test]
    fn finds_named_cookie_among_several() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark; sid=tok123"));
        headers.append(header::COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(get_cookie_value(&headers, "sid"), Some("tok123"));
        assert_eq!(get_cookie_value(&headers, "other"), Some("1"));
        assert_eq!(get_cookie_value(&headers, "missing"), None);
    }
}
