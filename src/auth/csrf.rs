//! CSRF protection: every session carries one random token, and every mutating form or API call
//! must echo it back in the `_csrf` field.

use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::session::Session;

pub const FIELD: &str = "_csrf";
pub const INVALID_MESSAGE: &str = "Session expired or invalid CSRF token. Try again.";

/// Constant-time comparison of the session's token with the submitted one.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
    !expected.is_empty()
        && expected.len() == provided.len()
        && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// Form data wrapper that carries the CSRF token next to the form's own fields.
#[derive(Debug, Deserialize)]
pub struct CsrfForm<T> {
    #[serde(rename = "_csrf", default)]
    pub csrf_token: String,
    #[serde(flatten)]
    pub data: T,
}

/// Body for forms whose only field is the CSRF token (logout, mark-as-read).
#[derive(Debug, Default, Deserialize)]
pub struct NoFields {}

impl<T> CsrfForm<T> {
    pub fn is_valid(&self, session: &Session) -> bool {
        tokens_match(&session.csrf_token, &self.csrf_token)
    }
}
