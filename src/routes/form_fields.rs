use std::collections::HashMap;

use axum::extract::{Form, FromRequest, Multipart, Request};
use axum::http::header;

use crate::auth::csrf;
use crate::auth::session::Session;
use crate::error::{AppError, AppResult};
use crate::uploads::IncomingFile;

/// Fields of a form posted either as `multipart/form-data` or urlencoded. File inputs left
/// empty by the browser (no file name and no bytes) are dropped.
#[derive(Debug, Default)]
pub struct FormFields {
    text: HashMap<String, String>,
    files: HashMap<String, IncomingFile>,
}

impl FormFields {
    pub async fn read_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut fields = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            match field.file_name().map(str::to_owned) {
                Some(file_name) => {
                    let bytes = field.bytes().await?;
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    fields.files.insert(
                        name,
                        IncomingFile {
                            file_name,
                            bytes: bytes.to_vec(),
                        },
                    );
                }
                None => {
                    let value = field.text().await?;
                    fields.text.insert(name, value);
                }
            }
        }
        Ok(fields)
    }

    pub fn text(&self, name: &str) -> &str {
        self.text.get(name).map(String::as_str).unwrap_or("")
    }

    /// Checkbox semantics: present with `1`, `on` or `yes`.
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.text(name), "1" | "on" | "yes")
    }

    pub fn take_file(&mut self, name: &str) -> Option<IncomingFile> {
        self.files.remove(name)
    }

    pub fn csrf_valid(&self, session: &Session) -> bool {
        csrf::tokens_match(&session.csrf_token, self.text(csrf::FIELD))
    }
}

impl<S: Send + Sync> FromRequest<S> for FormFields {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Self::read_multipart(multipart).await
        } else {
            let Form(text) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            Ok(Self {
                text,
                files: HashMap::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FormFields {
        FormFields {
            text: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: HashMap::new(),
        }
    }

    #[test]
    fn missing_text_reads_as_empty() {
        let f = fields(&[("title", "Hello")]);
        assert_eq!(f.text("title"), "Hello");
        assert_eq!(f.text("content"), "");
    }

    #[test]
    fn checkbox_flags() {
        let f = fields(&[("a", "1"), ("b", "on"), ("c", "0")]);
        assert!(f.flag("a"));
        assert!(f.flag("b"));
        assert!(!f.flag("c"));
        assert!(!f.flag("d"));
    }

    #[test]
    fn csrf_field_is_checked_against_session() {
        let session = Session {
            token: "t".into(),
            user: None,
            csrf_token: "abc".into(),
            is_new: false,
        };
        assert!(fields(&[("_csrf", "abc")]).csrf_valid(&session));
        assert!(!fields(&[("_csrf", "abd")]).csrf_valid(&session));
        assert!(!fields(&[]).csrf_valid(&session));
    }
}
