//! Server-side sessions keyed by the token held in the session cookie.
//!
//! Every visitor gets a session row, logged in or not, so that the CSRF token and the one-shot
//! flash message exist before login.

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    pub fn is_success(&self) -> bool {
        self.kind == FlashKind::Success
    }
}

/// The session attached to the current request.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: Option<SessionUser>,
    pub csrf_token: String,
    /// Created during this request; the response must carry the cookie.
    pub is_new: bool,
}

impl Session {
    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }
}

/// Creates a session, optionally bound to a user, with a fresh token and CSRF token.
/// Expired rows are swept first so the table only holds live sessions.
pub fn create(conn: &Connection, user_id: Option<i64>, hours: u64) -> rusqlite::Result<Session> {
    purge_expired(conn)?;
    let token = generate_token();
    let csrf_token = generate_token();

    conn.execute(
        "INSERT INTO sessions (token, user_id, csrf_token, expires_at)
         VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![token, user_id, csrf_token, format!("+{} hours", hours)],
    )?;

    let user = match user_id {
        Some(id) => conn
            .query_row(
                "SELECT id, username FROM users WHERE id = ?1",
                params![id],
                |r| {
                    Ok(SessionUser {
                        id: r.get(0)?,
                        username: r.get(1)?,
                    })
                },
            )
            .optional()?,
        None => None,
    };

    Ok(Session {
        token,
        user,
        csrf_token,
        is_new: true,
    })
}

/// Loads an unexpired session.
pub fn load(conn: &Connection, token: &str) -> rusqlite::Result<Option<Session>> {
    conn.query_row(
        "SELECT s.token, s.csrf_token, u.id, u.username
         FROM sessions s
         LEFT JOIN users u ON u.id = s.user_id
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |r| {
            let user = match r.get::<_, Option<i64>>(2)? {
                Some(id) => Some(SessionUser {
                    id,
                    username: r.get(3)?,
                }),
                None => None,
            };
            Ok(Session {
                token: r.get(0)?,
                user,
                csrf_token: r.get(1)?,
                is_new: false,
            })
        },
    )
    .optional()
}

/// Replaces `old_token` with a new session bound to `user_id`. Used on login so that a token
/// known before authentication is never authenticated.
pub fn rotate(conn: &Connection, old_token: &str, user_id: i64, hours: u64) -> rusqlite::Result<Session> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM sessions WHERE token = ?1", params![old_token])?;
    let session = create(&tx, Some(user_id), hours)?;
    tx.commit()?;
    Ok(session)
}

pub fn destroy(conn: &Connection, token: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Stores the message shown on the next rendered page, replacing any pending one.
pub fn set_flash(conn: &Connection, token: &str, kind: FlashKind, message: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions SET flash_kind = ?2, flash_message = ?3 WHERE token = ?1",
        params![token, kind.as_str(), message],
    )?;
    Ok(())
}

/// Returns and clears the pending flash message.
pub fn take_flash(conn: &Connection, token: &str) -> rusqlite::Result<Option<Flash>> {
    let pending: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT flash_kind, flash_message FROM sessions WHERE token = ?1",
            params![token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((Some(kind), Some(message))) = pending else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE sessions SET flash_kind = NULL, flash_message = NULL WHERE token = ?1",
        params![token],
    )?;

    let kind = if kind == FlashKind::Success.as_str() {
        FlashKind::Success
    } else {
        FlashKind::Error
    };
    Ok(Some(Flash { kind, message }))
}

pub fn purge_expired(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
}

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{count, insert_user, pool};

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn anonymous_session_round_trips() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();

        let created = create(&conn, None, 1).unwrap();
        assert!(created.is_new);
        assert_ne!(created.token, created.csrf_token);

        let loaded = load(&conn, &created.token).unwrap().unwrap();
        assert!(!loaded.is_new);
        assert!(loaded.user.is_none());
        assert_eq!(loaded.csrf_token, created.csrf_token);
        assert!(load(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn expired_sessions_are_ignored_and_purged() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let session = create(&conn, None, 1).unwrap();
        conn.execute(
            "UPDATE sessions SET expires_at = datetime('now', '-1 hours') WHERE token = ?1",
            params![session.token],
        )
        .unwrap();

        assert!(load(&conn, &session.token).unwrap().is_none());
        assert_eq!(purge_expired(&conn).unwrap(), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM sessions"), 0);
    }

    #[test]
    fn creating_a_session_sweeps_expired_rows() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let stale = create(&conn, None, 1).unwrap();
        conn.execute(
            "UPDATE sessions SET expires_at = datetime('now', '-1 hours') WHERE token = ?1",
            params![stale.token],
        )
        .unwrap();

        let fresh = create(&conn, None, 1).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM sessions"), 1);
        assert!(load(&conn, &fresh.token).unwrap().is_some());
    }

    #[test]
    fn rotate_replaces_token_and_binds_user() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let alice = insert_user(&conn, "alice");
        let anonymous = create(&conn, None, 1).unwrap();

        let rotated = rotate(&conn, &anonymous.token, alice, 1).unwrap();
        assert_ne!(rotated.token, anonymous.token);
        assert_ne!(rotated.csrf_token, anonymous.csrf_token);
        assert!(load(&conn, &anonymous.token).unwrap().is_none());

        let loaded = load(&conn, &rotated.token).unwrap().unwrap();
        assert_eq!(
            loaded.user,
            Some(SessionUser {
                id: alice,
                username: "alice".into()
            })
        );
    }

    #[test]
    fn flash_is_shown_once() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let session = create(&conn, None, 1).unwrap();

        set_flash(&conn, &session.token, FlashKind::Error, "first").unwrap();
        set_flash(&conn, &session.token, FlashKind::Success, "second").unwrap();

        let flash = take_flash(&conn, &session.token).unwrap().unwrap();
        assert_eq!(flash.message, "second");
        assert!(flash.is_success());
        assert!(take_flash(&conn, &session.token).unwrap().is_none());
    }
}
