//! Notification rows: the emitter used by comments and votes, and the read side behind the
//! notification bell.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Reply,
    Mention,
    Upvote,
    Comment,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Reply => "reply",
            NotificationKind::Mention => "mention",
            NotificationKind::Upvote => "upvote",
            NotificationKind::Comment => "comment",
        }
    }

    /// Human readable line shown in the notification dropdown.
    pub fn message(&self, from_username: &str) -> String {
        match self {
            NotificationKind::Reply => format!("{} replied to your comment.", from_username),
            NotificationKind::Mention => format!("{} mentioned you.", from_username),
            NotificationKind::Upvote => format!("{} liked your post!", from_username),
            NotificationKind::Comment => format!("{} commented on your post.", from_username),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reply" => Ok(NotificationKind::Reply),
            "mention" => Ok(NotificationKind::Mention),
            "upvote" => Ok(NotificationKind::Upvote),
            "comment" => Ok(NotificationKind::Comment),
            other => Err(format!("unknown notification type: {}", other)),
        }
    }
}

impl ToSql for NotificationKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NotificationKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A notification about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub source_id: i64,
    pub kind: NotificationKind,
    pub post_id: Option<i64>,
    pub comment_id: Option<i64>,
}

/// Inserts one unread notification. Returns `false` without touching the table when the
/// recipient is the user who triggered it.
pub fn emit(conn: &Connection, notification: &NewNotification) -> rusqlite::Result<bool> {
    if notification.recipient_id == notification.source_id {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO notifications (user_id, from_user_id, type, comment_id, post_id, is_read)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            notification.recipient_id,
            notification.source_id,
            notification.kind,
            notification.comment_id,
            notification.post_id,
        ],
    )?;

    tracing::debug!(
        recipient = notification.recipient_id,
        source = notification.source_id,
        kind = %notification.kind,
        "notification emitted"
    );
    Ok(true)
}

/// Resolves a lowercased username to a user id.
pub fn find_user_id_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM users WHERE LOWER(username) = ?1 LIMIT 1",
        params![username],
        |row| row.get(0),
    )
    .optional()
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotificationView {
    pub id: i64,
    pub message: String,
    pub is_read: bool,
    pub post_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NotificationFeed {
    pub unread_count: i64,
    pub notifications: Vec<NotificationView>,
}

/// Newest-first notifications for `user_id`, capped at `limit`, plus the total unread count.
pub fn fetch(conn: &Connection, user_id: i64, limit: u32) -> rusqlite::Result<NotificationFeed> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.type, n.is_read, n.created_at, n.post_id, u.username
         FROM notifications n
         INNER JOIN users u ON u.id = n.from_user_id
         WHERE n.user_id = ?1
         ORDER BY n.created_at DESC, n.id DESC
         LIMIT ?2",
    )?;

    let notifications = stmt
        .query_map(params![user_id, limit], |row| {
            let kind: NotificationKind = row.get(1)?;
            let from_user: String = row.get(5)?;
            Ok(NotificationView {
                id: row.get(0)?,
                message: kind.message(&from_user),
                is_read: row.get(2)?,
                post_id: row.get(4)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NotificationFeed {
        unread_count: unread_count(conn, user_id)?,
        notifications,
    })
}

pub fn unread_count(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
        |row| row.get(0),
    )
}

/// Marks every unread notification of `user_id` as read. Returns how many rows flipped.
pub fn mark_all_read(conn: &Connection, user_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
    )
}
