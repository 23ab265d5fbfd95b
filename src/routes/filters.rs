//! Template filters shared by the page templates.

use chrono::{NaiveDateTime, Utc};
use std::fmt::Display;

fn parse_db_time(db_time: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(db_time, "%Y-%m-%d %H:%M:%S").ok()
}

pub fn format_relative_time(dt: &NaiveDateTime) -> String {
    let now = Utc::now().naive_utc();
    let diff = now.signed_duration_since(*dt);

    let seconds = diff.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = diff.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    let days = diff.num_days();
    if days < 7 {
        return format!("{}d ago", days);
    }

    dt.format("%b %-d, %Y").to_string()
}

/// `{{ comment.created_at|relative }}`; unparseable values are shown as stored.
pub fn relative<T: Display>(db_time: T) -> askama::Result<String> {
    let raw = db_time.to_string();
    Ok(parse_db_time(&raw)
        .map(|dt| format_relative_time(&dt))
        .unwrap_or(raw))
}

/// `{{ post.created_at|date }}` as `Jan 15, 2025 12:00`.
pub fn date<T: Display>(db_time: T) -> askama::Result<String> {
    let raw = db_time.to_string();
    Ok(parse_db_time(&raw)
        .map(|dt| dt.format("%b %-d, %Y %H:%M").to_string())
        .unwrap_or(raw))
}

/// First letter of a username, used when a user has no avatar.
pub fn initial<T: Display>(username: T) -> askama::Result<String> {
    Ok(username
        .to_string()
        .chars()
        .next()
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string()))
}
