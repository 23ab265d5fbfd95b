//! Account management: registration, credential checks and profile field changes.
//!
//! Validation problems come back as `Err(messages)` inside `Ok`, so callers can flash them;
//! storage and hashing failures are the outer error.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

use super::session::SessionUser;
use crate::db::models::User;
use crate::error::AppResult;
use crate::uploads::{IncomingFile, UploadKind, UploadStore};

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MAX_BIO_CHARS: usize = 300;

static USERNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("username pattern is valid"));
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

pub type Validated<T> = Result<T, Vec<String>>;

/// Shape rules shared by registration and username changes.
pub fn username_problem(username: &str) -> Option<&'static str> {
    if username.chars().count() < 3 {
        Some("Username must be at least 3 characters.")
    } else if !USERNAME.is_match(username) {
        Some("Username may only contain letters, numbers and underscores.")
    } else {
        None
    }
}

fn username_taken(conn: &Connection, username: &str, except_user: Option<i64>) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT id FROM users WHERE LOWER(username) = LOWER(?1) AND (?2 IS NULL OR id <> ?2)",
            params![username, except_user],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

pub fn register(
    conn: &Connection,
    username: &str,
    email: &str,
    password: &str,
    bcrypt_cost: u32,
) -> AppResult<Validated<i64>> {
    let username = username.trim();
    let email = email.trim().to_lowercase();
    let mut errors = Vec::new();

    if username.is_empty() {
        errors.push("Username is required.".to_string());
    } else if let Some(problem) = username_problem(username) {
        errors.push(problem.to_string());
    }
    if !EMAIL.is_match(&email) {
        errors.push("Enter a valid email address.".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_CHARS {
        errors.push("Password must be at least 8 characters.".to_string());
    }
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    if username_taken(conn, username, None)? {
        errors.push("Username is already taken.".to_string());
    }
    let email_taken = conn
        .query_row("SELECT id FROM users WHERE email = ?1", params![email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if email_taken {
        errors.push("Email is already in use.".to_string());
    }
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    let hash = bcrypt::hash(password, bcrypt_cost)?;
    conn.execute(
        "INSERT INTO users (username, email, password_hash) VALUES (?1, ?2, ?3)",
        params![username, email, hash],
    )?;
    let user_id = conn.last_insert_rowid();

    tracing::info!(user_id, username, "user registered");
    Ok(Ok(user_id))
}

/// Cost factor encoded in a bcrypt hash (`$2b$12$...`).
fn hash_cost(hash: &str) -> Option<u32> {
    hash.split('$').nth(2)?.parse().ok()
}

/// Checks an email-or-username and password. Hashes made with a different cost than the
/// configured one are upgraded on success.
pub fn authenticate(
    conn: &Connection,
    identifier: &str,
    password: &str,
    bcrypt_cost: u32,
) -> AppResult<Validated<SessionUser>> {
    let identifier = identifier.trim();
    if identifier.is_empty() || password.is_empty() {
        return Ok(Err(vec!["Enter your username or email and password.".to_string()]));
    }

    let found: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT id, username, password_hash FROM users
             WHERE email = LOWER(?1) OR username = ?1
             LIMIT 1",
            params![identifier],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let Some((id, username, hash)) = found else {
        return Ok(Err(vec!["Invalid credentials.".to_string()]));
    };
    if !bcrypt::verify(password, &hash).unwrap_or(false) {
        return Ok(Err(vec!["Invalid credentials.".to_string()]));
    }

    if hash_cost(&hash) != Some(bcrypt_cost) {
        let upgraded = bcrypt::hash(password, bcrypt_cost)?;
        conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![upgraded, id],
        )?;
    }

    Ok(Ok(SessionUser { id, username }))
}

pub fn change_username(conn: &Connection, user_id: i64, new_username: &str) -> AppResult<Validated<String>> {
    let new_username = new_username.trim();
    if let Some(problem) = username_problem(new_username) {
        return Ok(Err(vec![problem.to_string()]));
    }
    if username_taken(conn, new_username, Some(user_id))? {
        return Ok(Err(vec!["Username is already taken.".to_string()]));
    }

    conn.execute(
        "UPDATE users SET username = ?1 WHERE id = ?2",
        params![new_username, user_id],
    )?;
    Ok(Ok(new_username.to_string()))
}

/// Empty bios are stored as NULL.
pub fn change_bio(conn: &Connection, user_id: i64, bio: &str) -> AppResult<Validated<()>> {
    let bio = bio.trim();
    if bio.chars().count() > MAX_BIO_CHARS {
        return Ok(Err(vec!["Bio must be at most 300 characters.".to_string()]));
    }

    let value = (!bio.is_empty()).then_some(bio);
    conn.execute("UPDATE users SET bio = ?1 WHERE id = ?2", params![value, user_id])?;
    Ok(Ok(()))
}

pub fn change_password(
    conn: &Connection,
    user_id: i64,
    current: &str,
    new: &str,
    confirm: &str,
    bcrypt_cost: u32,
) -> AppResult<Validated<()>> {
    if current.is_empty() || new.is_empty() || confirm.is_empty() {
        return Ok(Err(vec!["Fill in all password fields.".to_string()]));
    }

    let hash: String = conn.query_row(
        "SELECT password_hash FROM users WHERE id = ?1",
        params![user_id],
        |r| r.get(0),
    )?;
    if !bcrypt::verify(current, &hash).unwrap_or(false) {
        return Ok(Err(vec!["Current password is incorrect.".to_string()]));
    }
    if new.chars().count() < MIN_PASSWORD_CHARS {
        return Ok(Err(vec!["New password must be at least 8 characters.".to_string()]));
    }
    if new != confirm {
        return Ok(Err(vec!["Password confirmation does not match.".to_string()]));
    }

    let hash = bcrypt::hash(new, bcrypt_cost)?;
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash, user_id],
    )?;
    tracing::info!(user_id, "password changed");
    Ok(Ok(()))
}

pub fn find_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", User::COLUMNS),
        params![user_id],
        User::from_row,
    )
    .optional()
}

#[derive(Debug, Clone)]
pub enum AvatarChange {
    Replace(IncomingFile),
    Remove,
}

/// Stores a new avatar or removes the current one. The previous file is deleted from disk
/// either way. The new file is written before the row is updated and is left behind if the
/// update fails.
pub fn change_avatar(
    conn: &Connection,
    uploads: &UploadStore,
    user_id: i64,
    change: AvatarChange,
) -> AppResult<Validated<()>> {
    let previous: Option<String> = conn.query_row(
        "SELECT avatar_path FROM users WHERE id = ?1",
        params![user_id],
        |r| r.get(0),
    )?;

    let stored = match change {
        AvatarChange::Replace(file) => {
            match uploads.save(UploadKind::Avatar, &file, &format!("avatar-{}", user_id)) {
                Ok(path) => Some(path),
                Err(e) => return Ok(Err(vec![e.to_string()])),
            }
        }
        AvatarChange::Remove => None,
    };

    if let Some(old) = &previous {
        uploads.delete(UploadKind::Avatar, old);
    }
    conn.execute(
        "UPDATE users SET avatar_path = ?1 WHERE id = ?2",
        params![stored, user_id],
    )?;
    Ok(Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::pool;

    const COST: u32 = 4;

    #[test]
    fn username_rules() {
        assert!(username_problem("ab").is_some());
        assert!(username_problem("bad name").is_some());
        assert!(username_problem("good_name_1").is_none());
    }

    #[test]
    fn register_collects_every_problem() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();

        let errors = register(&conn, "", "nope", "short", COST).unwrap().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn register_then_login_with_email_or_username() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();

        let id = register(&conn, "Alice", " Alice@Example.com ", "password1", COST)
            .unwrap()
            .unwrap();

        let by_email = authenticate(&conn, "ALICE@example.com", "password1", COST)
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, id);
        let by_name = authenticate(&conn, "Alice", "password1", COST).unwrap().unwrap();
        assert_eq!(by_name.username, "Alice");

        let wrong = authenticate(&conn, "Alice", "password2", COST).unwrap().unwrap_err();
        assert_eq!(wrong, vec!["Invalid credentials."]);
    }

    #[test]
    fn register_rejects_duplicates() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        register(&conn, "alice", "alice@example.com", "password1", COST)
            .unwrap()
            .unwrap();

        let errors = register(&conn, "ALICE", "alice@example.com", "password1", COST)
            .unwrap()
            .unwrap_err();
        assert_eq!(
            errors,
            vec!["Username is already taken.", "Email is already in use."]
        );
    }

    #[test]
    fn login_upgrades_hash_cost() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        register(&conn, "alice", "alice@example.com", "password1", COST)
            .unwrap()
            .unwrap();

        authenticate(&conn, "alice", "password1", 5).unwrap().unwrap();
        let hash: String = conn
            .query_row("SELECT password_hash FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(hash_cost(&hash), Some(5));
    }

    #[test]
    fn profile_changes() {
        let (pool, _tmp) = pool();
        let conn = pool.get().unwrap();
        let alice = register(&conn, "alice", "alice@example.com", "password1", COST)
            .unwrap()
            .unwrap();
        register(&conn, "bob", "bob@example.com", "password1", COST)
            .unwrap()
            .unwrap();

        assert!(change_username(&conn, alice, "Bob").unwrap().is_err());
        assert_eq!(change_username(&conn, alice, " alice2 ").unwrap().unwrap(), "alice2");
        // Keeping your own name is allowed.
        assert!(change_username(&conn, alice, "alice2").unwrap().is_ok());

        assert!(change_bio(&conn, alice, &"x".repeat(301)).unwrap().is_err());
        change_bio(&conn, alice, "   ").unwrap().unwrap();
        let bio: Option<String> = conn
            .query_row("SELECT bio FROM users WHERE id = ?1", params![alice], |r| r.get(0))
            .unwrap();
        assert!(bio.is_none());

        let wrong = change_password(&conn, alice, "nope", "newpassword", "newpassword", COST)
            .unwrap()
            .unwrap_err();
        assert_eq!(wrong, vec!["Current password is incorrect."]);
        assert!(change_password(&conn, alice, "password1", "newpassword", "different", COST)
            .unwrap()
            .is_err());
        change_password(&conn, alice, "password1", "newpassword", "newpassword", COST)
            .unwrap()
            .unwrap();
        assert!(authenticate(&conn, "alice2", "newpassword", COST).unwrap().is_ok());
    }

    #[test]
    fn avatar_replace_and_remove() {
        let (pool, tmp) = pool();
        let conn = pool.get().unwrap();
        let store = UploadStore::new(tmp.path().join("uploads"));
        let alice = register(&conn, "alice", "alice@example.com", "password1", COST)
            .unwrap()
            .unwrap();
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let upload = |name: &str| IncomingFile {
            file_name: name.to_string(),
            bytes: png.clone(),
        };

        let rejected = change_avatar(&conn, &store, alice, AvatarChange::Replace(upload("me.gif")))
            .unwrap()
            .unwrap_err();
        assert_eq!(rejected, vec!["Invalid image format. Use jpg, jpeg, png or webp."]);

        change_avatar(&conn, &store, alice, AvatarChange::Replace(upload("me.png")))
            .unwrap()
            .unwrap();
        let first = find_user(&conn, alice).unwrap().unwrap().avatar_path.unwrap();
        assert!(first.starts_with("avatars/avatar-"));
        assert!(store.root().join(&first).exists());

        change_avatar(&conn, &store, alice, AvatarChange::Replace(upload("me2.png")))
            .unwrap()
            .unwrap();
        let second = find_user(&conn, alice).unwrap().unwrap().avatar_path.unwrap();
        assert_ne!(first, second);
        assert!(!store.root().join(&first).exists());

        change_avatar(&conn, &store, alice, AvatarChange::Remove).unwrap().unwrap();
        assert!(find_user(&conn, alice).unwrap().unwrap().avatar_path.is_none());
        assert!(!store.root().join(&second).exists());
    }
}
