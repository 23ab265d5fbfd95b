use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_path: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

impl User {
    pub const COLUMNS: &'static str =
        "id, username, email, password_hash, avatar_path, bio, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            avatar_path: row.get(4)?,
            bio: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub cover_image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Post {
    pub const COLUMNS: &'static str =
        "id, user_id, title, slug, content, cover_image, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            slug: row.get(3)?,
            content: row.get(4)?,
            cover_image: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub created_at: String,
}

impl Comment {
    pub const COLUMNS: &'static str = "id, post_id, user_id, parent_id, content, created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Comment {
            id: row.get(0)?,
            post_id: row.get(1)?,
            user_id: row.get(2)?,
            parent_id: row.get(3)?,
            content: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
