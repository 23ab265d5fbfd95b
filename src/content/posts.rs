//! Post storage: create, edit and delete posts owned by a user, and the paginated listings.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::slug::{slugify, unique_slug};
use super::votes::{self, ItemType};
use crate::db::models::Post;
use crate::uploads::{IncomingFile, UploadKind, UploadStore};

pub const EXCERPT_CHARS: usize = 180;

/// Title and content as submitted, trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
}

impl PostDraft {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            content: content.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.title.is_empty() {
            errors.push("Title is required.".to_string());
        }
        if self.content.is_empty() {
            errors.push("Content is required.".to_string());
        }
        errors
    }
}

/// What an edit does to the existing cover image.
#[derive(Debug, Clone)]
pub enum CoverChange {
    Keep,
    Replace(IncomingFile),
    Remove,
}

/// Result of a create or edit: the post id, or the messages to show next to the form.
pub type PostOutcome = Result<i64, Vec<String>>;

pub fn create(
    conn: &Connection,
    uploads: &UploadStore,
    user_id: i64,
    draft: &PostDraft,
    cover: Option<IncomingFile>,
) -> rusqlite::Result<PostOutcome> {
    let errors = draft.validate();
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    let slug = unique_slug(conn, &draft.title, None)?;

    let cover_path = match cover {
        None => None,
        Some(file) => match uploads.save(UploadKind::Cover, &file, &slug) {
            Ok(path) => Some(path),
            Err(e) => return Ok(Err(vec![e.to_string()])),
        },
    };

    conn.execute(
        "INSERT INTO posts (user_id, title, slug, content, cover_image) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, draft.title, slug, draft.content, cover_path],
    )?;
    let post_id = conn.last_insert_rowid();

    tracing::info!(post_id, user_id, slug = %slug, "post created");
    Ok(Ok(post_id))
}

/// Applies an edit to `post`, which the caller has already checked belongs to the editor.
/// A replaced or removed cover file is deleted from disk before the row is updated.
pub fn update(
    conn: &Connection,
    uploads: &UploadStore,
    post: &Post,
    draft: &PostDraft,
    cover: CoverChange,
) -> rusqlite::Result<PostOutcome> {
    let errors = draft.validate();
    if !errors.is_empty() {
        return Ok(Err(errors));
    }

    let cover_path = match cover {
        CoverChange::Keep => post.cover_image.clone(),
        CoverChange::Replace(file) => match uploads.save(UploadKind::Cover, &file, &slugify(&draft.title)) {
            Ok(path) => {
                if let Some(old) = &post.cover_image {
                    uploads.delete(UploadKind::Cover, old);
                }
                Some(path)
            }
            Err(e) => return Ok(Err(vec![e.to_string()])),
        },
        CoverChange::Remove => {
            if let Some(old) = &post.cover_image {
                uploads.delete(UploadKind::Cover, old);
            }
            None
        }
    };

    let slug = unique_slug(conn, &draft.title, Some(post.id))?;
    conn.execute(
        "UPDATE posts
         SET title = ?1, slug = ?2, content = ?3, cover_image = ?4, updated_at = datetime('now')
         WHERE id = ?5 AND user_id = ?6",
        params![draft.title, slug, draft.content, cover_path, post.id, post.user_id],
    )?;

    tracing::info!(post_id = post.id, slug = %slug, "post updated");
    Ok(Ok(post.id))
}

/// Deletes a post owned by `user_id` with its votes and notifications. Comments go with it
/// through the foreign key. Returns whether a post was removed.
pub fn delete(conn: &Connection, uploads: &UploadStore, post_id: i64, user_id: i64) -> rusqlite::Result<bool> {
    let Some(post) = find_owned(conn, post_id, user_id)? else {
        return Ok(false);
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM votes WHERE item_type = 'comment'
         AND item_id IN (SELECT id FROM comments WHERE post_id = ?1)",
        params![post_id],
    )?;
    votes::clear_item(&tx, ItemType::Post, post_id)?;
    tx.execute("DELETE FROM notifications WHERE post_id = ?1", params![post_id])?;
    let removed = tx.execute(
        "DELETE FROM posts WHERE id = ?1 AND user_id = ?2",
        params![post_id, user_id],
    )?;
    tx.commit()?;

    if let Some(cover) = &post.cover_image {
        uploads.delete(UploadKind::Cover, cover);
    }

    tracing::info!(post_id, user_id, "post deleted");
    Ok(removed > 0)
}

pub fn find(conn: &Connection, post_id: i64) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", Post::COLUMNS),
        params![post_id],
        Post::from_row,
    )
    .optional()
}

pub fn find_owned(conn: &Connection, post_id: i64, user_id: i64) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1 AND user_id = ?2", Post::COLUMNS),
        params![post_id, user_id],
        Post::from_row,
    )
    .optional()
}

/// The post page header: post, author and the viewer's vote.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: Post,
    pub author: String,
    pub author_avatar: Option<String>,
    pub score: i64,
    pub user_vote: i64,
}

pub fn detail(conn: &Connection, post_id: i64, viewer_id: Option<i64>) -> rusqlite::Result<Option<PostDetail>> {
    let Some(post) = find(conn, post_id)? else {
        return Ok(None);
    };

    let (author, author_avatar) = conn.query_row(
        "SELECT username, avatar_path FROM users WHERE id = ?1",
        params![post.user_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    let score = votes::score(conn, ItemType::Post, post_id)?;
    let user_vote = match viewer_id {
        Some(viewer) => votes::user_vote(conn, ItemType::Post, post_id, viewer)?,
        None => 0,
    };

    Ok(Some(PostDetail {
        post,
        author,
        author_avatar,
        score,
        user_vote,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub excerpt: String,
    pub cover_image: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author_id: i64,
    pub author: String,
    pub author_avatar: Option<String>,
    pub score: i64,
}

/// A 1-based page clamped to the available range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current: u32,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(requested: u32, total_items: u64, per_page: u32) -> Self {
        let per_page = u64::from(per_page.max(1));
        let total_pages = total_items.div_ceil(per_page).max(1) as u32;
        Self {
            current: requested.clamp(1, total_pages),
            total_pages,
        }
    }

    pub fn offset(&self, per_page: u32) -> u32 {
        (self.current - 1) * per_page
    }

    pub fn previous(&self) -> Option<u32> {
        (self.current > 1).then(|| self.current - 1)
    }

    pub fn next(&self) -> Option<u32> {
        (self.current < self.total_pages).then(|| self.current + 1)
    }

    /// Numbered links: first, last and two pages either side of the current one, with gaps
    /// marking skipped runs. Empty when there is a single page.
    pub fn links(&self) -> Vec<PageLink> {
        const RANGE: u32 = 2;
        if self.total_pages <= 1 {
            return Vec::new();
        }

        let mut links = Vec::new();
        for i in 1..=self.total_pages {
            let near = i + RANGE >= self.current && i <= self.current + RANGE;
            if i == 1 || i == self.total_pages || near {
                links.push(if i == self.current {
                    PageLink::Current(i)
                } else {
                    PageLink::Page(i)
                });
            } else if (i + RANGE + 1 == self.current && i > 1)
                || (i == self.current + RANGE + 1 && i < self.total_pages)
            {
                links.push(PageLink::Gap);
            }
        }
        links
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page(u32),
    Current(u32),
    Gap,
}

/// First `max_chars` characters of `content`, with `...` appended when it was cut.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    let clean = content.trim();
    match clean.char_indices().nth(max_chars) {
        None => clean.to_string(),
        Some((cut, _)) => format!("{}...", clean[..cut].trim_end()),
    }
}

/// Newest-first listing, optionally restricted to one author.
pub fn list_page(
    conn: &Connection,
    author_id: Option<i64>,
    requested_page: u32,
    per_page: u32,
) -> rusqlite::Result<(Vec<PostSummary>, Pagination)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE ?1 IS NULL OR user_id = ?1",
        params![author_id],
        |r| r.get(0),
    )?;
    let pagination = Pagination::new(requested_page, total.max(0) as u64, per_page);

    let mut stmt = conn.prepare(
        "SELECT p.id, p.title, p.content, p.cover_image, p.created_at, p.updated_at,
                u.id, u.username, u.avatar_path,
                COALESCE((SELECT SUM(v.vote) FROM votes v
                          WHERE v.item_type = 'post' AND v.item_id = p.id), 0)
         FROM posts p
         INNER JOIN users u ON u.id = p.user_id
         WHERE ?1 IS NULL OR p.user_id = ?1
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?2 OFFSET ?3",
    )?;

    let posts = stmt
        .query_map(
            params![author_id, per_page, pagination.offset(per_page)],
            |row| {
                let content: String = row.get(2)?;
                Ok(PostSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    excerpt: excerpt(&content, EXCERPT_CHARS),
                    cover_image: row.get(3)?,
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                    author_id: row.get(6)?,
                    author: row.get(7)?,
                    author_avatar: row.get(8)?,
                    score: row.get(9)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((posts, pagination))
}
