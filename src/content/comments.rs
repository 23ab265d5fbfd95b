//! Comment engine: create, edit and delete comments on posts, fanning out reply and mention
//! notifications, plus the threaded read side used by the post page.
//!
//! Every mutation resolves to a [`CommentOutcome`]. Validation and permission failures are not
//! errors in the `Result` sense; they carry a user-facing reason and the page the user should be
//! sent back to. Only storage failures surface as `Err`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::mentions::parse_mentions;
use super::notifications::{self, NewNotification, NotificationKind};
use super::votes::{self, ItemType};
use crate::db::models::Comment;

pub const MAX_COMMENT_CHARS: usize = 1000;

/// The `?action=` of a comment form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentAction {
    Store,
    Update,
    Delete,
}

impl CommentAction {
    /// Exact lowercase match; anything else is not a comment action.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "store" => Some(Self::Store),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Raw form fields. Ids stay strings until the engine validates them so that malformed and
/// missing ids can be reported separately from unknown ones.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CommentForm {
    pub post_id: Option<String>,
    pub parent_id: Option<String>,
    pub comment_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    TopLevel,
    Reply(i64),
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentCommand {
    Create {
        post_id: Option<i64>,
        parent: ParentRef,
        content: String,
    },
    Update {
        comment_id: Option<i64>,
        content: String,
    },
    Delete {
        comment_id: Option<i64>,
    },
}

fn parse_id(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse().ok())
}

impl CommentCommand {
    /// Builds the command for `action`. For edits and deletes a valid `?id=` in the query string
    /// takes precedence over the form's `comment_id`.
    pub fn from_form(action: CommentAction, form: CommentForm, query_id: Option<&str>) -> Self {
        let content = form.content.unwrap_or_default();
        let comment_id = parse_id(query_id).or_else(|| parse_id(form.comment_id.as_deref()));

        match action {
            CommentAction::Store => {
                let parent = match form.parent_id.as_deref() {
                    None | Some("") => ParentRef::TopLevel,
                    Some(raw) => parse_id(Some(raw))
                        .map(ParentRef::Reply)
                        .unwrap_or(ParentRef::Malformed),
                };
                CommentCommand::Create {
                    post_id: parse_id(form.post_id.as_deref()),
                    parent,
                    content,
                }
            }
            CommentAction::Update => CommentCommand::Update { comment_id, content },
            CommentAction::Delete => CommentCommand::Delete { comment_id },
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            CommentCommand::Create { .. } => "Comment published.",
            CommentCommand::Update { .. } => "Comment updated.",
            CommentCommand::Delete { .. } => "Comment deleted.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    None,
    Comments,
    Comment(i64),
}

/// Where the user lands after a comment mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectTarget {
    pub post_id: Option<i64>,
    pub anchor: Anchor,
}

impl RedirectTarget {
    pub fn home() -> Self {
        Self {
            post_id: None,
            anchor: Anchor::None,
        }
    }

    pub fn post(post_id: i64, anchor: Anchor) -> Self {
        Self {
            post_id: Some(post_id),
            anchor,
        }
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.post_id {
            None => f.write_str("/")?,
            Some(id) => write!(f, "/posts/{}", id)?,
        }
        match self.anchor {
            Anchor::None => Ok(()),
            Anchor::Comments => f.write_str("#comments"),
            Anchor::Comment(id) => write!(f, "#comment-{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommentRejection {
    #[error("Invalid post.")]
    InvalidPost,
    #[error("Post not found.")]
    PostNotFound,
    #[error("Invalid parent comment.")]
    InvalidParent,
    #[error("You cannot reply to your own comment.")]
    SelfReply,
    #[error("Comment cannot be empty.")]
    EmptyContent,
    #[error("Comment must be at most 1000 characters.")]
    ContentTooLong,
    #[error("Invalid comment.")]
    InvalidComment,
    #[error("Comment not found.")]
    CommentNotFound,
    #[error("You cannot edit this comment.")]
    EditForbidden,
    #[error("You cannot delete this comment.")]
    DeleteForbidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentSuccess {
    pub comment_id: i64,
    pub target: RedirectTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentFailure {
    pub reason: CommentRejection,
    pub target: RedirectTarget,
}

pub type CommentOutcome = Result<CommentSuccess, CommentFailure>;

fn reject(reason: CommentRejection, target: RedirectTarget) -> rusqlite::Result<CommentOutcome> {
    Ok(Err(CommentFailure { reason, target }))
}

fn validate_content(raw: &str) -> Result<&str, CommentRejection> {
    let content = raw.trim();
    if content.is_empty() {
        Err(CommentRejection::EmptyContent)
    } else if content.chars().count() > MAX_COMMENT_CHARS {
        Err(CommentRejection::ContentTooLong)
    } else {
        Ok(content)
    }
}

pub fn execute(conn: &Connection, user_id: i64, command: &CommentCommand) -> rusqlite::Result<CommentOutcome> {
    match command {
        CommentCommand::Create {
            post_id,
            parent,
            content,
        } => create(conn, user_id, *post_id, *parent, content),
        CommentCommand::Update {
            comment_id,
            content,
        } => update(conn, user_id, *comment_id, content),
        CommentCommand::Delete { comment_id } => delete(conn, user_id, *comment_id),
    }
}

pub fn create(
    conn: &Connection,
    author_id: i64,
    post_id: Option<i64>,
    parent: ParentRef,
    raw_content: &str,
) -> rusqlite::Result<CommentOutcome> {
    let Some(post_id) = post_id else {
        return reject(CommentRejection::InvalidPost, RedirectTarget::home());
    };
    let section = RedirectTarget::post(post_id, Anchor::Comments);

    let parent_id = match parent {
        ParentRef::TopLevel => None,
        ParentRef::Reply(id) => Some(id),
        ParentRef::Malformed => return reject(CommentRejection::InvalidParent, section),
    };

    let content = match validate_content(raw_content) {
        Ok(content) => content,
        Err(reason) => return reject(reason, section),
    };

    let tx = conn.unchecked_transaction()?;

    let post_exists = tx
        .query_row("SELECT 1 FROM posts WHERE id = ?1", params![post_id], |_| Ok(()))
        .optional()?
        .is_some();
    if !post_exists {
        return reject(CommentRejection::PostNotFound, RedirectTarget::home());
    }

    let parent_author = match parent_id {
        None => None,
        Some(parent_id) => {
            let author: Option<i64> = tx
                .query_row(
                    "SELECT user_id FROM comments WHERE id = ?1 AND post_id = ?2",
                    params![parent_id, post_id],
                    |r| r.get(0),
                )
                .optional()?;
            match author {
                None => return reject(CommentRejection::InvalidParent, section),
                Some(author) if author == author_id => {
                    return reject(
                        CommentRejection::SelfReply,
                        RedirectTarget::post(post_id, Anchor::Comment(parent_id)),
                    )
                }
                Some(author) => Some(author),
            }
        }
    };

    tx.execute(
        "INSERT INTO comments (post_id, user_id, parent_id, content) VALUES (?1, ?2, ?3, ?4)",
        params![post_id, author_id, parent_id, content],
    )?;
    let comment_id = tx.last_insert_rowid();

    let notify = |recipient_id: i64, kind: NotificationKind| {
        notifications::emit(
            &tx,
            &NewNotification {
                recipient_id,
                source_id: author_id,
                kind,
                post_id: Some(post_id),
                comment_id: Some(comment_id),
            },
        )
    };

    if let Some(parent_author) = parent_author {
        notify(parent_author, NotificationKind::Reply)?;
    }

    let mut mentioned = HashSet::new();
    for username in parse_mentions(content) {
        let Some(user_id) = notifications::find_user_id_by_username(&tx, &username)? else {
            continue;
        };
        if user_id != author_id && mentioned.insert(user_id) {
            notify(user_id, NotificationKind::Mention)?;
        }
    }

    tx.commit()?;

    tracing::info!(comment_id, post_id, author_id, mentions = mentioned.len(), "comment created");
    Ok(Ok(CommentSuccess {
        comment_id,
        target: section,
    }))
}

/// Owner and post of an existing comment.
fn find_comment(conn: &Connection, comment_id: i64) -> rusqlite::Result<Option<(i64, i64)>> {
    conn.query_row(
        "SELECT user_id, post_id FROM comments WHERE id = ?1",
        params![comment_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
}

pub fn update(
    conn: &Connection,
    editor_id: i64,
    comment_id: Option<i64>,
    raw_content: &str,
) -> rusqlite::Result<CommentOutcome> {
    let Some(comment_id) = comment_id else {
        return reject(CommentRejection::InvalidComment, RedirectTarget::home());
    };
    let Some((owner_id, post_id)) = find_comment(conn, comment_id)? else {
        return reject(CommentRejection::CommentNotFound, RedirectTarget::home());
    };

    let target = RedirectTarget::post(post_id, Anchor::Comment(comment_id));
    if owner_id != editor_id {
        return reject(CommentRejection::EditForbidden, target);
    }

    let content = match validate_content(raw_content) {
        Ok(content) => content,
        Err(reason) => return reject(reason, target),
    };

    conn.execute(
        "UPDATE comments SET content = ?1 WHERE id = ?2 AND user_id = ?3",
        params![content, comment_id, editor_id],
    )?;

    tracing::info!(comment_id, editor_id, "comment updated");
    Ok(Ok(CommentSuccess { comment_id, target }))
}

/// Deletes a comment owned by `requester_id` together with the votes cast on it. Replies are left
/// in place with their parent id pointing at the removed row.
pub fn delete(conn: &Connection, requester_id: i64, comment_id: Option<i64>) -> rusqlite::Result<CommentOutcome> {
    let Some(comment_id) = comment_id else {
        return reject(CommentRejection::InvalidComment, RedirectTarget::home());
    };
    let Some((owner_id, post_id)) = find_comment(conn, comment_id)? else {
        return reject(CommentRejection::CommentNotFound, RedirectTarget::home());
    };

    if owner_id != requester_id {
        return reject(
            CommentRejection::DeleteForbidden,
            RedirectTarget::post(post_id, Anchor::Comment(comment_id)),
        );
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM comments WHERE id = ?1 AND user_id = ?2",
        params![comment_id, requester_id],
    )?;
    votes::clear_item(&tx, ItemType::Comment, comment_id)?;
    tx.commit()?;

    tracing::info!(comment_id, requester_id, "comment deleted");
    Ok(Ok(CommentSuccess {
        comment_id,
        target: RedirectTarget::post(post_id, Anchor::Comments),
    }))
}

/// A comment as rendered on the post page.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub author: String,
    pub author_avatar: Option<String>,
    pub content: String,
    pub created_at: String,
    pub score: i64,
    pub user_vote: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentThread {
    pub comment: CommentView,
    pub replies: Vec<CommentView>,
}

/// All comments of a post grouped one level deep, oldest first. Replies are attached to the
/// top-level comment they descend from; a reply whose parent no longer exists is shown as a
/// top-level comment.
pub fn thread_for_post(
    conn: &Connection,
    post_id: i64,
    viewer_id: Option<i64>,
) -> rusqlite::Result<Vec<CommentThread>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.user_id, c.parent_id, u.username, u.avatar_path, c.content, c.created_at,
                COALESCE((SELECT SUM(v.vote) FROM votes v
                          WHERE v.item_type = 'comment' AND v.item_id = c.id), 0),
                COALESCE((SELECT v.vote FROM votes v
                          WHERE v.item_type = 'comment' AND v.item_id = c.id AND v.user_id = ?2), 0)
         FROM comments c
         INNER JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC, c.id ASC",
    )?;

    let views = stmt
        .query_map(params![post_id, viewer_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                user_id: row.get(1)?,
                parent_id: row.get(2)?,
                author: row.get(3)?,
                author_avatar: row.get(4)?,
                content: row.get(5)?,
                created_at: row.get(6)?,
                score: row.get(7)?,
                user_vote: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(build_threads(views))
}

fn build_threads(views: Vec<CommentView>) -> Vec<CommentThread> {
    let parents: HashMap<i64, Option<i64>> = views.iter().map(|v| (v.id, v.parent_id)).collect();

    let root_of = |mut id: i64| {
        let mut seen = HashSet::new();
        while let Some(Some(parent)) = parents.get(&id) {
            if !parents.contains_key(parent) || !seen.insert(id) {
                break;
            }
            id = *parent;
        }
        id
    };

    let mut threads: Vec<CommentThread> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut pending: Vec<(i64, CommentView)> = Vec::new();

    for view in views {
        let root = root_of(view.id);
        if root == view.id {
            index.insert(view.id, threads.len());
            threads.push(CommentThread {
                comment: view,
                replies: Vec::new(),
            });
        } else {
            pending.push((root, view));
        }
    }

    for (root, view) in pending {
        match index.get(&root) {
            Some(&i) => threads[i].replies.push(view),
            None => threads.push(CommentThread {
                comment: view,
                replies: Vec::new(),
            }),
        }
    }

    threads
}

/// Loads a single comment row.
pub fn find(conn: &Connection, comment_id: i64) -> rusqlite::Result<Option<Comment>> {
    conn.query_row(
        &format!("SELECT {} FROM comments WHERE id = ?1", Comment::COLUMNS),
        params![comment_id],
        Comment::from_row,
    )
    .optional()
}
