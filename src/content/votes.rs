//! Up/down votes on posts and comments.
//!
//! Each (item, user) pair is in one of three states: no vote, up or down. Casting the direction
//! already held removes the vote; casting the other direction switches it. The lookup and the
//! write happen inside one `IMMEDIATE` transaction so concurrent requests from the same user
//! cannot produce duplicate rows, and the table's primary key backs that up.

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use std::str::FromStr;

use super::notifications::{self, NewNotification, NotificationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Post,
    Comment,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Post => "post",
            ItemType::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(ItemType::Post),
            "comment" => Ok(ItemType::Comment),
            _ => Err(()),
        }
    }
}

impl ToSql for ItemType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn value(self) -> i64 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(Direction::Up),
            -1 => Some(Direction::Down),
            _ => None,
        }
    }
}

/// What a cast does to the stored row, given the vote currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    Insert(Direction),
    Remove,
    Switch(Direction),
}

impl VoteTransition {
    pub fn for_cast(existing: Option<Direction>, cast: Direction) -> Self {
        match existing {
            None => VoteTransition::Insert(cast),
            Some(held) if held == cast => VoteTransition::Remove,
            Some(_) => VoteTransition::Switch(cast),
        }
    }

    /// The caller's vote after the transition; 0 means no vote.
    pub fn resulting_vote(&self) -> i64 {
        match self {
            VoteTransition::Insert(d) | VoteTransition::Switch(d) => d.value(),
            VoteTransition::Remove => 0,
        }
    }

    /// Only a vote that lands on "up" notifies the item's owner.
    pub fn notifies_owner(&self) -> bool {
        matches!(
            self,
            VoteTransition::Insert(Direction::Up) | VoteTransition::Switch(Direction::Up)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    pub score: i64,
    #[serde(rename = "userVote")]
    pub user_vote: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum VoteError {
    #[error("{0} {1} does not exist")]
    ItemNotFound(ItemType, i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Owner of the voted item and the post it belongs to.
struct ItemOwner {
    user_id: i64,
    post_id: i64,
}

fn find_owner(conn: &Connection, item: ItemType, item_id: i64) -> rusqlite::Result<Option<ItemOwner>> {
    match item {
        ItemType::Post => conn
            .query_row(
                "SELECT user_id, id FROM posts WHERE id = ?1",
                params![item_id],
                |r| {
                    Ok(ItemOwner {
                        user_id: r.get(0)?,
                        post_id: r.get(1)?,
                    })
                },
            )
            .optional(),
        ItemType::Comment => conn
            .query_row(
                "SELECT user_id, post_id FROM comments WHERE id = ?1",
                params![item_id],
                |r| {
                    Ok(ItemOwner {
                        user_id: r.get(0)?,
                        post_id: r.get(1)?,
                    })
                },
            )
            .optional(),
    }
}

/// Applies one vote from `user_id` and returns the item's new score and the caller's vote.
pub fn cast_vote(
    conn: &Connection,
    item: ItemType,
    item_id: i64,
    user_id: i64,
    direction: Direction,
) -> Result<VoteTally, VoteError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let owner = find_owner(&tx, item, item_id)?.ok_or(VoteError::ItemNotFound(item, item_id))?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT vote FROM votes WHERE item_type = ?1 AND item_id = ?2 AND user_id = ?3",
            params![item, item_id, user_id],
            |r| r.get(0),
        )
        .optional()?;

    let transition = VoteTransition::for_cast(existing.and_then(Direction::from_value), direction);

    match transition {
        VoteTransition::Insert(d) => {
            tx.execute(
                "INSERT INTO votes (item_type, item_id, user_id, vote) VALUES (?1, ?2, ?3, ?4)",
                params![item, item_id, user_id, d.value()],
            )?;
        }
        VoteTransition::Remove => {
            tx.execute(
                "DELETE FROM votes WHERE item_type = ?1 AND item_id = ?2 AND user_id = ?3",
                params![item, item_id, user_id],
            )?;
        }
        VoteTransition::Switch(d) => {
            tx.execute(
                "UPDATE votes SET vote = ?4 WHERE item_type = ?1 AND item_id = ?2 AND user_id = ?3",
                params![item, item_id, user_id, d.value()],
            )?;
        }
    }

    if transition.notifies_owner() {
        notifications::emit(
            &tx,
            &NewNotification {
                recipient_id: owner.user_id,
                source_id: user_id,
                kind: NotificationKind::Upvote,
                post_id: Some(owner.post_id),
                comment_id: match item {
                    ItemType::Comment => Some(item_id),
                    ItemType::Post => None,
                },
            },
        )?;
    }

    let score = score(&tx, item, item_id)?;
    tx.commit()?;

    tracing::debug!(item = item.as_str(), item_id, user_id, ?transition, score, "vote cast");
    Ok(VoteTally {
        score,
        user_vote: transition.resulting_vote(),
    })
}

/// Sum of all votes on an item.
pub fn score(conn: &Connection, item: ItemType, item_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(vote), 0) FROM votes WHERE item_type = ?1 AND item_id = ?2",
        params![item, item_id],
        |r| r.get(0),
    )
}

/// The vote `user_id` currently holds on an item, 0 when none.
pub fn user_vote(conn: &Connection, item: ItemType, item_id: i64, user_id: i64) -> rusqlite::Result<i64> {
    Ok(conn
        .query_row(
            "SELECT vote FROM votes WHERE item_type = ?1 AND item_id = ?2 AND user_id = ?3",
            params![item, item_id, user_id],
            |r| r.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

/// Deletes every vote on an item. Votes carry no foreign key to their item.
pub fn clear_item(conn: &Connection, item: ItemType, item_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM votes WHERE item_type = ?1 AND item_id = ?2",
        params![item, item_id],
    )
}
