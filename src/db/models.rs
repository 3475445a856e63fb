use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::Permission;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub is_default: bool,
    pub permissions: Permission,
}

impl Role {
    pub(crate) const COLUMNS: &'static str = "id, name, is_default, permissions";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            is_default: row.get(2)?,
            permissions: Permission::from_bits(row.get(3)?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: Option<i64>,
    pub confirmed: bool,
    pub name: Option<String>,
    pub location: Option<String>,
    pub about_me: Option<String>,
    pub member_since: String,
    pub last_seen: String,
    pub avatar_hash: Option<String>,
    pub server_own: bool,
}

impl User {
    pub(crate) const COLUMNS: &'static str = "id, email, username, password_hash, role_id, \
         confirmed, name, location, about_me, member_since, last_seen, avatar_hash, server_own";
    pub(crate) const WIDTH: usize = 13;

    /// [`User::COLUMNS`] qualified with a table alias, for joins.
    pub(crate) fn columns_as(alias: &str) -> String {
        Self::COLUMNS
            .split(',')
            .map(|c| format!("{}.{}", alias, c.trim()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            password_hash: row.get(3)?,
            role_id: row.get(4)?,
            confirmed: row.get(5)?,
            name: row.get(6)?,
            location: row.get(7)?,
            about_me: row.get(8)?,
            member_since: row.get(9)?,
            last_seen: row.get(10)?,
            avatar_hash: row.get(11)?,
            server_own: row.get(12)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Follow {
    pub follower_id: String,
    pub followed_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: String,
    pub author_id: String,
    pub vote_count: i64,
    pub deleted: bool,
    pub editable: bool,
}

impl Post {
    /// Column list for a `posts` table aliased as `p`.
    pub(crate) const COLUMNS: &'static str = "p.id, p.title, p.body, p.body_html, p.timestamp, \
         p.author_id, p.vote_count, p.deleted, p.editable";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            body: row.get(2)?,
            body_html: row.get(3)?,
            timestamp: row.get(4)?,
            author_id: row.get(5)?,
            vote_count: row.get(6)?,
            deleted: row.get(7)?,
            editable: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: String,
    pub disabled: bool,
    pub author_id: String,
    pub post_id: String,
    pub vote_count: i64,
    pub editable: bool,
}

impl Comment {
    /// Column list for a `comments` table aliased as `c`.
    pub(crate) const COLUMNS: &'static str = "c.id, c.body, c.body_html, c.timestamp, \
         c.disabled, c.author_id, c.post_id, c.vote_count, c.editable";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            body_html: row.get(2)?,
            timestamp: row.get(3)?,
            disabled: row.get(4)?,
            author_id: row.get(5)?,
            post_id: row.get(6)?,
            vote_count: row.get(7)?,
            editable: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: String,
    pub upvote: bool,
    pub downvote: bool,
    pub user_id: String,
    pub post_id: Option<String>,
    pub comment_id: Option<String>,
}

impl Vote {
    pub(crate) const COLUMNS: &'static str = "id, upvote, downvote, user_id, post_id, comment_id";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            upvote: row.get(1)?,
            downvote: row.get(2)?,
            user_id: row.get(3)?,
            post_id: row.get(4)?,
            comment_id: row.get(5)?,
        })
    }
}
