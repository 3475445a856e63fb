//! Flattened view models handed to templates.

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::auth::accounts;
use crate::auth::permissions::{Permission, Principal};
use crate::content::{self, CommentView, PostSummary};
use crate::db::models::{Comment, Post, User};
use crate::db::pagination::Page;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::social::FollowEntry;
use crate::votes::{self, VoteTarget};

pub struct NavUser {
    pub username: String,
    pub can_moderate: bool,
    pub is_admin: bool,
    pub confirmed: bool,
}

/// What the top bar needs to know about the viewer.
pub struct Nav {
    pub user: Option<NavUser>,
}

impl Nav {
    pub fn for_user(user: Option<&CurrentUser>) -> Self {
        Self {
            user: user.map(|u| NavUser {
                username: u.username.clone(),
                can_moderate: u.can(Permission::MODERATE),
                is_admin: u.is_administrator(),
                confirmed: u.confirmed,
            }),
        }
    }

    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

/// `2026-01-05 14:03:00` as `Jan 05, 2026 14:03`.
pub fn display_time(timestamp: &str) -> String {
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.format("%b %d, %Y %H:%M").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

pub fn avatar(user: &User, size: u32) -> String {
    accounts::gravatar_url(user, size, "identicon", "g")
}

pub struct PostCard {
    pub id: String,
    pub title: String,
    pub body_html: String,
    pub timestamp: String,
    pub author: String,
    pub author_avatar: String,
    pub author_is_placeholder: bool,
    pub vote_count: i64,
    pub comment_count: i64,
    pub status: &'static str,
    pub can_edit: bool,
    pub can_delete: bool,
}

impl PostCard {
    pub fn build(
        conn: &Connection,
        summary: PostSummary,
        viewer: Option<&CurrentUser>,
    ) -> AppResult<Self> {
        let PostSummary {
            post,
            author,
            comment_count,
        } = summary;
        let (status, manages) = match viewer {
            Some(v) => (
                votes::vote_status(conn, &v.id, &VoteTarget::Post(post.id.clone()))?.as_str(),
                post.author_id == v.id || v.can(Permission::ADMIN),
            ),
            None => ("NONE", false),
        };
        Ok(Self {
            timestamp: display_time(&post.timestamp),
            author_avatar: avatar(&author, 40),
            author_is_placeholder: author.server_own,
            author: author.username,
            can_edit: manages && post.editable,
            can_delete: manages && !post.deleted,
            id: post.id,
            title: post.title,
            body_html: post.body_html,
            vote_count: post.vote_count,
            comment_count,
            status,
        })
    }
}

pub fn post_cards(
    conn: &Connection,
    page: &mut Page<Post>,
    viewer: Option<&CurrentUser>,
) -> AppResult<Vec<PostCard>> {
    std::mem::take(&mut page.items)
        .into_iter()
        .map(|post| -> AppResult<PostCard> {
            PostCard::build(conn, content::summarize(conn, post)?, viewer)
        })
        .collect()
}

pub struct CommentCard {
    pub id: String,
    pub post_id: String,
    pub body_html: String,
    pub timestamp: String,
    pub author: String,
    pub author_avatar: String,
    pub vote_count: i64,
    pub disabled: bool,
    pub status: &'static str,
    pub can_edit: bool,
    pub can_delete: bool,
}

pub fn comment_cards(
    conn: &Connection,
    page: &mut Page<Comment>,
    viewer: Option<&CurrentUser>,
) -> AppResult<Vec<CommentCard>> {
    let comments = Page {
        items: std::mem::take(&mut page.items),
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    };
    content::with_authors(conn, comments)?
        .items
        .into_iter()
        .map(|CommentView { comment, author }| -> AppResult<CommentCard> {
            let (status, manages) = match viewer {
                Some(v) => (
                    votes::vote_status(conn, &v.id, &VoteTarget::Comment(comment.id.clone()))?
                        .as_str(),
                    comment.author_id == v.id || v.can(Permission::ADMIN),
                ),
                None => ("NONE", false),
            };
            Ok(CommentCard {
                timestamp: display_time(&comment.timestamp),
                author_avatar: avatar(&author, 40),
                author: author.username,
                can_edit: manages && comment.editable,
                can_delete: manages,
                id: comment.id,
                post_id: comment.post_id,
                body_html: comment.body_html,
                vote_count: comment.vote_count,
                disabled: comment.disabled,
                status,
            })
        })
        .collect()
}

pub struct UserEntry {
    pub username: String,
    pub avatar: String,
    pub since: String,
}

impl UserEntry {
    pub fn from_follow(entry: FollowEntry) -> Self {
        Self {
            avatar: avatar(&entry.user, 32),
            username: entry.user.username,
            since: display_time(&entry.timestamp),
        }
    }

    pub fn from_user(user: User) -> Self {
        Self {
            avatar: avatar(&user, 32),
            since: display_time(&user.member_since),
            username: user.username,
        }
    }
}
