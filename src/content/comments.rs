use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::auth::permissions::{Permission, Principal};
use crate::content::{posts, render};
use crate::db::models::Comment;
use crate::db::pagination::{bounds, Page};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

/// How comments under a post are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentOrder {
    #[default]
    Newest,
    Top,
}

impl CommentOrder {
    fn sql(self) -> &'static str {
        match self {
            CommentOrder::Newest => "c.timestamp DESC, c.rowid DESC",
            CommentOrder::Top => "c.vote_count DESC, c.timestamp DESC, c.rowid DESC",
        }
    }
}

impl Comment {
    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
        self.body_html = render::render_comment(body);
    }
}

fn validate(body: &str) -> AppResult<()> {
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Comment does not have a body".into()));
    }
    Ok(())
}

fn can_manage(actor: &CurrentUser, comment: &Comment) -> bool {
    comment.author_id == actor.id || actor.can(Permission::ADMIN)
}

pub fn create_comment(
    tx: &Transaction<'_>,
    author: &CurrentUser,
    post_id: &str,
    body: &str,
) -> AppResult<Comment> {
    if !author.can(Permission::COMMENT) {
        return Err(AppError::Forbidden);
    }
    posts::require_post(tx, post_id)?;
    validate(body)?;

    let id = crate::db::new_id();
    tx.execute(
        "INSERT INTO comments (id, body, body_html, author_id, post_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, body, render::render_comment(body), author.id, post_id],
    )?;
    require_comment(tx, &id)
}

pub fn get_comment(conn: &Connection, id: &str) -> AppResult<Option<Comment>> {
    let comment = conn
        .query_row(
            &format!("SELECT {} FROM comments c WHERE c.id = ?1", Comment::COLUMNS),
            params![id],
            Comment::from_row,
        )
        .optional()?;
    Ok(comment)
}

pub fn require_comment(conn: &Connection, id: &str) -> AppResult<Comment> {
    get_comment(conn, id)?.ok_or(AppError::NotFound)
}

pub fn update_comment(
    tx: &Transaction<'_>,
    actor: &CurrentUser,
    id: &str,
    body: &str,
) -> AppResult<Comment> {
    let mut comment = require_comment(tx, id)?;
    if !can_manage(actor, &comment) || !comment.editable {
        return Err(AppError::Forbidden);
    }
    validate(body)?;

    comment.set_body(body);
    tx.execute(
        "UPDATE comments SET body = ?1, body_html = ?2 WHERE id = ?3",
        params![comment.body, comment.body_html, comment.id],
    )?;
    Ok(comment)
}

/// Hard delete. The comment's votes go with it.
pub fn delete_comment(tx: &Transaction<'_>, actor: &CurrentUser, id: &str) -> AppResult<Comment> {
    let comment = require_comment(tx, id)?;
    if !can_manage(actor, &comment) {
        return Err(AppError::Forbidden);
    }
    tx.execute("DELETE FROM comments WHERE id = ?1", params![comment.id])?;

    tracing::info!(comment_id = %comment.id, by = %actor.username, "Comment deleted");
    Ok(comment)
}

/// Hide or re-show a comment. Moderators only.
pub fn set_disabled(
    tx: &Transaction<'_>,
    actor: &CurrentUser,
    id: &str,
    disabled: bool,
) -> AppResult<Comment> {
    if !actor.can(Permission::MODERATE) {
        return Err(AppError::Forbidden);
    }
    let updated = tx.execute(
        "UPDATE comments SET disabled = ?1 WHERE id = ?2",
        params![disabled, id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    tracing::info!(comment_id = id, disabled, by = %actor.username, "Comment moderated");
    require_comment(tx, id)
}

pub fn comment_count(conn: &Connection, post_id: &str) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// The last page number for a post's comments, used to jump to a fresh one.
pub fn last_page(conn: &Connection, post_id: &str, per_page: u32) -> AppResult<u32> {
    let count = comment_count(conn, post_id)?;
    let per_page = per_page.max(1) as i64;
    Ok(((count - 1).max(0) / per_page + 1) as u32)
}

pub fn post_comments(
    conn: &Connection,
    post_id: &str,
    order: CommentOrder,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Comment>> {
    let total = comment_count(conn, post_id)?;
    let (limit, offset) = bounds(page, per_page);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c WHERE c.post_id = ?1 ORDER BY {} LIMIT ?2 OFFSET ?3",
        Comment::COLUMNS,
        order.sql()
    ))?;
    let items = stmt
        .query_map(params![post_id, limit, offset], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Every comment on the site, newest first, optionally only those written in
/// the last `within_hours`.
pub fn recent_comments(
    conn: &Connection,
    within_hours: Option<u32>,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Comment>> {
    let window = within_hours.map(|hours| format!("-{} hours", hours));
    let filter = if window.is_some() {
        "c.timestamp >= datetime('now', ?1)"
    } else {
        "?1 IS NULL"
    };
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM comments c WHERE {}", filter),
        params![window],
        |r| r.get(0),
    )?;
    let (limit, offset) = bounds(page, per_page);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM comments c WHERE {}
         ORDER BY c.timestamp DESC, c.rowid DESC LIMIT ?2 OFFSET ?3",
        Comment::COLUMNS,
        filter
    ))?;
    let items = stmt
        .query_map(params![window, limit, offset], Comment::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}
