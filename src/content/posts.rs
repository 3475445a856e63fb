use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::auth::accounts;
use crate::auth::permissions::{Permission, Principal};
use crate::content::render;
use crate::db::models::Post;
use crate::db::pagination::{bounds, Page};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::votes::{self, VoteTarget};

/// Body written over a post when it is deleted.
pub const DELETED_MARKER: &str = "**[deleted]**";

const MAX_TITLE_LEN: usize = 128;

impl Post {
    /// Replace the markdown body and re-render the cached HTML.
    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
        self.body_html = render::render_post(body);
    }

    /// One-way transition to the deleted state. Votes and count are kept.
    pub fn mark_deleted(&mut self, placeholder_id: &str) {
        self.deleted = true;
        self.editable = false;
        self.author_id = placeholder_id.to_string();
        self.set_body(DELETED_MARKER);
    }

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author_id == user_id
    }
}

fn validate(title: &str, body: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::BadRequest("Your post requires a title".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::BadRequest(format!(
            "Titles must be {} characters or less",
            MAX_TITLE_LEN
        )));
    }
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("Post does not have a body".into()));
    }
    Ok(())
}

fn can_manage(actor: &CurrentUser, post: &Post) -> bool {
    post.is_authored_by(&actor.id) || actor.can(Permission::ADMIN)
}

fn save(tx: &Transaction<'_>, post: &Post) -> AppResult<()> {
    tx.execute(
        "UPDATE posts SET title = ?1, body = ?2, body_html = ?3, author_id = ?4,
                deleted = ?5, editable = ?6
         WHERE id = ?7",
        params![
            post.title,
            post.body,
            post.body_html,
            post.author_id,
            post.deleted,
            post.editable,
            post.id
        ],
    )?;
    Ok(())
}

/// Publish a post and record the author's own upvote on it.
pub fn create_post(
    tx: &Transaction<'_>,
    author: &CurrentUser,
    title: &str,
    body: &str,
) -> AppResult<Post> {
    if !author.can(Permission::WRITE) {
        return Err(AppError::Forbidden);
    }
    validate(title, body)?;

    let id = crate::db::new_id();
    tx.execute(
        "INSERT INTO posts (id, title, body, body_html, author_id) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, title.trim(), body, render::render_post(body), author.id],
    )?;
    votes::upvote(tx, &author.id, &VoteTarget::Post(id.clone()))?;

    tracing::debug!(post_id = %id, author = %author.username, "Post created");
    require_post(tx, &id)
}

pub fn get_post(conn: &Connection, id: &str) -> AppResult<Option<Post>> {
    let post = conn
        .query_row(
            &format!("SELECT {} FROM posts p WHERE p.id = ?1", Post::COLUMNS),
            params![id],
            Post::from_row,
        )
        .optional()?;
    Ok(post)
}

pub fn require_post(conn: &Connection, id: &str) -> AppResult<Post> {
    get_post(conn, id)?.ok_or(AppError::NotFound)
}

/// Edit title and body. Only the author or an administrator may edit, and
/// never once the post has stopped being editable.
pub fn update_post(
    tx: &Transaction<'_>,
    actor: &CurrentUser,
    id: &str,
    title: &str,
    body: &str,
) -> AppResult<Post> {
    let mut post = require_post(tx, id)?;
    if !can_manage(actor, &post) || !post.editable {
        return Err(AppError::Forbidden);
    }
    validate(title, body)?;

    post.title = title.trim().to_string();
    post.set_body(body);
    save(tx, &post)?;
    Ok(post)
}

/// Soft delete. Deleting an already deleted post changes nothing.
pub fn delete_post(tx: &Transaction<'_>, actor: &CurrentUser, id: &str) -> AppResult<Post> {
    let mut post = require_post(tx, id)?;
    if post.deleted {
        if actor.can(Permission::ADMIN) {
            return Ok(post);
        }
        return Err(AppError::Forbidden);
    }
    if !can_manage(actor, &post) {
        return Err(AppError::Forbidden);
    }

    let placeholder = accounts::deleted_user(tx)?;
    post.mark_deleted(&placeholder.id);
    save(tx, &post)?;

    tracing::info!(post_id = %post.id, by = %actor.username, "Post deleted");
    Ok(post)
}

fn page_of(
    conn: &Connection,
    filter: &str,
    param: Option<&str>,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Post>> {
    let (limit, offset) = bounds(page, per_page);
    let (total, items) = match param {
        Some(value) => {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM posts p WHERE {}", filter),
                params![value],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM posts p WHERE {}
                 ORDER BY p.timestamp DESC, p.rowid DESC LIMIT ?2 OFFSET ?3",
                Post::COLUMNS,
                filter
            ))?;
            let items = stmt
                .query_map(params![value, limit, offset], Post::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            (total, items)
        }
        None => {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM posts p WHERE {}", filter),
                [],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM posts p WHERE {}
                 ORDER BY p.timestamp DESC, p.rowid DESC LIMIT ?1 OFFSET ?2",
                Post::COLUMNS,
                filter
            ))?;
            let items = stmt
                .query_map(params![limit, offset], Post::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            (total, items)
        }
    };
    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Every live post, newest first.
pub fn list_posts(conn: &Connection, page: u32, per_page: u32) -> AppResult<Page<Post>> {
    page_of(conn, "p.deleted = 0", None, page, per_page)
}

pub fn user_posts(
    conn: &Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Post>> {
    page_of(
        conn,
        "p.author_id = ?1 AND p.deleted = 0",
        Some(user_id),
        page,
        per_page,
    )
}

pub fn post_count_by(conn: &Connection, user_id: &str) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE author_id = ?1 AND deleted = 0",
        params![user_id],
        |r| r.get(0),
    )?;
    Ok(count)
}
