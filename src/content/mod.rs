pub mod comments;
pub mod posts;
pub mod render;

use rusqlite::Connection;

use crate::auth::accounts;
use crate::db::models::{Comment, Post, User};
use crate::db::pagination::Page;
use crate::error::AppResult;

/// A post with what listings show beside it.
#[derive(Debug, Clone)]
pub struct PostSummary {
    pub post: Post,
    pub author: User,
    pub comment_count: i64,
}

#[derive(Debug, Clone)]
pub struct CommentView {
    pub comment: Comment,
    pub author: User,
}

pub fn summarize(conn: &Connection, post: Post) -> AppResult<PostSummary> {
    let author = accounts::require_user(conn, &post.author_id)?;
    let comment_count = comments::comment_count(conn, &post.id)?;
    Ok(PostSummary {
        post,
        author,
        comment_count,
    })
}

pub fn summarize_page(conn: &Connection, page: Page<Post>) -> AppResult<Page<PostSummary>> {
    let Page {
        items,
        page,
        per_page,
        total,
    } = page;
    let items = items
        .into_iter()
        .map(|post| summarize(conn, post))
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

pub fn with_authors(conn: &Connection, page: Page<Comment>) -> AppResult<Page<CommentView>> {
    let Page {
        items,
        page,
        per_page,
        total,
    } = page;
    let items = items
        .into_iter()
        .map(|comment| {
            let author = accounts::require_user(conn, &comment.author_id)?;
            Ok(CommentView { comment, author })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}
