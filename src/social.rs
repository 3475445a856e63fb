//! The follow graph. Every account follows itself; that edge is written at
//! registration and backfilled by [`add_self_follows`].

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{Follow, Post, User};
use crate::db::pagination::{bounds, Page};
use crate::error::AppResult;

/// A user on one side of a follow edge, with when the edge was made.
#[derive(Debug, Clone)]
pub struct FollowEntry {
    pub user: User,
    pub timestamp: String,
}

fn user_exists(conn: &Connection, id: &str) -> AppResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Make `follower_id` follow `followed_id`. Returns false when the edge
/// already existed.
pub fn follow(conn: &Connection, follower_id: &str, followed_id: &str) -> AppResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id) VALUES (?1, ?2)",
        params![follower_id, followed_id],
    )?;
    Ok(inserted == 1)
}

/// Drop the edge if present. The self-follow edge is never removed here.
pub fn unfollow(conn: &Connection, follower_id: &str, followed_id: &str) -> AppResult<bool> {
    if follower_id == followed_id {
        return Ok(false);
    }
    let removed = conn.execute(
        "DELETE FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
        params![follower_id, followed_id],
    )?;
    Ok(removed == 1)
}

pub fn is_following(conn: &Connection, follower_id: &str, followed_id: &str) -> AppResult<bool> {
    if !user_exists(conn, followed_id)? {
        return Ok(false);
    }
    let found = conn
        .query_row(
            "SELECT 1 FROM follows WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn is_followed_by(conn: &Connection, user_id: &str, follower_id: &str) -> AppResult<bool> {
    if !user_exists(conn, follower_id)? {
        return Ok(false);
    }
    is_following(conn, follower_id, user_id)
}

pub fn get_follow(
    conn: &Connection,
    follower_id: &str,
    followed_id: &str,
) -> AppResult<Option<Follow>> {
    let follow = conn
        .query_row(
            "SELECT follower_id, followed_id, timestamp FROM follows
             WHERE follower_id = ?1 AND followed_id = ?2",
            params![follower_id, followed_id],
            |row| {
                Ok(Follow {
                    follower_id: row.get(0)?,
                    followed_id: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(follow)
}

/// Number of accounts following `user_id`, the self-follow included.
pub fn follower_count(conn: &Connection, user_id: &str) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE followed_id = ?1",
        params![user_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

pub fn followed_count(conn: &Connection, user_id: &str) -> AppResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
        params![user_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

fn edge_page(
    conn: &Connection,
    user_id: &str,
    anchor: &str,
    other: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<FollowEntry>> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM follows WHERE {} = ?1", anchor),
        params![user_id],
        |r| r.get(0),
    )?;

    let (limit, offset) = bounds(page, per_page);
    let columns = User::columns_as("u");
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, f.timestamp FROM follows f JOIN users u ON u.id = f.{}
         WHERE f.{} = ?1
         ORDER BY f.timestamp DESC, f.rowid DESC
         LIMIT ?2 OFFSET ?3",
        columns, other, anchor
    ))?;
    let items = stmt
        .query_map(params![user_id, limit, offset], |row| {
            Ok(FollowEntry {
                user: User::from_row(row)?,
                timestamp: row.get(User::WIDTH)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

/// Accounts following `user_id`, most recent first.
pub fn followers(
    conn: &Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<FollowEntry>> {
    edge_page(conn, user_id, "followed_id", "follower_id", page, per_page)
}

/// Accounts `user_id` follows, most recent first.
pub fn followed(
    conn: &Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<FollowEntry>> {
    edge_page(conn, user_id, "follower_id", "followed_id", page, per_page)
}

/// Insert the missing self-follow for every account. Returns how many were
/// added.
pub fn add_self_follows(conn: &Connection) -> AppResult<usize> {
    let added = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followed_id)
         SELECT id, id FROM users",
        [],
    )?;
    if added > 0 {
        tracing::info!(added, "Backfilled self-follows");
    }
    Ok(added)
}

/// Non-deleted posts written by anyone `user_id` follows, newest first.
pub fn followed_posts(
    conn: &Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Post>> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts p
         JOIN follows f ON f.followed_id = p.author_id
         WHERE f.follower_id = ?1 AND p.deleted = 0",
        params![user_id],
        |r| r.get(0),
    )?;

    let (limit, offset) = bounds(page, per_page);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM posts p
         JOIN follows f ON f.followed_id = p.author_id
         WHERE f.follower_id = ?1 AND p.deleted = 0
         ORDER BY p.timestamp DESC, p.rowid DESC
         LIMIT ?2 OFFSET ?3",
        Post::COLUMNS
    ))?;
    let items = stmt
        .query_map(params![user_id, limit, offset], Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        page,
        per_page,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::state::DbPool;

    fn pool_with_users(names: &[&str]) -> DbPool {
        let pool = db::create_memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        let conn = pool.get().unwrap();
        for name in names {
            conn.execute(
                "INSERT INTO users (id, email, username, password_hash) VALUES (?1, ?2, ?1, '!')",
                params![name, format!("{}@example.com", name)],
            )
            .unwrap();
        }
        drop(conn);
        pool
    }

    #[test]
    fn follow_and_unfollow_are_idempotent() {
        let pool = pool_with_users(&["a", "b"]);
        let conn = pool.get().unwrap();

        assert!(!is_following(&conn, "a", "b").unwrap());
        assert!(follow(&conn, "a", "b").unwrap());
        assert!(!follow(&conn, "a", "b").unwrap());
        assert!(is_following(&conn, "a", "b").unwrap());
        assert!(is_followed_by(&conn, "b", "a").unwrap());
        assert!(!is_followed_by(&conn, "a", "b").unwrap());

        assert!(unfollow(&conn, "a", "b").unwrap());
        assert!(!unfollow(&conn, "a", "b").unwrap());
        assert!(!is_following(&conn, "a", "b").unwrap());
    }

    #[test]
    fn unknown_user_is_never_followed() {
        let pool = pool_with_users(&["a"]);
        let conn = pool.get().unwrap();
        assert!(!is_following(&conn, "a", "ghost").unwrap());
        assert!(!is_followed_by(&conn, "a", "ghost").unwrap());
    }

    #[test]
    fn self_follow_survives_unfollow() {
        let pool = pool_with_users(&["a"]);
        let conn = pool.get().unwrap();
        follow(&conn, "a", "a").unwrap();
        assert!(!unfollow(&conn, "a", "a").unwrap());
        assert!(is_following(&conn, "a", "a").unwrap());
    }

    #[test]
    fn backfill_adds_only_missing_self_follows() {
        let pool = pool_with_users(&["a", "b"]);
        let conn = pool.get().unwrap();
        follow(&conn, "a", "a").unwrap();
        assert_eq!(add_self_follows(&conn).unwrap(), 1);
        assert_eq!(add_self_follows(&conn).unwrap(), 0);
        assert!(is_following(&conn, "b", "b").unwrap());
    }

    #[test]
    fn follower_lists_and_counts() {
        let pool = pool_with_users(&["a", "b", "c"]);
        let conn = pool.get().unwrap();
        add_self_follows(&conn).unwrap();
        follow(&conn, "b", "a").unwrap();
        follow(&conn, "c", "a").unwrap();

        assert_eq!(follower_count(&conn, "a").unwrap(), 3);
        assert_eq!(followed_count(&conn, "b").unwrap(), 2);

        let page = followers(&conn, "a", 1, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].user.username, "c");

        let page = followed(&conn, "b", 1, 10).unwrap();
        let names: Vec<_> = page.items.iter().map(|e| e.user.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(get_follow(&conn, "b", "a").unwrap().is_some());
    }

    #[test]
    fn feed_contains_only_followed_authors() {
        let pool = pool_with_users(&["a", "b", "c"]);
        let conn = pool.get().unwrap();
        add_self_follows(&conn).unwrap();
        follow(&conn, "a", "b").unwrap();
        for (id, author) in [("p1", "a"), ("p2", "b"), ("p3", "c")] {
            conn.execute(
                "INSERT INTO posts (id, title, body, body_html, author_id) VALUES (?1, 't', 'b', 'b', ?2)",
                params![id, author],
            )
            .unwrap();
        }
        conn.execute("UPDATE posts SET deleted = 1 WHERE id = 'p1'", [])
            .unwrap();

        let feed = followed_posts(&conn, "a", 1, 10).unwrap();
        let ids: Vec<_> = feed.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2"]);
        assert_eq!(feed.total, 1);
    }
}
