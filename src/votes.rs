//! Per-user votes on posts and comments.
//!
//! A user holds at most one vote row per target. Every change deletes the old
//! row (reversing its unit delta on the target's `vote_count`) and, for an up
//! or down vote, inserts a fresh row and applies the new delta, so the count
//! always equals ups minus downs.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

use crate::db::models::{Post, Vote};
use crate::db::pagination::{bounds, Page};
use crate::error::{AppError, AppResult};

/// The thing being voted on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VoteTarget {
    Post(String),
    Comment(String),
}

impl VoteTarget {
    /// Parse the `post` / `comment` discriminator used in URLs and API bodies.
    pub fn parse(kind: &str, id: impl Into<String>) -> AppResult<Self> {
        match kind {
            "post" => Ok(VoteTarget::Post(id.into())),
            "comment" => Ok(VoteTarget::Comment(id.into())),
            other => Err(AppError::BadRequest(format!(
                "Invalid object type '{}': expected post or comment",
                other
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VoteTarget::Post(_) => "post",
            VoteTarget::Comment(_) => "comment",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            VoteTarget::Post(id) | VoteTarget::Comment(id) => id,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            VoteTarget::Post(_) => "posts",
            VoteTarget::Comment(_) => "comments",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            VoteTarget::Post(_) => "post_id",
            VoteTarget::Comment(_) => "comment_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteState {
    None,
    Up,
    Down,
}

impl VoteState {
    fn weight(self) -> i64 {
        match self {
            VoteState::None => 0,
            VoteState::Up => 1,
            VoteState::Down => -1,
        }
    }

    fn of(vote: &Vote) -> Self {
        if vote.upvote {
            VoteState::Up
        } else if vote.downvote {
            VoteState::Down
        } else {
            VoteState::None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VoteState::None => "NONE",
            VoteState::Up => "UP",
            VoteState::Down => "DOWN",
        }
    }
}

/// Result of a button press: the new state if a vote is now held, and the
/// target's count afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteOutcome {
    pub status: Option<VoteState>,
    pub vote_count: i64,
}

fn vote_row(conn: &Connection, user_id: &str, target: &VoteTarget) -> AppResult<Option<Vote>> {
    let vote = conn
        .query_row(
            &format!(
                "SELECT {} FROM votes WHERE user_id = ?1 AND {} = ?2",
                Vote::COLUMNS,
                target.column()
            ),
            params![user_id, target.id()],
            Vote::from_row,
        )
        .optional()?;
    Ok(vote)
}

/// The target's `(vote_count, editable)`, or `NotFound`.
fn target_state(conn: &Connection, target: &VoteTarget) -> AppResult<(i64, bool)> {
    conn.query_row(
        &format!(
            "SELECT vote_count, editable FROM {} WHERE id = ?1",
            target.table()
        ),
        params![target.id()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or(AppError::NotFound)
}

fn adjust(tx: &Transaction<'_>, target: &VoteTarget, delta: i64) -> AppResult<()> {
    if delta == 0 {
        return Ok(());
    }
    tx.execute(
        &format!(
            "UPDATE {} SET vote_count = vote_count + ?1 WHERE id = ?2",
            target.table()
        ),
        params![delta, target.id()],
    )?;
    Ok(())
}

fn cast(
    tx: &Transaction<'_>,
    user_id: &str,
    target: &VoteTarget,
    desired: VoteState,
) -> AppResult<VoteState> {
    target_state(tx, target)?;

    let existing = vote_row(tx, user_id, target)?;
    let current = existing.as_ref().map_or(VoteState::None, VoteState::of);
    if current == desired {
        return Ok(current);
    }

    if let Some(vote) = existing {
        tx.execute("DELETE FROM votes WHERE id = ?1", params![vote.id])?;
        adjust(tx, target, -current.weight())?;
    }

    if desired != VoteState::None {
        tx.execute(
            &format!(
                "INSERT INTO votes (id, upvote, downvote, user_id, {}) VALUES (?1, ?2, ?3, ?4, ?5)",
                target.column()
            ),
            params![
                crate::db::new_id(),
                desired == VoteState::Up,
                desired == VoteState::Down,
                user_id,
                target.id()
            ],
        )?;
        adjust(tx, target, desired.weight())?;
    }

    tracing::debug!(
        user_id,
        target = target.kind(),
        target_id = target.id(),
        from = current.as_str(),
        to = desired.as_str(),
        "Vote changed"
    );
    Ok(desired)
}

pub fn upvote(tx: &Transaction<'_>, user_id: &str, target: &VoteTarget) -> AppResult<VoteState> {
    cast(tx, user_id, target, VoteState::Up)
}

pub fn downvote(tx: &Transaction<'_>, user_id: &str, target: &VoteTarget) -> AppResult<VoteState> {
    cast(tx, user_id, target, VoteState::Down)
}

pub fn remove_vote(
    tx: &Transaction<'_>,
    user_id: &str,
    target: &VoteTarget,
) -> AppResult<VoteState> {
    cast(tx, user_id, target, VoteState::None)
}

pub fn vote_status(conn: &Connection, user_id: &str, target: &VoteTarget) -> AppResult<VoteState> {
    Ok(vote_row(conn, user_id, target)?
        .as_ref()
        .map_or(VoteState::None, VoteState::of))
}

pub fn vote_count(conn: &Connection, target: &VoteTarget) -> AppResult<i64> {
    Ok(target_state(conn, target)?.0)
}

/// Count of `(up, down)` rows held against the target.
pub fn tally(conn: &Connection, target: &VoteTarget) -> AppResult<(i64, i64)> {
    let counts = conn.query_row(
        &format!(
            "SELECT COALESCE(SUM(upvote), 0), COALESCE(SUM(downvote), 0) FROM votes WHERE {} = ?1",
            target.column()
        ),
        params![target.id()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

/// Press the up or down button: pressing the direction already held removes
/// the vote. Targets that are no longer editable are left alone.
pub fn toggle(
    tx: &Transaction<'_>,
    user_id: &str,
    target: &VoteTarget,
    direction: VoteState,
) -> AppResult<VoteOutcome> {
    let (_, editable) = target_state(tx, target)?;
    let mut status = None;
    if editable {
        if vote_status(tx, user_id, target)? == direction {
            remove_vote(tx, user_id, target)?;
        } else {
            status = Some(cast(tx, user_id, target, direction)?);
        }
    }
    Ok(VoteOutcome {
        status,
        vote_count: vote_count(tx, target)?,
    })
}

/// Live posts `user_id` upvoted but did not write, most recent vote first.
pub fn upvoted_posts(
    conn: &Connection,
    user_id: &str,
    page: u32,
    per_page: u32,
) -> AppResult<Page<Post>> {
    const FILTER: &str = "v.user_id = ?1 AND v.upvote = 1 AND p.author_id <> ?1 AND p.deleted = 0";

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM votes v JOIN posts p ON p.id = v.post_id WHERE {}",
            FILTER
        ),
        params![user_id],
        |r| r.get(0),
    )?;
    let (limit, offset) = bounds(page, per_page);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM votes v JOIN posts p ON p.id = v.post_id WHERE {}
         ORDER BY v.rowid DESC LIMIT ?2 OFFSET ?3",
        Post::COLUMNS,
        FILTER
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
    use crate::content::tests::{fixture, Fixture};
    use crate::content::{comments, posts};
    use crate::db;

    fn new_post(f: &Fixture) -> VoteTarget {
        let post = db::transaction(&f.pool, |tx| posts::create_post(tx, &f.alice, "t", "b")).unwrap();
        VoteTarget::Post(post.id)
    }

    fn run(f: &Fixture, user: &str, target: &VoteTarget, op: VoteState) -> VoteState {
        db::transaction(&f.pool, |tx| match op {
            VoteState::Up => upvote(tx, user, target),
            VoteState::Down => downvote(tx, user, target),
            VoteState::None => remove_vote(tx, user, target),
        })
        .unwrap()
    }

    fn assert_consistent(f: &Fixture, target: &VoteTarget) {
        let conn = f.pool.get().unwrap();
        let (ups, downs) = tally(&conn, target).unwrap();
        assert_eq!(vote_count(&conn, target).unwrap(), ups - downs);
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert_eq!(
            VoteTarget::parse("post", "1").unwrap(),
            VoteTarget::Post("1".into())
        );
        assert_eq!(
            VoteTarget::parse("comment", "1").unwrap().kind(),
            "comment"
        );
        assert!(matches!(
            VoteTarget::parse("user", "1"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn down_up_remove_walkthrough() {
        let f = fixture();
        let post = new_post(&f);
        let bob = f.bob.id.clone();
        let conn_count = |f: &Fixture| vote_count(&f.pool.get().unwrap(), &post).unwrap();
        let status = |f: &Fixture| vote_status(&f.pool.get().unwrap(), &bob, &post).unwrap();

        assert_eq!(conn_count(&f), 1);

        run(&f, &bob, &post, VoteState::Down);
        assert_eq!(conn_count(&f), 0);
        assert_eq!(status(&f), VoteState::Down);

        run(&f, &bob, &post, VoteState::Up);
        assert_eq!(conn_count(&f), 2);
        assert_eq!(status(&f), VoteState::Up);

        run(&f, &bob, &post, VoteState::None);
        assert_eq!(conn_count(&f), 1);
        assert_eq!(status(&f), VoteState::None);
        assert_consistent(&f, &post);
    }

    #[test]
    fn repeated_votes_are_idempotent() {
        let f = fixture();
        let post = new_post(&f);
        run(&f, &f.bob.id, &post, VoteState::Up);
        run(&f, &f.bob.id, &post, VoteState::Up);
        run(&f, &f.admin.id, &post, VoteState::Down);
        run(&f, &f.admin.id, &post, VoteState::Down);

        let conn = f.pool.get().unwrap();
        assert_eq!(vote_count(&conn, &post).unwrap(), 1);
        assert_eq!(tally(&conn, &post).unwrap(), (2, 1));
    }

    #[test]
    fn removing_without_a_vote_changes_nothing() {
        let f = fixture();
        let post = new_post(&f);
        assert_eq!(run(&f, &f.bob.id, &post, VoteState::None), VoteState::None);
        let conn = f.pool.get().unwrap();
        assert_eq!(vote_count(&conn, &post).unwrap(), 1);
    }

    #[test]
    fn count_tracks_rows_through_every_transition() {
        let f = fixture();
        let post = new_post(&f);
        let comment = db::transaction(&f.pool, |tx| {
            comments::create_comment(tx, &f.bob, post.id(), "c")
        })
        .unwrap();
        let comment = VoteTarget::Comment(comment.id);

        let ops = [
            VoteState::Up,
            VoteState::Down,
            VoteState::Down,
            VoteState::None,
            VoteState::Down,
            VoteState::Up,
            VoteState::Up,
            VoteState::None,
            VoteState::None,
            VoteState::Up,
        ];
        let users = [f.alice.id.clone(), f.bob.id.clone(), f.admin.id.clone()];
        for (i, op) in ops.iter().enumerate() {
            let user = &users[i % users.len()];
            for target in [&post, &comment] {
                run(&f, user, target, *op);
                assert_consistent(&f, target);
            }
        }
    }

    #[test]
    fn voting_on_missing_target_is_not_found() {
        let f = fixture();
        let err = db::transaction(&f.pool, |tx| {
            upvote(tx, &f.bob.id, &VoteTarget::Comment("missing".into()))
        })
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    #[test]
    fn toggle_removes_on_second_press_and_skips_locked_targets() {
        let f = fixture();
        let post = new_post(&f);

        let first = db::transaction(&f.pool, |tx| toggle(tx, &f.bob.id, &post, VoteState::Up))
            .unwrap();
        assert_eq!(first.status, Some(VoteState::Up));
        assert_eq!(first.vote_count, 2);

        let second = db::transaction(&f.pool, |tx| toggle(tx, &f.bob.id, &post, VoteState::Up))
            .unwrap();
        assert_eq!(second.status, None);
        assert_eq!(second.vote_count, 1);

        db::transaction(&f.pool, |tx| posts::delete_post(tx, &f.alice, post.id())).unwrap();
        let locked = db::transaction(&f.pool, |tx| toggle(tx, &f.bob.id, &post, VoteState::Down))
            .unwrap();
        assert_eq!(locked.status, None);
        assert_eq!(locked.vote_count, 1);
        let conn = f.pool.get().unwrap();
        assert_eq!(vote_status(&conn, &f.bob.id, &post).unwrap(), VoteState::None);
    }

    #[test]
    fn upvoted_posts_excludes_own_posts() {
        let f = fixture();
        let alices = new_post(&f);
        let bobs = db::transaction(&f.pool, |tx| posts::create_post(tx, &f.bob, "t", "b"))
            .unwrap();
        run(&f, &f.bob.id, &alices, VoteState::Up);

        let conn = f.pool.get().unwrap();
        let page = upvoted_posts(&conn, &f.bob.id, 1, 10).unwrap();
        let ids: Vec<_> = page.items.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![alices.id()]);
        assert!(!ids.contains(&bobs.id.as_str()));
    }

    #[test]
    fn state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&VoteState::Up).unwrap(), "\"UP\"");
        assert_eq!(serde_json::to_string(&VoteState::None).unwrap(), "\"NONE\"");
    }
}
