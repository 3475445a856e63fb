use std::thread;

use tempfile::TempDir;

use usapan::auth::accounts::{self, Registration};
use usapan::auth::permissions::{self, Permission, Principal};
use usapan::auth::tokens::TokenSigner;
use usapan::content::{comments, posts};
use usapan::db;
use usapan::deploy;
use usapan::extractors::CurrentUser;
use usapan::social;
use usapan::state::DbPool;
use usapan::votes::{self, VoteState, VoteTarget};

fn open(dir: &TempDir) -> DbPool {
    let pool = db::create_pool(&dir.path().join("usapan.db")).expect("Failed to create test database");
    deploy::prepare(&pool, true).expect("Failed to prepare database");
    pool
}

fn register(pool: &DbPool, email: &str, username: &str) -> CurrentUser {
    let user = db::transaction(pool, |tx| {
        accounts::create_user(
            tx,
            &Registration {
                email: email.into(),
                username: username.into(),
                password: "secret".into(),
            },
            Some("admin@example.com"),
        )
    })
    .unwrap();
    let conn = pool.get().unwrap();
    CurrentUser::load(&conn, &user.id).unwrap().unwrap()
}

#[test]
fn vote_walkthrough_on_disk() {
    let dir = TempDir::new().unwrap();
    let pool = open(&dir);
    let ann = register(&pool, "ann@example.com", "ann");
    let bob = register(&pool, "bob@example.com", "bob");

    let post = db::transaction(&pool, |tx| posts::create_post(tx, &ann, "Hello", "world")).unwrap();
    let target = VoteTarget::Post(post.id.clone());
    let count = |pool: &DbPool| votes::vote_count(&pool.get().unwrap(), &target).unwrap();
    assert_eq!(count(&pool), 1);

    db::transaction(&pool, |tx| votes::downvote(tx, &bob.id, &target)).unwrap();
    assert_eq!(count(&pool), 0);
    db::transaction(&pool, |tx| votes::upvote(tx, &bob.id, &target)).unwrap();
    assert_eq!(count(&pool), 2);
    db::transaction(&pool, |tx| votes::remove_vote(tx, &bob.id, &target)).unwrap();
    assert_eq!(count(&pool), 1);

    let conn = pool.get().unwrap();
    assert_eq!(
        votes::vote_status(&conn, &bob.id, &target).unwrap(),
        VoteState::None
    );
    let (ups, downs) = votes::tally(&conn, &target).unwrap();
    assert_eq!(ups - downs, count(&pool));
}

#[test]
fn data_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let post_id = {
        let pool = open(&dir);
        let ann = register(&pool, "ann@example.com", "ann");
        db::transaction(&pool, |tx| posts::create_post(tx, &ann, "Kept", "body"))
            .unwrap()
            .id
    };

    // Second deploy over the same file is a no-op apart from backfills.
    let pool = open(&dir);
    let conn = pool.get().unwrap();
    let post = posts::require_post(&conn, &post_id).unwrap();
    assert_eq!(post.title, "Kept");
    assert_eq!(post.vote_count, 1);
    assert_eq!(permissions::list_roles(&conn).unwrap().len(), 3);
    let ann = accounts::get_user_by_username(&conn, "ann").unwrap().unwrap();
    assert!(social::is_following(&conn, &ann.id, &ann.id).unwrap());
}

#[test]
fn admin_email_account_can_moderate_comments() {
    let dir = TempDir::new().unwrap();
    let pool = open(&dir);
    let ann = register(&pool, "ann@example.com", "ann");
    let admin = register(&pool, "admin@example.com", "admin");
    assert!(admin.is_administrator());
    assert!(admin.can(Permission::MODERATE));
    assert!(!ann.can(Permission::MODERATE));

    let post = db::transaction(&pool, |tx| posts::create_post(tx, &ann, "t", "b")).unwrap();
    let comment =
        db::transaction(&pool, |tx| comments::create_comment(tx, &ann, &post.id, "hi")).unwrap();

    let denied = db::transaction(&pool, |tx| comments::set_disabled(tx, &ann, &comment.id, true));
    assert!(denied.is_err());
    let disabled =
        db::transaction(&pool, |tx| comments::set_disabled(tx, &admin, &comment.id, true)).unwrap();
    assert!(disabled.disabled);
}

#[test]
fn reset_token_signed_by_one_server_works_after_restart_with_same_secret() {
    let dir = TempDir::new().unwrap();
    let pool = open(&dir);
    let ann = register(&pool, "ann@example.com", "ann");

    let token = accounts::generate_reset_token(&TokenSigner::new(b"shared"), &ann.id, 60).unwrap();
    let restarted = TokenSigner::new(b"shared");
    assert!(db::transaction(&pool, |tx| {
        accounts::reset_password(tx, &restarted, &token, "new-secret")
    })
    .unwrap());

    let conn = pool.get().unwrap();
    assert!(accounts::authenticate(&conn, "ann@example.com", "new-secret")
        .unwrap()
        .is_some());
    assert!(accounts::authenticate(&conn, "ann@example.com", "secret")
        .unwrap()
        .is_none());
}

#[test]
fn concurrent_votes_keep_the_count_consistent() {
    let dir = TempDir::new().unwrap();
    let pool = open(&dir);
    let author = register(&pool, "author@example.com", "author");
    let post = db::transaction(&pool, |tx| posts::create_post(tx, &author, "Busy", "post")).unwrap();
    let target = VoteTarget::Post(post.id.clone());

    let voters: Vec<CurrentUser> = (0..8)
        .map(|i| register(&pool, &format!("voter{}@example.com", i), &format!("voter{}", i)))
        .collect();

    // Two workers per voter, so the same (user, post) row is contended too.
    let workers: Vec<_> = voters
        .iter()
        .chain(voters.iter())
        .enumerate()
        .map(|(n, voter)| {
            let pool = pool.clone();
            let user_id = voter.id.clone();
            let target = target.clone();
            thread::spawn(move || {
                for round in 0..20 {
                    db::transaction(&pool, |tx| match (n + round) % 3 {
                        0 => votes::upvote(tx, &user_id, &target),
                        1 => votes::downvote(tx, &user_id, &target),
                        _ => votes::remove_vote(tx, &user_id, &target),
                    })
                    .unwrap();
                }
                db::transaction(&pool, |tx| votes::upvote(tx, &user_id, &target)).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let conn = pool.get().unwrap();
    let (ups, downs) = votes::tally(&conn, &target).unwrap();
    let count = votes::vote_count(&conn, &target).unwrap();
    assert_eq!(count, ups - downs);
    assert_eq!((ups, downs), (9, 0));
    assert_eq!(count, 9);
    for voter in &voters {
        assert_eq!(
            votes::vote_status(&conn, &voter.id, &target).unwrap(),
            VoteState::Up
        );
    }
}
