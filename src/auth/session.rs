use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppResult;

/// Create a new session for a user. Returns the session token.
pub fn create_session(conn: &Connection, user_id: &str, hours: u64) -> AppResult<String> {
    let token = generate_token();
    let id = crate::db::new_id();

    conn.execute(
        "INSERT INTO sessions (id, user_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, user_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// The user id behind an unexpired session token.
pub fn session_user(conn: &Connection, token: &str) -> AppResult<Option<String>> {
    let user_id = conn
        .query_row(
            "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > datetime('now')",
            params![token],
            |row| row.get(0),
        )
        .optional()?;
    Ok(user_id)
}

/// Delete a session by token.
pub fn delete_session(conn: &Connection, token: &str) -> AppResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Drop every session belonging to a user, e.g. after a password reset.
pub fn delete_user_sessions(conn: &Connection, user_id: &str) -> AppResult<usize> {
    let removed = conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?;
    Ok(removed)
}

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", name)
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn pool_with_user() -> crate::state::DbPool {
        let pool = db::create_memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO users (id, email, username, password_hash) VALUES ('u1', 'a@b.io', 'a', '!')",
                [],
            )
            .unwrap();
        pool
    }

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
    }

    #[test]
    fn session_resolves_until_deleted() {
        let pool = pool_with_user();
        let conn = pool.get().unwrap();
        let token = create_session(&conn, "u1", 1).unwrap();
        assert_eq!(session_user(&conn, &token).unwrap().as_deref(), Some("u1"));

        delete_session(&conn, &token).unwrap();
        assert_eq!(session_user(&conn, &token).unwrap(), None);
    }

    #[test]
    fn expired_session_does_not_resolve() {
        let pool = pool_with_user();
        let conn = pool.get().unwrap();
        let token = create_session(&conn, "u1", 1).unwrap();
        conn.execute(
            "UPDATE sessions SET expires_at = datetime('now', '-1 hours')",
            [],
        )
        .unwrap();
        assert_eq!(session_user(&conn, &token).unwrap(), None);
    }

    #[test]
    fn cookies_carry_name_and_age() {
        assert_eq!(
            session_cookie("s", "abc", 2),
            "s=abc; HttpOnly; SameSite=Lax; Path=/; Max-Age=7200"
        );
        assert!(clear_session_cookie("s").contains("Max-Age=0"));
    }
}
