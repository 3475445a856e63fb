use md5::{Digest, Md5};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::auth::password;
use crate::auth::permissions::{self, Principal, ADMIN_ROLE};
use crate::auth::session;
use crate::auth::tokens::{TokenKind, TokenSigner};
use crate::db::models::User;
use crate::db::pagination::{bounds, Page};
use crate::error::{conflict_on_unique, AppError, AppResult};
use crate::social;

/// Username of the placeholder that soft-deleted posts are reassigned to.
pub const DELETED_USERNAME: &str = "deleted";
const DELETED_EMAIL: &str = "deleted";

/// Default lifetime of confirmation, reset and email-change tokens.
pub const TOKEN_TTL_SECS: u64 = 3600;

const MAX_FIELD_LEN: usize = 64;

/// Input for a new account.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    pub about_me: Option<String>,
}

/// Everything an administrator may change on someone else's account.
#[derive(Debug, Clone)]
pub struct AdminUpdate {
    pub email: String,
    pub username: String,
    pub confirmed: bool,
    pub role_id: i64,
    pub profile: ProfileUpdate,
}

pub fn validate_email(email: &str) -> AppResult<()> {
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if (1..=MAX_FIELD_LEN).contains(&email.len())
        && well_formed
        && !email.chars().any(char::is_whitespace)
    {
        Ok(())
    } else {
        Err(AppError::BadRequest("Invalid email address.".into()))
    }
}

pub fn validate_username(username: &str) -> AppResult<()> {
    let mut chars = username.chars();
    let valid = (1..=MAX_FIELD_LEN).contains(&username.len())
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(
            "Usernames must have only letters, numbers, dots or underscores".into(),
        ))
    }
}

/// Create an account with the default role (or Administrator when the email
/// matches `admin_email`) and its self-follow edge.
pub fn create_user(
    tx: &Transaction<'_>,
    registration: &Registration,
    admin_email: Option<&str>,
) -> AppResult<User> {
    let email = registration.email.trim();
    let username = registration.username.trim();
    validate_email(email)?;
    validate_username(username)?;
    if registration.password.is_empty() {
        return Err(AppError::BadRequest("Password is required.".into()));
    }
    if get_user_by_email(tx, email)?.is_some() {
        return Err(AppError::Conflict("Email already registered.".into()));
    }
    if username == DELETED_USERNAME || get_user_by_username(tx, username)?.is_some() {
        return Err(AppError::Conflict("Username already in use.".into()));
    }

    let admin_role = match admin_email {
        Some(admin) if admin.eq_ignore_ascii_case(email) => permissions::role_by_name(tx, ADMIN_ROLE)?,
        _ => None,
    };
    let role = match admin_role {
        Some(role) => role,
        None => permissions::default_role(tx)?,
    };

    let id = crate::db::new_id();
    let password_hash = password::hash(&registration.password)?;
    tx.execute(
        "INSERT INTO users (id, email, username, password_hash, role_id, avatar_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, email, username, password_hash, role.id, gravatar_hash(email)],
    )
    .map_err(|e| conflict_on_unique(e, "Email or username already in use."))?;

    social::follow(tx, &id, &id)?;

    tracing::info!(user_id = %id, role = %role.name, "Created account {}", username);
    require_user(tx, &id)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE {} = ?1", User::COLUMNS, column),
            params![value],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> AppResult<Option<User>> {
    query_user(conn, "id", id)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> AppResult<Option<User>> {
    query_user(conn, "email", email)
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> AppResult<Option<User>> {
    query_user(conn, "username", username)
}

pub fn require_user(conn: &Connection, id: &str) -> AppResult<User> {
    get_user(conn, id)?.ok_or(AppError::NotFound)
}

/// Look up a loginable account by email and check its password.
pub fn authenticate(conn: &Connection, email: &str, password: &str) -> AppResult<Option<User>> {
    let user = get_user_by_email(conn, email.trim())?;
    Ok(user.filter(|u| !u.server_own && password::verify(password, &u.password_hash)))
}

pub fn verify_password(user: &User, candidate: &str) -> bool {
    password::verify(candidate, &user.password_hash)
}

pub fn set_password(conn: &Connection, user_id: &str, new_password: &str) -> AppResult<()> {
    if new_password.is_empty() {
        return Err(AppError::BadRequest("Password is required.".into()));
    }
    let hash = password::hash(new_password)?;
    let updated = conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        params![hash, user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn change_password(
    tx: &Transaction<'_>,
    user_id: &str,
    current: &str,
    new_password: &str,
) -> AppResult<()> {
    let user = require_user(tx, user_id)?;
    if !verify_password(&user, current) {
        return Err(AppError::BadRequest("Invalid password.".into()));
    }
    set_password(tx, user_id, new_password)
}

pub fn generate_confirmation_token(
    signer: &TokenSigner,
    user_id: &str,
    ttl_secs: u64,
) -> AppResult<String> {
    signer.issue(TokenKind::Confirm, user_id, None, ttl_secs)
}

/// Mark `user_id` confirmed if `token` is a live confirmation token for it.
pub fn confirm(
    tx: &Transaction<'_>,
    signer: &TokenSigner,
    user_id: &str,
    token: &str,
) -> AppResult<bool> {
    let Some(verified) = signer.verify(token, TokenKind::Confirm) else {
        return Ok(false);
    };
    if verified.subject != user_id {
        tracing::warn!(user_id, "Confirmation token issued for another account");
        return Ok(false);
    }
    let updated = tx.execute(
        "UPDATE users SET confirmed = 1 WHERE id = ?1",
        params![user_id],
    )?;
    Ok(updated == 1)
}

pub fn generate_reset_token(
    signer: &TokenSigner,
    user_id: &str,
    ttl_secs: u64,
) -> AppResult<String> {
    signer.issue(TokenKind::Reset, user_id, None, ttl_secs)
}

/// Set a new password for whoever the reset token names. Existing sessions
/// of that account are dropped.
pub fn reset_password(
    tx: &Transaction<'_>,
    signer: &TokenSigner,
    token: &str,
    new_password: &str,
) -> AppResult<bool> {
    let Some(verified) = signer.verify(token, TokenKind::Reset) else {
        return Ok(false);
    };
    match get_user(tx, &verified.subject)? {
        Some(user) if !user.server_own => {
            set_password(tx, &user.id, new_password)?;
            session::delete_user_sessions(tx, &user.id)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub fn generate_email_change_token(
    signer: &TokenSigner,
    user_id: &str,
    new_email: &str,
    ttl_secs: u64,
) -> AppResult<String> {
    validate_email(new_email)?;
    signer.issue(TokenKind::ChangeEmail, user_id, Some(new_email), ttl_secs)
}

/// Move `user_id` to the address carried by `token`. Fails when the address
/// already belongs to another account at redemption time.
pub fn change_email(
    tx: &Transaction<'_>,
    signer: &TokenSigner,
    user_id: &str,
    token: &str,
) -> AppResult<bool> {
    let Some(verified) = signer.verify(token, TokenKind::ChangeEmail) else {
        return Ok(false);
    };
    if verified.subject != user_id {
        return Ok(false);
    }
    let Some(new_email) = verified.payload else {
        return Ok(false);
    };
    if let Some(holder) = get_user_by_email(tx, &new_email)? {
        if holder.id != user_id {
            return Ok(false);
        }
    }

    let result = tx.execute(
        "UPDATE users SET email = ?1, avatar_hash = ?2 WHERE id = ?3",
        params![new_email, gravatar_hash(&new_email), user_id],
    );
    match result {
        Ok(updated) => Ok(updated == 1),
        Err(e) => match conflict_on_unique(e, "") {
            AppError::Conflict(_) => Ok(false),
            other => Err(other),
        },
    }
}

pub fn generate_auth_token(signer: &TokenSigner, user_id: &str, ttl_secs: u64) -> AppResult<String> {
    signer.issue(TokenKind::Auth, user_id, None, ttl_secs)
}

pub fn verify_auth_token(
    conn: &Connection,
    signer: &TokenSigner,
    token: &str,
) -> AppResult<Option<User>> {
    let Some(verified) = signer.verify(token, TokenKind::Auth) else {
        return Ok(None);
    };
    Ok(get_user(conn, &verified.subject)?.filter(|u| !u.server_own))
}

/// Refresh `last_seen`.
pub fn ping(conn: &Connection, user_id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET last_seen = datetime('now') WHERE id = ?1",
        params![user_id],
    )?;
    Ok(())
}

pub fn gravatar_hash(email: &str) -> String {
    hex::encode(Md5::digest(email.trim().to_lowercase().as_bytes()))
}

pub fn gravatar_url(user: &User, size: u32, default: &str, rating: &str) -> String {
    let hash = user
        .avatar_hash
        .clone()
        .unwrap_or_else(|| gravatar_hash(&user.email));
    format!(
        "https://secure.gravatar.com/avatar/{}?s={}&d={}&r={}",
        hash, size, default, rating
    )
}

fn clean_field(value: &Option<String>) -> AppResult<Option<String>> {
    let cleaned = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Ok(cleaned)
}

fn check_len(value: &Option<String>, label: &str) -> AppResult<()> {
    match value {
        Some(v) if v.chars().count() > MAX_FIELD_LEN => Err(AppError::BadRequest(format!(
            "{} must be {} characters or less",
            label, MAX_FIELD_LEN
        ))),
        _ => Ok(()),
    }
}

pub fn update_profile(conn: &Connection, user_id: &str, profile: &ProfileUpdate) -> AppResult<()> {
    let name = clean_field(&profile.name)?;
    let location = clean_field(&profile.location)?;
    let about_me = clean_field(&profile.about_me)?;
    check_len(&name, "Name")?;
    check_len(&location, "Location")?;

    let updated = conn.execute(
        "UPDATE users SET name = ?1, location = ?2, about_me = ?3 WHERE id = ?4",
        params![name, location, about_me, user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

pub fn admin_update_user(
    tx: &Transaction<'_>,
    actor: &impl Principal,
    user_id: &str,
    update: &AdminUpdate,
) -> AppResult<User> {
    if !actor.is_administrator() {
        return Err(AppError::Forbidden);
    }
    let user = require_user(tx, user_id)?;
    let email = update.email.trim();
    let username = update.username.trim();
    validate_email(email)?;
    validate_username(username)?;

    if email != user.email && get_user_by_email(tx, email)?.is_some() {
        return Err(AppError::Conflict("Email already registered.".into()));
    }
    if username != user.username && get_user_by_username(tx, username)?.is_some() {
        return Err(AppError::Conflict("Username already in use.".into()));
    }
    if permissions::role_by_id(tx, update.role_id)?.is_none() {
        return Err(AppError::BadRequest("Unknown role.".into()));
    }

    tx.execute(
        "UPDATE users SET email = ?1, username = ?2, confirmed = ?3, role_id = ?4, avatar_hash = ?5
         WHERE id = ?6",
        params![
            email,
            username,
            update.confirmed,
            update.role_id,
            gravatar_hash(email),
            user_id
        ],
    )
    .map_err(|e| conflict_on_unique(e, "Email or username already in use."))?;
    update_profile(tx, user_id, &update.profile)?;

    tracing::info!(user_id, "Account updated by administrator");
    require_user(tx, user_id)
}

/// Create (or adopt) the server-owned placeholder account.
pub fn create_deleted_user(tx: &Transaction<'_>) -> AppResult<User> {
    if let Some(user) = get_user_by_username(tx, DELETED_USERNAME)? {
        if !user.server_own {
            tx.execute(
                "UPDATE users SET server_own = 1 WHERE id = ?1",
                params![user.id],
            )?;
        }
        return require_user(tx, &user.id);
    }

    let role = permissions::default_role(tx)?;
    let id = crate::db::new_id();
    tx.execute(
        "INSERT INTO users (id, email, username, password_hash, role_id, server_own)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![
            id,
            DELETED_EMAIL,
            DELETED_USERNAME,
            password::UNUSABLE_HASH,
            role.id
        ],
    )?;
    social::follow(tx, &id, &id)?;

    tracing::info!("Created deleted-user placeholder");
    require_user(tx, &id)
}

pub fn deleted_user(conn: &Connection) -> AppResult<User> {
    get_user_by_username(conn, DELETED_USERNAME)?
        .filter(|u| u.server_own)
        .ok_or_else(|| {
            AppError::Internal("Deleted-user placeholder missing; run the deploy task".into())
        })
}

/// Users holding `role_id`, newest username first.
pub fn users_with_role(
    conn: &Connection,
    role_id: i64,
    page: u32,
    per_page: u32,
) -> AppResult<Page<User>> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role_id = ?1",
        params![role_id],
        |r| r.get(0),
    )?;
    let (limit, offset) = bounds(page, per_page);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE role_id = ?1 ORDER BY username DESC LIMIT ?2 OFFSET ?3",
        User::COLUMNS
    ))?;
    let items = stmt
        .query_map(params![role_id, limit, offset], User::from_row)?
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
    use crate::auth::permissions::{insert_roles, role_by_name, Permission, MODERATOR_ROLE};
    use crate::db;
    use crate::extractors::CurrentUser;
    use crate::state::DbPool;

    fn pool() -> DbPool {
        let pool = db::create_memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        db::transaction(&pool, |tx| insert_roles(tx)).unwrap();
        pool
    }

    fn register(pool: &DbPool, email: &str, username: &str, pw: &str) -> User {
        let reg = Registration {
            email: email.into(),
            username: username.into(),
            password: pw.into(),
        };
        db::transaction(pool, |tx| create_user(tx, &reg, Some("admin@example.com"))).unwrap()
    }

    fn signer() -> TokenSigner {
        TokenSigner::new(b"accounts-test")
    }

    #[test]
    fn new_user_gets_default_role_and_self_follow() {
        let pool = pool();
        let u = register(&pool, "john@example.com", "john", "cat");
        let conn = pool.get().unwrap();
        let principal = CurrentUser::load(&conn, &u.id).unwrap().unwrap();
        assert!(principal.can(Permission::FOLLOW));
        assert!(principal.can(Permission::COMMENT));
        assert!(principal.can(Permission::WRITE));
        assert!(!principal.can(Permission::MODERATE));
        assert!(!principal.can(Permission::ADMIN));
        assert!(social::is_following(&conn, &u.id, &u.id).unwrap());
        assert!(!u.confirmed);
    }

    #[test]
    fn admin_email_gets_administrator_role() {
        let pool = pool();
        let u = register(&pool, "Admin@Example.com", "boss", "cat");
        let conn = pool.get().unwrap();
        let principal = CurrentUser::load(&conn, &u.id).unwrap().unwrap();
        assert!(principal.is_administrator());
    }

    #[test]
    fn password_is_hashed_and_verifiable() {
        let pool = pool();
        let u = register(&pool, "a@example.com", "a", "cat");
        assert_ne!(u.password_hash, "cat");
        assert!(verify_password(&u, "cat"));
        assert!(!verify_password(&u, "dog"));
    }

    #[test]
    fn duplicate_email_and_username_are_conflicts() {
        let pool = pool();
        register(&pool, "a@example.com", "a", "cat");

        let dup_email = Registration {
            email: "a@example.com".into(),
            username: "b".into(),
            password: "x".into(),
        };
        let err = db::transaction(&pool, |tx| create_user(tx, &dup_email, None)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let dup_name = Registration {
            email: "b@example.com".into(),
            username: "a".into(),
            password: "x".into(),
        };
        let err = db::transaction(&pool, |tx| create_user(tx, &dup_name, None)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn invalid_registration_is_rejected() {
        assert!(validate_username("1abc").is_err());
        assert!(validate_username("ab cd").is_err());
        assert!(validate_username("ab_c.d9").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@b.io").is_ok());
    }

    #[test]
    fn authenticate_checks_password() {
        let pool = pool();
        register(&pool, "a@example.com", "a", "cat");
        let conn = pool.get().unwrap();
        assert!(authenticate(&conn, "a@example.com", "cat").unwrap().is_some());
        assert!(authenticate(&conn, "a@example.com", "dog").unwrap().is_none());
        assert!(authenticate(&conn, "z@example.com", "cat").unwrap().is_none());
    }

    #[test]
    fn confirmation_token_confirms_its_own_user_only() {
        let pool = pool();
        let s = signer();
        let u1 = register(&pool, "a@example.com", "a", "cat");
        let u2 = register(&pool, "b@example.com", "b", "dog");
        let token = generate_confirmation_token(&s, &u1.id, TOKEN_TTL_SECS).unwrap();

        assert!(!db::transaction(&pool, |tx| confirm(tx, &s, &u2.id, &token)).unwrap());
        assert!(db::transaction(&pool, |tx| confirm(tx, &s, &u1.id, &token)).unwrap());

        let conn = pool.get().unwrap();
        assert!(require_user(&conn, &u1.id).unwrap().confirmed);
        assert!(!require_user(&conn, &u2.id).unwrap().confirmed);
    }

    #[test]
    fn confirmation_token_can_be_replayed() {
        let pool = pool();
        let s = signer();
        let u = register(&pool, "a@example.com", "a", "cat");
        let token = generate_confirmation_token(&s, &u.id, TOKEN_TTL_SECS).unwrap();
        assert!(db::transaction(&pool, |tx| confirm(tx, &s, &u.id, &token)).unwrap());
        assert!(db::transaction(&pool, |tx| confirm(tx, &s, &u.id, &token)).unwrap());
    }

    #[test]
    fn valid_reset_token_sets_password() {
        let pool = pool();
        let s = signer();
        let u = register(&pool, "a@example.com", "a", "cat");
        let token = generate_reset_token(&s, &u.id, TOKEN_TTL_SECS).unwrap();
        assert!(db::transaction(&pool, |tx| reset_password(tx, &s, &token, "dog")).unwrap());

        let conn = pool.get().unwrap();
        assert!(verify_password(&require_user(&conn, &u.id).unwrap(), "dog"));
    }

    #[test]
    fn tampered_reset_token_changes_nothing() {
        let pool = pool();
        let s = signer();
        let u = register(&pool, "a@example.com", "a", "bat");
        let token = generate_reset_token(&s, &u.id, TOKEN_TTL_SECS).unwrap();
        let bad = format!("{}a", token);
        assert!(!db::transaction(&pool, |tx| reset_password(tx, &s, &bad, "horse")).unwrap());

        let conn = pool.get().unwrap();
        assert!(verify_password(&require_user(&conn, &u.id).unwrap(), "bat"));
    }

    #[test]
    fn email_change_token_moves_address_and_avatar() {
        let pool = pool();
        let s = signer();
        let u = register(&pool, "example@example.com", "a", "cat");
        let token =
            generate_email_change_token(&s, &u.id, "susan@example.com", TOKEN_TTL_SECS).unwrap();
        assert!(db::transaction(&pool, |tx| change_email(tx, &s, &u.id, &token)).unwrap());

        let conn = pool.get().unwrap();
        let updated = require_user(&conn, &u.id).unwrap();
        assert_eq!(updated.email, "susan@example.com");
        assert_eq!(updated.avatar_hash, Some(gravatar_hash("susan@example.com")));
    }

    #[test]
    fn email_change_token_for_other_user_fails() {
        let pool = pool();
        let s = signer();
        let u1 = register(&pool, "example2@example.com", "a", "cat");
        let u2 = register(&pool, "susan@example.com", "b", "dog");
        let token =
            generate_email_change_token(&s, &u1.id, "david@example.net", TOKEN_TTL_SECS).unwrap();
        assert!(!db::transaction(&pool, |tx| change_email(tx, &s, &u2.id, &token)).unwrap());

        let conn = pool.get().unwrap();
        assert_eq!(require_user(&conn, &u2.id).unwrap().email, "susan@example.com");
    }

    #[test]
    fn email_change_to_taken_address_fails() {
        let pool = pool();
        let s = signer();
        register(&pool, "john@example.com", "a", "cat");
        let u2 = register(&pool, "susan@example.com", "b", "dog");
        let token =
            generate_email_change_token(&s, &u2.id, "john@example.com", TOKEN_TTL_SECS).unwrap();
        assert!(!db::transaction(&pool, |tx| change_email(tx, &s, &u2.id, &token)).unwrap());

        let conn = pool.get().unwrap();
        assert_eq!(require_user(&conn, &u2.id).unwrap().email, "susan@example.com");
    }

    #[test]
    fn auth_token_resolves_user() {
        let pool = pool();
        let s = signer();
        let u = register(&pool, "a@example.com", "a", "cat");
        let token = generate_auth_token(&s, &u.id, 3600).unwrap();
        let conn = pool.get().unwrap();
        let found = verify_auth_token(&conn, &s, &token).unwrap().unwrap();
        assert_eq!(found.id, u.id);
        assert!(verify_auth_token(&conn, &s, "junk").unwrap().is_none());
    }

    #[test]
    fn change_password_requires_current_password() {
        let pool = pool();
        let u = register(&pool, "a@example.com", "a", "cat");
        let err = db::transaction(&pool, |tx| change_password(tx, &u.id, "dog", "new")).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        db::transaction(&pool, |tx| change_password(tx, &u.id, "cat", "new")).unwrap();

        let conn = pool.get().unwrap();
        assert!(verify_password(&require_user(&conn, &u.id).unwrap(), "new"));
    }

    #[test]
    fn gravatar_url_uses_md5_of_email() {
        let pool = pool();
        let u = register(&pool, "john@example.com", "john", "cat");
        let url = gravatar_url(&u, 100, "identicon", "g");
        assert!(url.starts_with(
            "https://secure.gravatar.com/avatar/d4c74594d841139328695756648b6bd6"
        ));
        assert!(gravatar_url(&u, 256, "identicon", "g").contains("s=256"));
        assert!(gravatar_url(&u, 100, "identicon", "pg").contains("r=pg"));
        assert!(gravatar_url(&u, 100, "retro", "g").contains("d=retro"));
    }

    #[test]
    fn timestamps_are_set_and_ping_advances_last_seen() {
        let pool = pool();
        let u = register(&pool, "a@example.com", "a", "cat");
        assert!(!u.member_since.is_empty());
        std::thread::sleep(std::time::Duration::from_millis(1100));

        let conn = pool.get().unwrap();
        ping(&conn, &u.id).unwrap();
        let after = require_user(&conn, &u.id).unwrap();
        assert!(after.last_seen > u.last_seen);
    }

    #[test]
    fn profile_fields_are_trimmed_and_blank_cleared() {
        let pool = pool();
        let u = register(&pool, "a@example.com", "a", "cat");
        let conn = pool.get().unwrap();
        let update = ProfileUpdate {
            name: Some("  Ann ".into()),
            location: Some("".into()),
            about_me: Some("hi".into()),
        };
        update_profile(&conn, &u.id, &update).unwrap();
        let after = require_user(&conn, &u.id).unwrap();
        assert_eq!(after.name.as_deref(), Some("Ann"));
        assert_eq!(after.location, None);
        assert_eq!(after.about_me.as_deref(), Some("hi"));
    }

    #[test]
    fn admin_update_requires_administrator() {
        let pool = pool();
        let admin = register(&pool, "admin@example.com", "root", "cat");
        let u = register(&pool, "a@example.com", "a", "cat");
        let moderator_id = role_by_name(&pool.get().unwrap(), MODERATOR_ROLE)
            .unwrap()
            .unwrap()
            .id;
        let update = AdminUpdate {
            email: "a2@example.com".into(),
            username: "a2".into(),
            confirmed: true,
            role_id: moderator_id,
            profile: ProfileUpdate::default(),
        };

        let plain = CurrentUser::load(&pool.get().unwrap(), &u.id).unwrap().unwrap();
        let err = db::transaction(&pool, |tx| admin_update_user(tx, &plain, &u.id, &update))
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));

        let root = CurrentUser::load(&pool.get().unwrap(), &admin.id).unwrap().unwrap();
        let updated =
            db::transaction(&pool, |tx| admin_update_user(tx, &root, &u.id, &update)).unwrap();
        assert_eq!(updated.username, "a2");
        assert!(updated.confirmed);
        assert_eq!(updated.role_id, Some(moderator_id));
    }

    #[test]
    fn deleted_user_is_server_owned_and_cannot_log_in() {
        let pool = pool();
        let first = db::transaction(&pool, |tx| create_deleted_user(tx)).unwrap();
        let second = db::transaction(&pool, |tx| create_deleted_user(tx)).unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.server_own);

        let conn = pool.get().unwrap();
        assert_eq!(deleted_user(&conn).unwrap().id, first.id);
        assert!(authenticate(&conn, DELETED_EMAIL, "None").unwrap().is_none());
    }

    #[test]
    fn reserved_username_cannot_be_registered() {
        let pool = pool();
        let reg = Registration {
            email: "x@example.com".into(),
            username: DELETED_USERNAME.into(),
            password: "pw".into(),
        };
        let err = db::transaction(&pool, |tx| create_user(tx, &reg, None)).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
