use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::accounts;
use crate::auth::permissions::{AnonymousUser, Permission, Principal};
use crate::auth::session;
use crate::auth::tokens::TokenKind;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub confirmed: bool,
    /// Mask of the user's role; `None` if the account has no role.
    pub permissions: Option<Permission>,
}

impl CurrentUser {
    /// Load a loginable account with its role mask.
    pub fn load(conn: &Connection, user_id: &str) -> AppResult<Option<Self>> {
        let user = conn
            .query_row(
                "SELECT u.id, u.username, u.email, u.confirmed, r.permissions
                 FROM users u LEFT JOIN roles r ON r.id = u.role_id
                 WHERE u.id = ?1 AND u.server_own = 0",
                params![user_id],
                |row| {
                    Ok(CurrentUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        confirmed: row.get(3)?,
                        permissions: row.get::<_, Option<u32>>(4)?.map(Permission::from_bits),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}

impl Principal for CurrentUser {
    fn role_permissions(&self) -> Option<Permission> {
        self.permissions
    }
}

/// Extractor that requires authentication, by session cookie or by an
/// `Authorization: Bearer` auth token. Returns 401 otherwise.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let conn = state.db.get()?;

        let mut user_id = match cookie_value(&parts.headers, &state.config.auth.cookie_name) {
            Some(token) => session::session_user(&conn, token)?,
            None => None,
        };
        if user_id.is_none() {
            user_id = bearer_token(&parts.headers)
                .and_then(|token| state.signer.verify(token, TokenKind::Auth))
                .map(|verified| verified.subject);
        }

        let user_id = user_id.ok_or(AppError::Unauthorized)?;
        let user = CurrentUser::load(&conn, &user_id)?.ok_or(AppError::Unauthorized)?;

        if let Err(e) = accounts::ping(&conn, &user.id) {
            tracing::warn!(user_id = %user.id, "Could not update last_seen: {}", e);
        }
        Ok(user)
    }
}

/// Optional user extractor: returns None instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|u| u.id.as_str())
    }
}

impl Principal for MaybeUser {
    fn role_permissions(&self) -> Option<Permission> {
        match &self.0 {
            Some(user) => user.role_permissions(),
            None => AnonymousUser.role_permissions(),
        }
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(AppError::Unauthorized) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// An authenticated user who has confirmed their email address. Unconfirmed
/// users are sent to the confirmation reminder page.
pub struct ConfirmedUser(pub CurrentUser);

impl FromRequestParts<AppState> for ConfirmedUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if !user.confirmed {
            return Err(Redirect::to("/auth/unconfirmed").into_response());
        }
        Ok(ConfirmedUser(user))
    }
}

/// Value of the named cookie, if the request carries it.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name {
                Some(val)
            } else {
                None
            }
        })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
