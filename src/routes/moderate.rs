use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Redirect, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::auth::accounts;
use crate::auth::permissions::{self, Permission, Principal, MODERATOR_ROLE};
use crate::content::comments;
use crate::db;
use crate::db::pagination::{PageLinks, PageQuery};
use crate::error::{AppError, AppResult};
use crate::extractors::{ConfirmedUser, CurrentUser};
use crate::routes::home::{preference_enabled, set_preference, Html};
use crate::routes::users::UsersTemplate;
use crate::routes::views::{self, CommentCard, Nav, UserEntry};
use crate::state::AppState;

pub const RECENT_ONLY_COOKIE: &str = "comments_24h";
const RECENT_WINDOW_HOURS: u32 = 24;

#[derive(Template)]
#[template(path = "pages/moderate.html")]
pub struct ModerateTemplate {
    pub nav: Nav,
    pub recent_only: bool,
    pub comments: Vec<CommentCard>,
    pub moderating: bool,
    pub links: PageLinks,
}

fn require(user: &CurrentUser, perm: Permission) -> AppResult<()> {
    if user.can(perm) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn moderate(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<ModerateTemplate>> {
    require(&user, Permission::MODERATE)?;
    let conn = state.db.get()?;
    let recent_only = preference_enabled(&headers, RECENT_ONLY_COOKIE);
    let mut listing = comments::recent_comments(
        &conn,
        recent_only.then_some(RECENT_WINDOW_HOURS),
        query.number(),
        state.config.pagination.comments_per_page,
    )?;
    let links = PageLinks::for_page(&listing, "/moderate");
    let cards = views::comment_cards(&conn, &mut listing, Some(&user))?;
    Ok(Html(ModerateTemplate {
        nav: Nav::for_user(Some(&user)),
        recent_only,
        comments: cards,
        moderating: true,
        links,
    }))
}

fn moderate_page(query: &PageQuery) -> String {
    format!("/moderate?page={}", query.number())
}

pub async fn enable(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Redirect> {
    db::transaction(&state.db, |tx| comments::set_disabled(tx, &user, &id, false))?;
    Ok(Redirect::to(&moderate_page(&query)))
}

pub async fn disable(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Redirect> {
    db::transaction(&state.db, |tx| comments::set_disabled(tx, &user, &id, true))?;
    Ok(Redirect::to(&moderate_page(&query)))
}

pub async fn all_comments(ConfirmedUser(user): ConfirmedUser) -> AppResult<Response> {
    require(&user, Permission::MODERATE)?;
    Ok(set_preference(RECENT_ONLY_COOKIE, false, "/moderate"))
}

pub async fn comments_24h(ConfirmedUser(user): ConfirmedUser) -> AppResult<Response> {
    require(&user, Permission::MODERATE)?;
    Ok(set_preference(RECENT_ONLY_COOKIE, true, "/moderate"))
}

/// Everyone holding the Moderator role.
pub async fn moderators(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<UsersTemplate>> {
    require(&user, Permission::ADMIN)?;
    let conn = state.db.get()?;
    let role = permissions::role_by_name(&conn, MODERATOR_ROLE)?
        .ok_or_else(|| AppError::Internal("Moderator role missing; run the deploy task".into()))?;
    let listing = accounts::users_with_role(
        &conn,
        role.id,
        query.number(),
        state.config.pagination.followers_per_page,
    )?;
    let links = PageLinks::for_page(&listing, "/moderate/mods");
    Ok(Html(UsersTemplate {
        nav: Nav::for_user(Some(&user)),
        heading: "Moderators".to_string(),
        since_label: "Member since",
        entries: listing.items.into_iter().map(UserEntry::from_user).collect(),
        links,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/moderate", get(moderate))
        .route("/moderate/enable/{id}", post(enable))
        .route("/moderate/disable/{id}", post(disable))
        .route("/moderate/all_comments", get(all_comments))
        .route("/moderate/comments_24h", get(comments_24h))
        .route("/moderate/mods", get(moderators))
}
