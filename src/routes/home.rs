use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::permissions::{Permission, Principal};
use crate::content::posts;
use crate::db;
use crate::db::pagination::{PageLinks, PageQuery};
use crate::error::AppResult;
use crate::extractors::{cookie_value, ConfirmedUser, CurrentUser, MaybeUser};
use crate::routes::views::{self, Nav, PostCard};
use crate::social;
use crate::state::AppState;
use crate::votes;

pub const SHOW_FOLLOWED_COOKIE: &str = "show_followed";
const PREFERENCE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

#[derive(Template)]
#[template(path = "pages/index.html")]
pub struct IndexTemplate {
    pub nav: Nav,
    pub can_write: bool,
    pub error: Option<String>,
    pub title: String,
    pub body: String,
    pub show_followed: bool,
    pub posts: Vec<PostCard>,
    pub links: PageLinks,
}

/// A titled list of posts.
#[derive(Template)]
#[template(path = "pages/posts.html")]
pub struct PostsTemplate {
    pub nav: Nav,
    pub heading: String,
    pub posts: Vec<PostCard>,
    pub links: PageLinks,
}

#[derive(Deserialize)]
pub struct PostForm {
    pub title: String,
    pub body: String,
}

/// Cookie remembering a two-way listing preference for 30 days. An empty
/// value means off.
pub fn preference_cookie(name: &str, on: bool) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; SameSite=Lax",
        name,
        if on { "1" } else { "" },
        PREFERENCE_MAX_AGE_SECS
    )
}

pub fn preference_enabled(headers: &HeaderMap, name: &str) -> bool {
    cookie_value(headers, name).is_some_and(|v| !v.is_empty())
}

pub fn set_preference(name: &str, on: bool, redirect_to: &str) -> Response {
    (
        [(header::SET_COOKIE, preference_cookie(name, on))],
        Redirect::to(redirect_to),
    )
        .into_response()
}

fn render_index(
    state: &AppState,
    conn: &Connection,
    viewer: Option<&CurrentUser>,
    headers: &HeaderMap,
    page: u32,
    draft: Option<(PostForm, String)>,
) -> AppResult<Html<IndexTemplate>> {
    let per_page = state.config.pagination.posts_per_page;
    let show_followed = viewer.is_some() && preference_enabled(headers, SHOW_FOLLOWED_COOKIE);
    let mut listing = match viewer {
        Some(user) if show_followed => social::followed_posts(conn, &user.id, page, per_page)?,
        _ => posts::list_posts(conn, page, per_page)?,
    };
    let links = PageLinks::for_page(&listing, "/");
    let cards = views::post_cards(conn, &mut listing, viewer)?;

    let (title, body, error) = match draft {
        Some((form, error)) => (form.title, form.body, Some(error)),
        None => (String::new(), String::new(), None),
    };
    Ok(Html(IndexTemplate {
        nav: Nav::for_user(viewer),
        can_write: viewer.is_some_and(|u| u.can(Permission::WRITE)),
        error,
        title,
        body,
        show_followed,
        posts: cards,
        links,
    }))
}

pub async fn index(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<IndexTemplate>> {
    let conn = state.db.get()?;
    render_index(
        &state,
        &conn,
        maybe_user.0.as_ref(),
        &headers,
        query.number(),
        None,
    )
}

pub async fn create_post(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    headers: HeaderMap,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let created = db::transaction(&state.db, |tx| {
        posts::create_post(tx, &user, &form.title, &form.body)
    });
    match created {
        Ok(_) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            let Some(message) = e.user_message().map(str::to_string) else {
                return Err(e);
            };
            let conn = state.db.get()?;
            let page = render_index(&state, &conn, Some(&user), &headers, 1, Some((form, message)))?;
            Ok(page.into_response())
        }
    }
}

pub async fn show_all(_user: CurrentUser) -> Response {
    set_preference(SHOW_FOLLOWED_COOKIE, false, "/")
}

pub async fn show_followed(_user: CurrentUser) -> Response {
    set_preference(SHOW_FOLLOWED_COOKIE, true, "/")
}

/// Posts the viewer upvoted that someone else wrote.
pub async fn upvoted(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<PostsTemplate>> {
    let conn = state.db.get()?;
    let mut listing = votes::upvoted_posts(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.posts_per_page,
    )?;
    let links = PageLinks::for_page(&listing, "/upvoted");
    let cards = views::post_cards(&conn, &mut listing, Some(&user))?;
    Ok(Html(PostsTemplate {
        nav: Nav::for_user(Some(&user)),
        heading: "Upvoted posts".to_string(),
        posts: cards,
        links,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index).post(create_post))
        .route("/all", get(show_all))
        .route("/followed", get(show_followed))
        .route("/upvoted", get(upvoted))
}
