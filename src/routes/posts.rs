use askama::Template;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::permissions::{Permission, Principal};
use crate::content::comments::{self, CommentOrder};
use crate::content::{self, posts};
use crate::db;
use crate::db::pagination::{PageLinks, PageQuery};
use crate::error::{AppError, AppResult};
use crate::extractors::{ConfirmedUser, CurrentUser, MaybeUser};
use crate::routes::form_page::{FormField, FormPage};
use crate::routes::home::{preference_enabled, set_preference, Html, PostForm};
use crate::routes::views::{self, CommentCard, Nav, PostCard};
use crate::state::AppState;
use crate::votes::{self, VoteState, VoteTarget};

pub const TOP_COMMENTS_COOKIE: &str = "top_comments";

#[derive(Template)]
#[template(path = "pages/post.html")]
pub struct PostTemplate {
    pub nav: Nav,
    pub title: String,
    pub post_id: String,
    pub posts: Vec<PostCard>,
    pub comments: Vec<CommentCard>,
    pub can_comment: bool,
    pub top_comments: bool,
    pub moderating: bool,
    pub error: Option<String>,
    pub links: PageLinks,
}

#[derive(Deserialize)]
pub struct CommentForm {
    pub body: String,
}

/// `?page=-1` jumps to the last page of comments.
#[derive(Deserialize, Default)]
pub struct CommentPageQuery {
    pub page: Option<i64>,
}

fn render_post_page(
    state: &AppState,
    viewer: Option<&CurrentUser>,
    headers: &HeaderMap,
    id: &str,
    page: Option<i64>,
    error: Option<String>,
) -> AppResult<Html<PostTemplate>> {
    let conn = state.db.get()?;
    let post = posts::require_post(&conn, id)?;
    let per_page = state.config.pagination.comments_per_page;
    let page = match page {
        Some(-1) => comments::last_page(&conn, id, per_page)?,
        other => PageQuery { page: other }.number(),
    };
    let top_comments = preference_enabled(headers, TOP_COMMENTS_COOKIE);
    let order = if top_comments {
        CommentOrder::Top
    } else {
        CommentOrder::Newest
    };

    let mut listing = comments::post_comments(&conn, id, order, page, per_page)?;
    let links = PageLinks::for_page(&listing, &format!("/post/{}", id));
    let comment_cards = views::comment_cards(&conn, &mut listing, viewer)?;

    let title = post.title.clone();
    let card = views::PostCard::build(&conn, content::summarize(&conn, post)?, viewer)?;
    Ok(Html(PostTemplate {
        nav: Nav::for_user(viewer),
        title,
        post_id: id.to_string(),
        posts: vec![card],
        comments: comment_cards,
        can_comment: viewer.is_some_and(|u| u.can(Permission::COMMENT)),
        top_comments,
        moderating: false,
        error,
        links,
    }))
}

pub async fn show_post(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<CommentPageQuery>,
) -> AppResult<Html<PostTemplate>> {
    render_post_page(&state, maybe_user.0.as_ref(), &headers, &id, query.page, None)
}

pub async fn add_comment(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let created = db::transaction(&state.db, |tx| {
        comments::create_comment(tx, &user, &id, &form.body)
    });
    match created {
        Ok(comment) => {
            Ok(Redirect::to(&format!("/post/{}?page=-1#{}", id, comment.id)).into_response())
        }
        Err(e) => match e.user_message() {
            Some(message) => Ok(render_post_page(
                &state,
                Some(&user),
                &headers,
                &id,
                None,
                Some(message.to_string()),
            )?
            .into_response()),
            None => Err(e),
        },
    }
}

fn edit_post_page(nav: Nav, id: &str, title: &str, body: &str) -> FormPage {
    FormPage::new(nav, "Edit Post", &format!("/edit/{}", id))
        .field(FormField::text("title", "Title", title))
        .field(FormField::textarea("body", "What's on your mind?", body))
}

pub async fn edit_post_form(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Html<FormPage>> {
    let conn = state.db.get()?;
    let post = posts::require_post(&conn, &id)?;
    if !(post.is_authored_by(&user.id) || user.can(Permission::ADMIN)) || !post.editable {
        return Err(AppError::Forbidden);
    }
    Ok(Html(edit_post_page(
        Nav::for_user(Some(&user)),
        &id,
        &post.title,
        &post.body,
    )))
}

pub async fn edit_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<PostForm>,
) -> AppResult<Response> {
    let updated = db::transaction(&state.db, |tx| {
        posts::update_post(tx, &user, &id, &form.title, &form.body)
    });
    match updated {
        Ok(post) => Ok(Redirect::to(&format!("/post/{}", post.id)).into_response()),
        Err(e) => match e.user_message() {
            Some(message) => {
                let page = edit_post_page(Nav::for_user(Some(&user)), &id, &form.title, &form.body)
                    .with_error(Some(message.to_string()));
                Ok(Html(page).into_response())
            }
            None => Err(e),
        },
    }
}

fn edit_comment_page(nav: Nav, post_id: &str, id: &str, body: &str) -> FormPage {
    FormPage::new(
        nav,
        "Edit Comment",
        &format!("/post/{}/comments/{}", post_id, id),
    )
    .field(FormField::textarea("body", "Enter your comment", body))
}

pub async fn edit_comment_form(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, id)): Path<(String, String)>,
) -> AppResult<Html<FormPage>> {
    let conn = state.db.get()?;
    let comment = comments::require_comment(&conn, &id)?;
    if comment.post_id != post_id {
        return Err(AppError::NotFound);
    }
    if !(comment.author_id == user.id || user.can(Permission::ADMIN)) || !comment.editable {
        return Err(AppError::Forbidden);
    }
    Ok(Html(edit_comment_page(
        Nav::for_user(Some(&user)),
        &post_id,
        &id,
        &comment.body,
    )))
}

pub async fn edit_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((post_id, id)): Path<(String, String)>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let updated = db::transaction(&state.db, |tx| {
        let comment = comments::require_comment(tx, &id)?;
        if comment.post_id != post_id {
            return Err(AppError::NotFound);
        }
        comments::update_comment(tx, &user, &id, &form.body)
    });
    match updated {
        Ok(comment) => {
            Ok(Redirect::to(&format!("/post/{}#{}", comment.post_id, comment.id)).into_response())
        }
        Err(e) => match e.user_message() {
            Some(message) => {
                let page = edit_comment_page(Nav::for_user(Some(&user)), &post_id, &id, &form.body)
                    .with_error(Some(message.to_string()));
                Ok(Html(page).into_response())
            }
            None => Err(e),
        },
    }
}

pub async fn newest_comments(Path(id): Path<String>) -> Response {
    set_preference(TOP_COMMENTS_COOKIE, false, &format!("/post/{}", id))
}

pub async fn top_comments(Path(id): Path<String>) -> Response {
    set_preference(TOP_COMMENTS_COOKIE, true, &format!("/post/{}", id))
}

/// Same-site page the request came from, or `fallback`.
fn back_to(headers: &HeaderMap, fallback: &str) -> String {
    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(|r| {
            let path_start = r.find("://").map(|i| i + 3)?;
            r[path_start..].find('/').map(|i| r[path_start + i..].to_string())
        })
        .unwrap_or_else(|| fallback.to_string())
}

pub async fn delete_post(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Redirect> {
    db::transaction(&state.db, |tx| posts::delete_post(tx, &user, &id))?;
    Ok(Redirect::to(&back_to(&headers, "/")))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Redirect> {
    let comment = db::transaction(&state.db, |tx| comments::delete_comment(tx, &user, &id))?;
    Ok(Redirect::to(&back_to(
        &headers,
        &format!("/post/{}", comment.post_id),
    )))
}

#[derive(Deserialize)]
pub struct VoteRequest {
    pub id: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct VoteResponse {
    pub id: serde_json::Value,
    pub data: i64,
    pub status: Option<VoteState>,
}

fn press(
    state: &AppState,
    user: &CurrentUser,
    kind: &str,
    id: &str,
    direction: VoteState,
) -> AppResult<(VoteTarget, votes::VoteOutcome)> {
    let target = VoteTarget::parse(kind, id)?;
    let outcome = db::transaction(&state.db, |tx| votes::toggle(tx, &user.id, &target, direction))?;
    Ok((target, outcome))
}

fn post_page_of(state: &AppState, target: &VoteTarget) -> AppResult<String> {
    let post_id = match target {
        VoteTarget::Post(id) => id.clone(),
        VoteTarget::Comment(id) => {
            let conn = state.db.get()?;
            comments::require_comment(&conn, id)?.post_id
        }
    };
    Ok(format!("/post/{}", post_id))
}

fn vote_json(target: &VoteTarget, body: &Bytes, outcome: votes::VoteOutcome) -> Json<VoteResponse> {
    let echoed = serde_json::from_slice::<VoteRequest>(body)
        .ok()
        .and_then(|req| req.id)
        .unwrap_or_else(|| serde_json::Value::String(target.id().to_string()));
    Json(VoteResponse {
        id: echoed,
        data: outcome.vote_count,
        status: outcome.status,
    })
}

pub async fn upvote_redirect(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Redirect> {
    let (target, _) = press(&state, &user, &kind, &id, VoteState::Up)?;
    Ok(Redirect::to(&post_page_of(&state, &target)?))
}

pub async fn downvote_redirect(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path((kind, id)): Path<(String, String)>,
) -> AppResult<Redirect> {
    let (target, _) = press(&state, &user, &kind, &id, VoteState::Down)?;
    Ok(Redirect::to(&post_page_of(&state, &target)?))
}

pub async fn upvote_json(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path((kind, id)): Path<(String, String)>,
    body: Bytes,
) -> AppResult<Json<VoteResponse>> {
    let (target, outcome) = press(&state, &user, &kind, &id, VoteState::Up)?;
    Ok(vote_json(&target, &body, outcome))
}

pub async fn downvote_json(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path((kind, id)): Path<(String, String)>,
    body: Bytes,
) -> AppResult<Json<VoteResponse>> {
    let (target, outcome) = press(&state, &user, &kind, &id, VoteState::Down)?;
    Ok(vote_json(&target, &body, outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post/{id}", get(show_post).post(add_comment))
        .route("/post/{id}/new-comment", get(newest_comments))
        .route("/post/{id}/top-comments", get(top_comments))
        .route(
            "/post/{id}/comments/{comment_id}",
            get(edit_comment_form).post(edit_comment),
        )
        .route("/edit/{id}", get(edit_post_form).post(edit_post))
        .route("/delete/post/{id}", post(delete_post))
        .route("/delete/comment/{id}", post(delete_comment))
        .route(
            "/upvote/{kind}/{id}",
            get(upvote_redirect).post(upvote_json),
        )
        .route(
            "/downvote/{kind}/{id}",
            get(downvote_redirect).post(downvote_json),
        )
}
