//! JSON API under `/api/v1`.
//!
//! Reads are public. Writes need a confirmed account, authenticated either by
//! session cookie or by an `Authorization: Bearer` token from `POST /tokens`.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::accounts;
use crate::auth::permissions::{Permission, Principal};
use crate::content::comments::{self, CommentOrder};
use crate::content::posts;
use crate::db;
use crate::db::models::{Comment, Post, User};
use crate::db::pagination::{Page, PageLinks, PageQuery};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::social::{self, FollowEntry};
use crate::state::AppState;
use crate::votes::{self, VoteState, VoteTarget};

const BASE: &str = "/api/v1";

/// [`AppError`] rendered as `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.0.status_and_message();
        let error = status
            .canonical_reason()
            .unwrap_or("error")
            .to_ascii_lowercase();
        (status, Json(json!({ "error": error, "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn confirmed(user: &CurrentUser) -> ApiResult<()> {
    if user.confirmed {
        Ok(())
    } else {
        Err(AppError::Forbidden.into())
    }
}

#[derive(Serialize)]
pub struct PostJson {
    pub url: String,
    pub title: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: String,
    pub author_url: String,
    pub comments_url: String,
    pub comment_count: i64,
    pub vote_count: i64,
}

impl PostJson {
    fn load(conn: &Connection, post: Post) -> ApiResult<Self> {
        let comment_count = comments::comment_count(conn, &post.id)?;
        Ok(Self {
            url: format!("{}/posts/{}", BASE, post.id),
            author_url: format!("{}/users/{}", BASE, post.author_id),
            comments_url: format!("{}/posts/{}/comments", BASE, post.id),
            title: post.title,
            body: post.body,
            body_html: post.body_html,
            timestamp: post.timestamp,
            comment_count,
            vote_count: post.vote_count,
        })
    }
}

#[derive(Serialize)]
pub struct CommentJson {
    pub url: String,
    pub post_url: String,
    pub body: String,
    pub body_html: String,
    pub timestamp: String,
    pub author_url: String,
    pub vote_count: i64,
    pub disabled: bool,
}

impl From<Comment> for CommentJson {
    fn from(comment: Comment) -> Self {
        Self {
            url: format!("{}/comments/{}", BASE, comment.id),
            post_url: format!("{}/posts/{}", BASE, comment.post_id),
            author_url: format!("{}/users/{}", BASE, comment.author_id),
            body: comment.body,
            body_html: comment.body_html,
            timestamp: comment.timestamp,
            vote_count: comment.vote_count,
            disabled: comment.disabled,
        }
    }
}

#[derive(Serialize)]
pub struct UserJson {
    pub url: String,
    pub username: String,
    pub member_since: String,
    pub last_seen: String,
    pub posts_url: String,
    pub followed_posts_url: String,
    pub post_count: i64,
}

impl UserJson {
    fn load(conn: &Connection, user: User) -> ApiResult<Self> {
        Ok(Self {
            url: format!("{}/users/{}", BASE, user.id),
            posts_url: format!("{}/users/{}/posts", BASE, user.id),
            followed_posts_url: format!("{}/users/{}/timeline", BASE, user.id),
            post_count: posts::post_count_by(conn, &user.id)?,
            username: user.username,
            member_since: user.member_since,
            last_seen: user.last_seen,
        })
    }
}

/// `{"<key>": [...], "prev": ..., "next": ..., "count": N}`
fn listing<T: Serialize, U>(
    key: &str,
    items: Vec<T>,
    page: &Page<U>,
    base: &str,
) -> ApiResult<Value> {
    let links = PageLinks::for_page(page, &format!("{}{}", BASE, base));
    let mut body = json!({
        "prev": links.prev,
        "next": links.next,
        "count": page.total,
    });
    body[key] = serde_json::to_value(items).map_err(AppError::from)?;
    Ok(body)
}

fn visible_user(conn: &Connection, id: &str) -> ApiResult<User> {
    Ok(accounts::get_user(conn, id)?
        .filter(|u| !u.server_own)
        .ok_or(AppError::NotFound)?)
}

fn post_listing(conn: &Connection, page: Page<Post>, base: &str) -> ApiResult<Json<Value>> {
    let items = page
        .items
        .iter()
        .cloned()
        .map(|post| PostJson::load(conn, post))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(listing("posts", items, &page, base)?))
}

#[derive(Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

async fn issue_token(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let user = accounts::authenticate(&conn, &creds.email, &creds.password)?
        .ok_or(AppError::Unauthorized)?;
    let ttl = state.config.auth.auth_token_hours * 3600;
    let token = accounts::generate_auth_token(&state.signer, &user.id, ttl)?;
    Ok(Json(json!({ "token": token, "expiration": ttl })))
}

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let page = posts::list_posts(&conn, query.number(), state.config.pagination.posts_per_page)?;
    post_listing(&conn, page, "/posts")
}

#[derive(Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<NewPost>,
) -> ApiResult<Response> {
    confirmed(&user)?;
    let post = db::transaction(&state.db, |tx| {
        posts::create_post(tx, &user, &input.title, &input.body)
    })?;
    let conn = state.db.get()?;
    let body = PostJson::load(&conn, post)?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, body.url.clone())],
        Json(body),
    )
        .into_response())
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PostJson>> {
    let conn = state.db.get()?;
    let post = posts::require_post(&conn, &id)?;
    Ok(Json(PostJson::load(&conn, post)?))
}

#[derive(Deserialize)]
pub struct PostEdit {
    pub title: Option<String>,
    pub body: Option<String>,
}

async fn edit_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<PostEdit>,
) -> ApiResult<Json<PostJson>> {
    confirmed(&user)?;
    let post = db::transaction(&state.db, |tx| {
        let current = posts::require_post(tx, &id)?;
        let title = input.title.as_deref().unwrap_or(&current.title);
        let body = input.body.as_deref().unwrap_or(&current.body);
        posts::update_post(tx, &user, &id, title, body)
    })?;
    let conn = state.db.get()?;
    Ok(Json(PostJson::load(&conn, post)?))
}

async fn post_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    posts::require_post(&conn, &id)?;
    let page = comments::post_comments(
        &conn,
        &id,
        CommentOrder::Newest,
        query.number(),
        state.config.pagination.comments_per_page,
    )?;
    let items: Vec<CommentJson> = page.items.iter().cloned().map(CommentJson::from).collect();
    Ok(Json(listing(
        "comments",
        items,
        &page,
        &format!("/posts/{}/comments", id),
    )?))
}

#[derive(Deserialize)]
pub struct NewComment {
    pub body: String,
}

async fn create_comment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<NewComment>,
) -> ApiResult<Response> {
    confirmed(&user)?;
    let comment = db::transaction(&state.db, |tx| {
        comments::create_comment(tx, &user, &id, &input.body)
    })?;
    let body = CommentJson::from(comment);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, body.url.clone())],
        Json(body),
    )
        .into_response())
}

async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let page = comments::recent_comments(
        &conn,
        None,
        query.number(),
        state.config.pagination.comments_per_page,
    )?;
    let items: Vec<CommentJson> = page.items.iter().cloned().map(CommentJson::from).collect();
    Ok(Json(listing("comments", items, &page, "/comments")?))
}

async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CommentJson>> {
    let conn = state.db.get()?;
    Ok(Json(comments::require_comment(&conn, &id)?.into()))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserJson>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &id)?;
    Ok(Json(UserJson::load(&conn, user)?))
}

async fn user_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &id)?;
    let page = posts::user_posts(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.posts_per_page,
    )?;
    post_listing(&conn, page, &format!("/users/{}/posts", id))
}

async fn user_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &id)?;
    let page = social::followed_posts(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.posts_per_page,
    )?;
    post_listing(&conn, page, &format!("/users/{}/timeline", id))
}

#[derive(Serialize)]
struct FollowJson {
    url: String,
    username: String,
    timestamp: String,
}

impl From<FollowEntry> for FollowJson {
    fn from(entry: FollowEntry) -> Self {
        Self {
            url: format!("{}/users/{}", BASE, entry.user.id),
            username: entry.user.username,
            timestamp: entry.timestamp,
        }
    }
}

async fn user_followers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &id)?;
    let page = social::followers(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.followers_per_page,
    )?;
    let items: Vec<FollowJson> = page.items.iter().cloned().map(FollowJson::from).collect();
    Ok(Json(listing(
        "followers",
        items,
        &page,
        &format!("/users/{}/followers", id),
    )?))
}

async fn user_followed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &id)?;
    let page = social::followed(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.followers_per_page,
    )?;
    let items: Vec<FollowJson> = page.items.iter().cloned().map(FollowJson::from).collect();
    Ok(Json(listing(
        "followed",
        items,
        &page,
        &format!("/users/{}/followed", id),
    )?))
}

async fn follow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    confirmed(&user)?;
    if !user.can(Permission::FOLLOW) {
        return Err(AppError::Forbidden.into());
    }
    let conn = state.db.get()?;
    let target = visible_user(&conn, &id)?;
    social::follow(&conn, &user.id, &target.id)?;
    Ok(Json(json!({ "following": true })))
}

async fn unfollow(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    confirmed(&user)?;
    let conn = state.db.get()?;
    let target = visible_user(&conn, &id)?;
    social::unfollow(&conn, &user.id, &target.id)?;
    Ok(Json(json!({ "following": social::is_following(&conn, &user.id, &target.id)? })))
}

/// Body of the vote endpoints.
#[derive(Deserialize)]
pub struct VoteBody {
    pub obj_type: Option<String>,
}

#[derive(Serialize)]
pub struct VoteJson {
    pub status: VoteState,
    pub vote_count: i64,
}

fn vote(
    state: &AppState,
    user: &CurrentUser,
    id: String,
    body: VoteBody,
    op: fn(&Transaction<'_>, &str, &VoteTarget) -> AppResult<VoteState>,
) -> ApiResult<Json<VoteJson>> {
    confirmed(user)?;
    let kind = body
        .obj_type
        .ok_or_else(|| AppError::BadRequest("obj_type is required".into()))?;
    let target = VoteTarget::parse(&kind, id)?;
    let status = db::transaction(&state.db, |tx| op(tx, &user.id, &target))?;
    let conn = state.db.get()?;
    Ok(Json(VoteJson {
        status,
        vote_count: votes::vote_count(&conn, &target)?,
    }))
}

async fn upvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<VoteBody>,
) -> ApiResult<Json<VoteJson>> {
    vote(&state, &user, id, body, votes::upvote)
}

async fn downvote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<VoteBody>,
) -> ApiResult<Json<VoteJson>> {
    vote(&state, &user, id, body, votes::downvote)
}

async fn remove_vote(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<VoteBody>,
) -> ApiResult<Json<VoteJson>> {
    vote(&state, &user, id, body, votes::remove_vote)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tokens", post(issue_token))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}", get(get_post).put(edit_post))
        .route(
            "/posts/{id}/comments",
            get(post_comments).post(create_comment),
        )
        .route("/comments", get(list_comments))
        .route("/comments/{id}", get(get_comment))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/posts", get(user_posts))
        .route("/users/{id}/timeline", get(user_timeline))
        .route("/users/{id}/followers", get(user_followers))
        .route("/users/{id}/followed", get(user_followed))
        .route("/follow/{id}", post(follow))
        .route("/unfollow/{id}", delete(unfollow))
        .route("/upvote/{id}", post(upvote))
        .route("/downvote/{id}", post(downvote))
        .route("/remove-vote/{id}", post(remove_vote))
}
