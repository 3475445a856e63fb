use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::accounts::{self, AdminUpdate, ProfileUpdate};
use crate::auth::permissions::{self, Permission, Principal};
use crate::content::posts;
use crate::db;
use crate::db::models::User;
use crate::db::pagination::{PageLinks, PageQuery};
use crate::error::{AppError, AppResult};
use crate::extractors::{ConfirmedUser, CurrentUser, MaybeUser};
use crate::routes::form_page::{FormField, FormPage, SelectOption};
use crate::routes::home::Html;
use crate::routes::views::{self, Nav, PostCard, UserEntry};
use crate::social;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/user.html")]
pub struct UserTemplate {
    pub nav: Nav,
    pub username: String,
    pub avatar: String,
    pub name: Option<String>,
    pub location: Option<String>,
    /// Only shown to administrators.
    pub email: Option<String>,
    pub about_me: Option<String>,
    pub member_since: String,
    pub last_seen: String,
    pub post_count: i64,
    pub can_follow: bool,
    pub is_following: bool,
    pub follower_count: i64,
    pub followed_count: i64,
    pub follows_you: bool,
    pub is_self: bool,
    pub admin_edit_id: Option<String>,
    pub posts: Vec<PostCard>,
    pub links: PageLinks,
}

#[derive(Template)]
#[template(path = "pages/users.html")]
pub struct UsersTemplate {
    pub nav: Nav,
    pub heading: String,
    pub since_label: &'static str,
    pub entries: Vec<UserEntry>,
    pub links: PageLinks,
}

#[derive(Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
}

impl ProfileForm {
    fn to_update(&self) -> ProfileUpdate {
        ProfileUpdate {
            name: Some(self.name.clone()),
            location: Some(self.location.clone()),
            about_me: Some(self.about_me.clone()),
        }
    }
}

#[derive(Deserialize)]
pub struct AdminProfileForm {
    pub email: String,
    pub username: String,
    pub confirmed: Option<String>,
    pub role: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub about_me: String,
}

impl AdminProfileForm {
    fn profile(&self) -> ProfileForm {
        ProfileForm {
            name: self.name.clone(),
            location: self.location.clone(),
            about_me: self.about_me.clone(),
        }
    }
}

/// Public account by username. The server-owned placeholder has no page.
fn visible_user(conn: &Connection, username: &str) -> AppResult<User> {
    accounts::get_user_by_username(conn, username)?
        .filter(|u| !u.server_own)
        .ok_or(AppError::NotFound)
}

pub async fn user_page(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<UserTemplate>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &username)?;
    let viewer = maybe_user.0.as_ref();

    let mut listing = posts::user_posts(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.posts_per_page,
    )?;
    let links = PageLinks::for_page(&listing, &format!("/user/{}", user.username));
    let cards = views::post_cards(&conn, &mut listing, viewer)?;

    let is_self = viewer.is_some_and(|v| v.id == user.id);
    let is_admin = maybe_user.is_administrator();
    let (is_following, follows_you) = match viewer {
        Some(v) => (
            social::is_following(&conn, &v.id, &user.id)?,
            !is_self && social::is_followed_by(&conn, &v.id, &user.id)?,
        ),
        None => (false, false),
    };

    Ok(Html(UserTemplate {
        nav: Nav::for_user(viewer),
        avatar: views::avatar(&user, 256),
        email: is_admin.then(|| user.email.clone()),
        member_since: views::display_time(&user.member_since),
        last_seen: views::display_time(&user.last_seen),
        post_count: posts::post_count_by(&conn, &user.id)?,
        can_follow: !is_self && maybe_user.can(Permission::FOLLOW),
        is_following,
        follower_count: social::follower_count(&conn, &user.id)?,
        followed_count: social::followed_count(&conn, &user.id)?,
        follows_you,
        is_self,
        admin_edit_id: is_admin.then(|| user.id.clone()),
        posts: cards,
        links,
        username: user.username,
        name: user.name,
        location: user.location,
        about_me: user.about_me,
    }))
}

fn profile_fields(page: FormPage, form: &ProfileForm) -> FormPage {
    page.field(FormField::text("name", "Real name", &form.name))
        .field(FormField::text("location", "Location", &form.location))
        .field(FormField::textarea("about_me", "About me", &form.about_me))
}

fn profile_form_of(user: &User) -> ProfileForm {
    ProfileForm {
        name: user.name.clone().unwrap_or_default(),
        location: user.location.clone().unwrap_or_default(),
        about_me: user.about_me.clone().unwrap_or_default(),
    }
}

pub async fn edit_profile_form(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<Html<FormPage>> {
    let conn = state.db.get()?;
    let account = accounts::require_user(&conn, &user.id)?;
    let page = FormPage::new(Nav::for_user(Some(&user)), "Edit Your Profile", "/edit-profile");
    Ok(Html(profile_fields(page, &profile_form_of(&account))))
}

pub async fn edit_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<ProfileForm>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    match accounts::update_profile(&conn, &user.id, &form.to_update()) {
        Ok(()) => Ok(Redirect::to(&format!("/user/{}", user.username)).into_response()),
        Err(e) => match e.user_message() {
            Some(message) => {
                let page =
                    FormPage::new(Nav::for_user(Some(&user)), "Edit Your Profile", "/edit-profile")
                        .with_error(Some(message.to_string()));
                Ok(Html(profile_fields(page, &form)).into_response())
            }
            None => Err(e),
        },
    }
}

fn admin_page(
    conn: &Connection,
    nav: Nav,
    user_id: &str,
    form: &AdminProfileForm,
) -> AppResult<FormPage> {
    let roles = permissions::list_roles(conn)?
        .into_iter()
        .map(|role| SelectOption {
            selected: role.id == form.role,
            value: role.id.to_string(),
            label: role.name,
        })
        .collect();
    let page = FormPage::new(nav, "Edit Profile", &format!("/edit-profile/{}", user_id))
        .field(FormField::email("email", "Email", &form.email))
        .field(FormField::text("username", "Username", &form.username))
        .field(FormField::checkbox(
            "confirmed",
            "Confirmed",
            form.confirmed.is_some(),
        ))
        .field(FormField::select("role", "Role", roles));
    Ok(profile_fields(page, &form.profile()))
}

fn require_admin(user: &CurrentUser) -> AppResult<()> {
    if user.is_administrator() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn admin_edit_profile_form(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Html<FormPage>> {
    require_admin(&user)?;
    let conn = state.db.get()?;
    let account = accounts::get_user(&conn, &id)?
        .filter(|u| !u.server_own)
        .ok_or(AppError::NotFound)?;
    let profile = profile_form_of(&account);
    let form = AdminProfileForm {
        email: account.email,
        username: account.username,
        confirmed: account.confirmed.then(|| "on".to_string()),
        role: account.role_id.unwrap_or_default(),
        name: profile.name,
        location: profile.location,
        about_me: profile.about_me,
    };
    Ok(Html(admin_page(&conn, Nav::for_user(Some(&user)), &id, &form)?))
}

pub async fn admin_edit_profile(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<AdminProfileForm>,
) -> AppResult<Response> {
    require_admin(&user)?;
    let update = AdminUpdate {
        email: form.email.clone(),
        username: form.username.clone(),
        confirmed: form.confirmed.is_some(),
        role_id: form.role,
        profile: form.profile().to_update(),
    };
    let updated = db::transaction(&state.db, |tx| {
        accounts::admin_update_user(tx, &user, &id, &update)
    });
    match updated {
        Ok(account) => Ok(Redirect::to(&format!("/user/{}", account.username)).into_response()),
        Err(e) => match e.user_message() {
            Some(message) => {
                let conn = state.db.get()?;
                let page = admin_page(&conn, Nav::for_user(Some(&user)), &id, &form)?
                    .with_error(Some(message.to_string()));
                Ok(Html(page).into_response())
            }
            None => Err(e),
        },
    }
}

pub async fn follow(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path(username): Path<String>,
) -> AppResult<Redirect> {
    if !user.can(Permission::FOLLOW) {
        return Err(AppError::Forbidden);
    }
    let conn = state.db.get()?;
    let target = visible_user(&conn, &username)?;
    if social::follow(&conn, &user.id, &target.id)? {
        tracing::info!(follower = %user.username, followed = %target.username, "Follow");
    }
    Ok(Redirect::to(&format!("/user/{}", target.username)))
}

pub async fn unfollow(
    State(state): State<AppState>,
    ConfirmedUser(user): ConfirmedUser,
    Path(username): Path<String>,
) -> AppResult<Redirect> {
    if !user.can(Permission::FOLLOW) {
        return Err(AppError::Forbidden);
    }
    let conn = state.db.get()?;
    let target = visible_user(&conn, &username)?;
    if social::unfollow(&conn, &user.id, &target.id)? {
        tracing::info!(follower = %user.username, followed = %target.username, "Unfollow");
    }
    Ok(Redirect::to(&format!("/user/{}", target.username)))
}

pub async fn followers(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<UsersTemplate>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &username)?;
    let listing = social::followers(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.followers_per_page,
    )?;
    let links = PageLinks::for_page(&listing, &format!("/user/{}/followers", user.username));
    Ok(Html(UsersTemplate {
        nav: Nav::for_user(maybe_user.0.as_ref()),
        heading: format!("Followers of {}", user.username),
        since_label: "Since",
        entries: listing.items.into_iter().map(UserEntry::from_follow).collect(),
        links,
    }))
}

pub async fn followed_by(
    State(state): State<AppState>,
    maybe_user: MaybeUser,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> AppResult<Html<UsersTemplate>> {
    let conn = state.db.get()?;
    let user = visible_user(&conn, &username)?;
    let listing = social::followed(
        &conn,
        &user.id,
        query.number(),
        state.config.pagination.followers_per_page,
    )?;
    let links = PageLinks::for_page(&listing, &format!("/user/{}/followed_by", user.username));
    Ok(Html(UsersTemplate {
        nav: Nav::for_user(maybe_user.0.as_ref()),
        heading: format!("Followed by {}", user.username),
        since_label: "Since",
        entries: listing.items.into_iter().map(UserEntry::from_follow).collect(),
        links,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/{username}", get(user_page))
        .route("/user/{username}/followers", get(followers))
        .route("/user/{username}/followed_by", get(followed_by))
        .route("/edit-profile", get(edit_profile_form).post(edit_profile))
        .route(
            "/edit-profile/{id}",
            get(admin_edit_profile_form).post(admin_edit_profile),
        )
        .route("/follow/{username}", post(follow))
        .route("/unfollow/{username}", post(unfollow))
}
