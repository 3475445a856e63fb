use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::accounts::{self, Registration, TOKEN_TTL_SECS};
use crate::auth::session;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::extractors::{cookie_value, CurrentUser, MaybeUser};
use crate::mail::Message;
use crate::routes::form_page::{FormField, FormPage};
use crate::routes::home::Html;
use crate::routes::views::Nav;
use crate::state::AppState;

/// Sessions without "keep me logged in" last a day.
const SHORT_SESSION_HOURS: u64 = 24;

// -- Request types --

#[derive(Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
    pub remember_me: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub username: String,
    pub password: String,
    pub password2: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordForm {
    pub old_password: String,
    pub password: String,
    pub password2: String,
}

#[derive(Deserialize)]
pub struct EmailForm {
    pub email: String,
}

#[derive(Deserialize)]
pub struct NewPasswordForm {
    pub password: String,
    pub password2: String,
}

#[derive(Deserialize)]
pub struct ChangeEmailForm {
    pub email: String,
    pub password: String,
}

// -- Helpers --

/// Absolute link back to this server, for emails.
fn external_url(headers: &HeaderMap, path: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}{}", scheme, host, path)
}

/// Only same-site paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

fn passwords_match(password: &str, password2: &str) -> AppResult<()> {
    if password == password2 {
        Ok(())
    } else {
        Err(AppError::BadRequest("Passwords must match.".into()))
    }
}

/// Re-render `page` with the error when it is meant for the user, otherwise
/// propagate it.
fn form_error(page: FormPage, err: AppError) -> AppResult<Response> {
    match err.user_message() {
        Some(message) => Ok(Html(page.with_error(Some(message.to_string()))).into_response()),
        None => Err(err),
    }
}

fn send_confirmation(state: &AppState, headers: &HeaderMap, user_id: &str) -> AppResult<()> {
    let conn = state.db.get()?;
    let user = accounts::require_user(&conn, user_id)?;
    let token = accounts::generate_confirmation_token(&state.signer, &user.id, TOKEN_TTL_SECS)?;
    let link = external_url(headers, &format!("/auth/confirm/{}", token));
    state
        .mailer
        .send(&Message::confirm_account(&user.email, &user.username, &link))
}

// -- Login / logout --

fn login_page(nav: Nav, next: Option<&str>, email: &str) -> FormPage {
    let action = match next {
        Some(next) => format!("/auth/login?next={}", next),
        None => "/auth/login".to_string(),
    };
    FormPage::new(nav, "Log In", &action)
        .field(FormField::email("email", "Email", email))
        .field(FormField::password("password", "Password"))
        .field(FormField::checkbox("remember_me", "Keep me logged in", false))
        .submit("Log In")
        .link("/auth/reset", "Forgot your password?")
        .link("/auth/register", "New user? Click here to register.")
}

/// GET /auth/login
pub async fn login_form(Query(query): Query<NextQuery>) -> Html<FormPage> {
    Html(login_page(Nav::anonymous(), query.next.as_deref(), ""))
}

/// POST /auth/login: start a session. Unconfirmed accounts may log in.
pub async fn login(
    State(state): State<AppState>,
    Query(query): Query<NextQuery>,
    Form(form): Form<LoginForm>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    let Some(user) = accounts::authenticate(&conn, &form.email, &form.password)? else {
        let page = login_page(Nav::anonymous(), query.next.as_deref(), &form.email)
            .with_error(Some("Invalid email or password.".into()));
        return Ok(Html(page).into_response());
    };

    let hours = if form.remember_me.is_some() {
        state.config.auth.session_hours
    } else {
        SHORT_SESSION_HOURS
    };
    let token = session::create_session(&conn, &user.id, hours)?;
    tracing::info!(user_id = %user.id, "Logged in");

    Ok((
        AppendHeaders([(
            header::SET_COOKIE,
            session::session_cookie(&state.config.auth.cookie_name, &token, hours),
        )]),
        Redirect::to(safe_next(query.next.as_deref())),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = cookie_value(&headers, cookie_name) {
        let conn = state.db.get()?;
        session::delete_session(&conn, token)?;
    }
    Ok((
        AppendHeaders([(header::SET_COOKIE, session::clear_session_cookie(cookie_name))]),
        Redirect::to("/"),
    )
        .into_response())
}

// -- Registration and confirmation --

fn register_page(email: &str, username: &str) -> FormPage {
    FormPage::new(Nav::anonymous(), "Register", "/auth/register")
        .field(FormField::email("email", "Email", email))
        .field(FormField::text("username", "Username", username))
        .field(FormField::password("password", "Password"))
        .field(FormField::password("password2", "Confirm password"))
        .submit("Register")
        .link("/auth/login", "Already have an account? Log in.")
}

/// GET /auth/register
pub async fn register_form() -> Html<FormPage> {
    Html(register_page("", ""))
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> AppResult<Response> {
    let registration = Registration {
        email: form.email.clone(),
        username: form.username.clone(),
        password: form.password.clone(),
    };
    let admin_email = state.config.auth.admin_email.clone();
    let created = passwords_match(&form.password, &form.password2).and_then(|()| {
        db::transaction(&state.db, |tx| {
            accounts::create_user(tx, &registration, admin_email.as_deref())
        })
    });
    let user = match created {
        Ok(user) => user,
        Err(e) => return form_error(register_page(&form.email, &form.username), e),
    };

    send_confirmation(&state, &headers, &user.id)?;
    let page = FormPage::message(
        Nav::anonymous(),
        "Registered",
        "A confirmation email has been sent to you by email.",
    )
    .link("/auth/login", "Log in");
    Ok(Html(page).into_response())
}

/// GET /auth/confirm/{token}
pub async fn confirm(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(token): Path<String>,
) -> AppResult<Response> {
    if user.confirmed {
        return Ok(Redirect::to("/").into_response());
    }
    let confirmed =
        db::transaction(&state.db, |tx| accounts::confirm(tx, &state.signer, &user.id, &token))?;
    let message = if confirmed {
        tracing::info!(user_id = %user.id, "Account confirmed");
        "You have confirmed your account. Thanks!"
    } else {
        tracing::warn!(user_id = %user.id, "Rejected confirmation token");
        "The confirmation link is invalid or has expired."
    };
    let mut nav = Nav::for_user(Some(&user));
    if let Some(nav_user) = nav.user.as_mut() {
        nav_user.confirmed = confirmed;
    }
    Ok(Html(FormPage::message(nav, "Confirm Account", message).link("/", "Home")).into_response())
}

/// GET /auth/confirm: send a fresh confirmation link.
pub async fn resend_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: CurrentUser,
) -> AppResult<Html<FormPage>> {
    send_confirmation(&state, &headers, &user.id)?;
    Ok(Html(FormPage::message(
        Nav::for_user(Some(&user)),
        "Confirm Account",
        "A new confirmation email has been sent to you by email.",
    )))
}

/// GET /auth/unconfirmed: where unconfirmed accounts land when they try to
/// write.
pub async fn unconfirmed(user: CurrentUser) -> Response {
    if user.confirmed {
        return Redirect::to("/").into_response();
    }
    let page = FormPage::message(
        Nav::for_user(Some(&user)),
        &format!("Hello, {}!", user.username),
        "You have not confirmed your account yet. Before you can post, comment, vote or \
         follow, you need to confirm your account. Check your inbox for the email with \
         the confirmation link.",
    )
    .link("/auth/confirm", "Send me a new confirmation email");
    Html(page).into_response()
}

// -- Password management --

fn change_password_page(user: &CurrentUser) -> FormPage {
    FormPage::new(
        Nav::for_user(Some(user)),
        "Change Your Password",
        "/auth/change-password",
    )
    .field(FormField::password("old_password", "Old password"))
    .field(FormField::password("password", "New password"))
    .field(FormField::password("password2", "Confirm new password"))
    .submit("Update Password")
}

/// GET /auth/change-password
pub async fn change_password_form(user: CurrentUser) -> Html<FormPage> {
    Html(change_password_page(&user))
}

/// POST /auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    user: CurrentUser,
    Form(form): Form<ChangePasswordForm>,
) -> AppResult<Response> {
    let changed = passwords_match(&form.password, &form.password2).and_then(|()| {
        db::transaction(&state.db, |tx| {
            accounts::change_password(tx, &user.id, &form.old_password, &form.password)
        })
    });
    match changed {
        Ok(()) => Ok(Html(FormPage::message(
            Nav::for_user(Some(&user)),
            "Change Your Password",
            "Your password has been updated.",
        ))
        .into_response()),
        Err(e) => form_error(change_password_page(&user), e),
    }
}

fn reset_request_page() -> FormPage {
    FormPage::new(Nav::anonymous(), "Reset Your Password", "/auth/reset")
        .field(FormField::email("email", "Email", ""))
        .submit("Reset Password")
}

/// GET /auth/reset
pub async fn reset_request_form(maybe_user: MaybeUser) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(reset_request_page()).into_response()
}

/// POST /auth/reset: mail a reset link. The answer is the same whether or
/// not the address is registered.
pub async fn reset_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<EmailForm>,
) -> AppResult<Html<FormPage>> {
    let conn = state.db.get()?;
    match accounts::get_user_by_email(&conn, form.email.trim())? {
        Some(user) if !user.server_own => {
            let token = accounts::generate_reset_token(&state.signer, &user.id, TOKEN_TTL_SECS)?;
            let link = external_url(&headers, &format!("/auth/reset/{}", token));
            state
                .mailer
                .send(&Message::reset_password(&user.email, &user.username, &link))?;
        }
        _ => tracing::info!("Password reset requested for an unknown address"),
    }
    Ok(Html(
        FormPage::message(
            Nav::anonymous(),
            "Reset Your Password",
            "An email with instructions to reset your password has been sent to you.",
        )
        .link("/auth/login", "Log in"),
    ))
}

fn reset_page(token: &str) -> FormPage {
    FormPage::new(
        Nav::anonymous(),
        "Reset Your Password",
        &format!("/auth/reset/{}", token),
    )
    .field(FormField::password("password", "New password"))
    .field(FormField::password("password2", "Confirm password"))
    .submit("Reset Password")
}

/// GET /auth/reset/{token}
pub async fn reset_form(maybe_user: MaybeUser, Path(token): Path<String>) -> Response {
    if maybe_user.0.is_some() {
        return Redirect::to("/").into_response();
    }
    Html(reset_page(&token)).into_response()
}

/// POST /auth/reset/{token}
pub async fn reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<NewPasswordForm>,
) -> AppResult<Response> {
    let reset = passwords_match(&form.password, &form.password2).and_then(|()| {
        db::transaction(&state.db, |tx| {
            accounts::reset_password(tx, &state.signer, &token, &form.password)
        })
    });
    match reset {
        Ok(true) => Ok(Html(
            FormPage::message(
                Nav::anonymous(),
                "Reset Your Password",
                "Your password has been updated.",
            )
            .link("/auth/login", "Log in"),
        )
        .into_response()),
        Ok(false) => {
            tracing::warn!("Rejected password reset token");
            let page = reset_page(&token)
                .with_error(Some("The reset link is invalid or has expired.".into()));
            Ok(Html(page).into_response())
        }
        Err(e) => form_error(reset_page(&token), e),
    }
}

// -- Email change --

fn change_email_page(user: &CurrentUser, email: &str) -> FormPage {
    FormPage::new(
        Nav::for_user(Some(user)),
        "Change Your Email Address",
        "/auth/change-email",
    )
    .field(FormField::email("email", "New email", email))
    .field(FormField::password("password", "Password"))
    .submit("Update Email Address")
}

/// Check the password and that `new_email` is free, then sign a token
/// carrying it.
fn email_change_token(
    state: &AppState,
    user: &CurrentUser,
    new_email: &str,
    password: &str,
) -> AppResult<String> {
    let conn = state.db.get()?;
    let account = accounts::require_user(&conn, &user.id)?;
    if !accounts::verify_password(&account, password) {
        return Err(AppError::BadRequest("Invalid email or password.".into()));
    }
    accounts::validate_email(new_email)?;
    if accounts::get_user_by_email(&conn, new_email)?.is_some() {
        return Err(AppError::Conflict("Email already registered.".into()));
    }
    accounts::generate_email_change_token(&state.signer, &user.id, new_email, TOKEN_TTL_SECS)
}

/// GET /auth/change-email
pub async fn change_email_form(user: CurrentUser) -> Html<FormPage> {
    Html(change_email_page(&user, ""))
}

/// POST /auth/change-email: mail a confirmation link to the new address.
pub async fn change_email_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    user: CurrentUser,
    Form(form): Form<ChangeEmailForm>,
) -> AppResult<Response> {
    let new_email = form.email.trim();
    let requested = email_change_token(&state, &user, new_email, &form.password);
    let token = match requested {
        Ok(token) => token,
        Err(e) => return form_error(change_email_page(&user, new_email), e),
    };

    let link = external_url(&headers, &format!("/auth/change-email/{}", token));
    state
        .mailer
        .send(&Message::change_email(new_email, &user.username, &link))?;
    Ok(Html(FormPage::message(
        Nav::for_user(Some(&user)),
        "Change Your Email Address",
        "An email with instructions to confirm your new email address has been sent to you.",
    ))
    .into_response())
}

/// GET /auth/change-email/{token}
pub async fn change_email(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(token): Path<String>,
) -> AppResult<Html<FormPage>> {
    let changed = db::transaction(&state.db, |tx| {
        accounts::change_email(tx, &state.signer, &user.id, &token)
    })?;
    let message = if changed {
        tracing::info!(user_id = %user.id, "Email address changed");
        "Your email address has been updated."
    } else {
        tracing::warn!(user_id = %user.id, "Rejected email change token");
        "Invalid request."
    };
    Ok(Html(
        FormPage::message(
            Nav::for_user(Some(&user)),
            "Change Your Email Address",
            message,
        )
        .link("/", "Home"),
    ))
}
