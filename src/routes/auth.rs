use axum::routing::{get, post};
use axum::Router;

use crate::auth::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", get(handlers::login_form).post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route(
            "/auth/register",
            get(handlers::register_form).post(handlers::register),
        )
        .route("/auth/confirm", get(handlers::resend_confirmation))
        .route("/auth/confirm/{token}", get(handlers::confirm))
        .route("/auth/unconfirmed", get(handlers::unconfirmed))
        .route(
            "/auth/change-password",
            get(handlers::change_password_form).post(handlers::change_password),
        )
        .route(
            "/auth/reset",
            get(handlers::reset_request_form).post(handlers::reset_request),
        )
        .route(
            "/auth/reset/{token}",
            get(handlers::reset_form).post(handlers::reset),
        )
        .route(
            "/auth/change-email",
            get(handlers::change_email_form).post(handlers::change_email_request),
        )
        .route("/auth/change-email/{token}", get(handlers::change_email))
}
