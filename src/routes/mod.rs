pub mod api;
pub mod assets;
pub mod auth;
pub mod form_page;
pub mod home;
pub mod moderate;
pub mod posts;
pub mod users;
pub mod views;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The whole site: HTML pages, the JSON API and embedded assets.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(home::router())
        .merge(posts::router())
        .merge(users::router())
        .merge(moderate::router())
        .merge(auth::router())
        .nest("/api/v1", api::router())
        .route("/assets/{*path}", get(assets::serve))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
