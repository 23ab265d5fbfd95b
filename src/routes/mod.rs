pub mod assets;
pub mod auth;
pub mod comments;
pub mod filters;
pub mod form_fields;
pub mod home;
pub mod notifications;
pub mod posts;
pub mod profile;
pub mod users;
pub mod votes;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{attach_session, load_session};
use crate::state::AppState;

/// Multipart bodies carry images up to 2 MB plus the form fields.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(home::index))
        .merge(auth::router())
        .merge(posts::router())
        .merge(comments::router())
        .merge(profile::router())
        .merge(users::router())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(state.clone(), attach_session));

    let api = Router::new()
        .merge(votes::router())
        .merge(notifications::router())
        .layer(middleware::from_fn_with_state(state.clone(), load_session));

    Router::new()
        .merge(pages)
        .merge(api)
        .route("/assets/{*path}", get(assets::serve))
        .nest_service("/uploads", ServeDir::new(state.uploads.root()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
