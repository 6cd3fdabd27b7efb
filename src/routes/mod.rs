pub mod accounts;
pub mod auth;
pub mod media;
pub mod oauth;
pub mod posts;
pub mod worker;

use axum::Router;
use std::sync::Arc;

use crate::AppState;

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(accounts::routes())
        .merge(auth::routes())
        .merge(media::routes())
        .merge(oauth::routes())
        .merge(posts::routes())
        .merge(worker::routes())
}
