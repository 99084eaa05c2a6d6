use axum::Router;

pub mod catalog;
pub mod movements;
pub mod orders;
pub mod system;

/// Router for every resource endpoint.
pub fn router() -> Router {
    Router::new()
        .merge(catalog::router())
        .nest("/orders", orders::router())
        .merge(movements::router())
}
