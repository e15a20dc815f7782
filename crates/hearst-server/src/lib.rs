pub mod http;
pub mod records;
pub mod sock;
pub mod state;

pub use records::{Model, Record, RecordKey};
pub use state::{load_or_create_server_key, AppState};

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

/// The full route table: the thin REST surface, the token mint, and the
/// duplex socket, all over one shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/auth", get(http::auth::new_token))
        .route("/auth/", get(http::auth::new_token))
        .route("/mailbox", axum::routing::post(http::mailbox::create))
        .route("/mailbox/", axum::routing::post(http::mailbox::create))
        .route(
            "/mailbox/{id}",
            get(http::mailbox::show)
                .put(http::mailbox::update)
                .delete(http::mailbox::destroy),
        )
        .route("/thread", axum::routing::post(http::thread::create))
        .route("/thread/", axum::routing::post(http::thread::create))
        .route(
            "/thread/{id}",
            get(http::thread::show)
                .put(http::thread::update)
                .delete(http::thread::destroy),
        )
        .route(
            "/thread/{id}/members",
            get(http::thread::list_members).post(http::thread::add_member),
        )
        .route(
            "/thread/{id}/members/{mailbox_id}",
            get(http::thread::show_member)
                .put(http::thread::update_member)
                .delete(http::thread::remove_member),
        )
        .route(
            "/messages/{thread_id}",
            get(http::message::index).post(http::message::create),
        )
        .route("/socket", get(sock::socket_handler))
        .route("/socket/", get(sock::socket_handler))
        .layer(cors)
        .with_state(state)
}
