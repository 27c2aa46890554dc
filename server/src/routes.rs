use axum::{middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{history, profile, rooms};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Room lifecycle (JWT required, Claims extractor validates token)
    let room_routes = Router::new()
        .route("/api/chat/rooms", axum::routing::get(rooms::list_rooms))
        .route("/api/chat/rooms", axum::routing::post(rooms::create_room))
        .route("/api/chat/rooms/{id}", axum::routing::delete(rooms::delete_room));

    // Message history
    let history_routes = Router::new()
        .route(
            "/api/chat/rooms/{id}/messages",
            axum::routing::get(history::room_history),
        )
        .route(
            "/api/chat/private/messages",
            axum::routing::get(history::private_history),
        )
        .route(
            "/api/chat/conversations",
            axum::routing::get(history::conversations),
        );

    let profile_routes = Router::new().route(
        "/api/chat/profile",
        axum::routing::put(profile::set_profile),
    );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(room_routes)
        .merge(history_routes)
        .merge(profile_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
