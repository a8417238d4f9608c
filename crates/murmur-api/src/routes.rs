use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::state::AppState;
use crate::{auth, messages, middleware::require_auth, notifications, posts, search, social, tasks, translate};

/// Every route of the service. Cross-cutting layers (tracing, CORS) are added
/// by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", get(auth::logout))
        .route("/register", get(auth::register_page).post(auth::register))
        .route(
            "/reset_password_request",
            get(auth::reset_password_request_page).post(auth::reset_password_request),
        )
        .route(
            "/reset_password/{token}",
            get(auth::reset_password_page).post(auth::reset_password),
        )
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/", get(posts::home_feed).post(posts::create_post))
        .route("/index", get(posts::home_feed).post(posts::create_post))
        .route("/explore", get(posts::explore_feed))
        .route("/user/{username}", get(posts::user_profile))
        .route("/user/{username}/popup", get(posts::user_popup))
        .route("/edit_profile", get(posts::edit_profile_page).post(posts::edit_profile))
        .route("/follow/{username}", post(social::follow))
        .route("/unfollow/{username}", post(social::unfollow))
        .route("/translate", post(translate::translate_text))
        .route("/search", get(search::search))
        .route(
            "/send_message/{recipient}",
            get(messages::send_message_page).post(messages::send_message),
        )
        .route("/messages", get(messages::inbox))
        .route("/notifications", get(notifications::notifications))
        .route("/export_posts", get(tasks::export_posts))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
