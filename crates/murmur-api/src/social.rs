use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
};
use chrono::Utc;
use tracing::{debug, info};

use murmur_types::api::{FlashResponse, FollowRequest};

use crate::csrf;
use crate::error::ApiError;
use crate::i18n::Msg;
use crate::middleware::RequestContext;
use crate::state::{AppState, with_db};

#[derive(Clone, Copy)]
enum Edge {
    Follow,
    Unfollow,
}

pub async fn follow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(username): Path<String>,
    form: Result<Json<FollowRequest>, JsonRejection>,
) -> Result<Json<FlashResponse>, ApiError> {
    change_edge(&state, &ctx, &username, form_token(form), Edge::Follow).await
}

pub async fn unfollow(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(username): Path<String>,
    form: Result<Json<FollowRequest>, JsonRejection>,
) -> Result<Json<FlashResponse>, ApiError> {
    change_edge(&state, &ctx, &username, form_token(form), Edge::Unfollow).await
}

/// A body that cannot be read carries no token and fails like a forged one.
fn form_token(form: Result<Json<FollowRequest>, JsonRejection>) -> Option<String> {
    match form {
        Ok(Json(form)) => Some(form.csrf_token),
        Err(rejection) => {
            debug!("Rejected follow form: {}", rejection.body_text());
            None
        }
    }
}

/// Checks run in order: form token, target exists, target is not the actor.
/// The edge change itself is idempotent.
async fn change_edge(
    state: &AppState,
    ctx: &RequestContext,
    username: &str,
    token: Option<String>,
    edge: Edge,
) -> Result<Json<FlashResponse>, ApiError> {
    let locale = ctx.locale;
    let valid = token.is_some_and(|t| csrf::verify(&state.settings.secret, ctx.user_id, &t, Utc::now()));
    if !valid {
        return Err(ApiError::bad_request(Msg::InvalidFormToken.text(locale)).with_redirect("/index"));
    }

    let name = username.to_string();
    let Some(target) = with_db(state, move |db| db.get_user_by_username(&name)).await? else {
        return Err(
            ApiError::not_found(Msg::UserNotFound(username).text(locale)).with_redirect("/index"),
        );
    };

    let profile = format!("/user/{}", target.username);
    if target.id == ctx.user.id {
        let msg = match edge {
            Edge::Follow => Msg::CannotFollowSelf,
            Edge::Unfollow => Msg::CannotUnfollowSelf,
        };
        return Err(ApiError::bad_request(msg.text(locale)).with_redirect(profile));
    }

    let (actor, target_id) = (ctx.user.id.clone(), target.id.clone());
    let changed = with_db(state, move |db| match edge {
        Edge::Follow => db.follow(&actor, &target_id),
        Edge::Unfollow => db.unfollow(&actor, &target_id),
    })
    .await?;

    let message = match edge {
        Edge::Follow => {
            if changed {
                info!("'{}' followed '{}'", ctx.user.username, target.username);
            }
            Msg::NowFollowing(&target.username).text(locale)
        }
        Edge::Unfollow => {
            if changed {
                info!("'{}' unfollowed '{}'", ctx.user.username, target.username);
            }
            Msg::NotFollowing(&target.username).text(locale)
        }
    };

    Ok(Json(FlashResponse {
        message,
        redirect: profile,
    }))
}
