use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_types::api::{
    CreatePostRequest, EditProfileRequest, EditProfileResponse, FlashResponse, PageResponse,
    PostResponse, ProfilePage, UserSummary,
};

use crate::csrf;
use crate::error::{ApiError, FieldErrors};
use crate::extract::ApiJson;
use crate::forms::Validate;
use crate::i18n::{Locale, Msg};
use crate::middleware::RequestContext;
use crate::pagination::{PageLink, PageQuery, PageRequest, paginate};
use crate::search::POSTS_INDEX;
use crate::state::{AppState, with_db};
use crate::views::{self, Profile};

// -- Feeds --

pub async fn home_feed(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<PostResponse>>, ApiError> {
    let req = PageRequest::new(query.number(), state.settings.posts_per_page);
    let user_id = ctx.user.id.clone();
    let page = with_db(&state, move |db| {
        paginate(req, |limit, offset| db.following_posts(&user_id, limit, offset))
    })
    .await?;

    let locale = ctx.locale;
    Ok(Json(
        page.map(|row| views::post_response(row, locale))
            .into_response(&PageLink::new("/index")),
    ))
}

pub async fn explore_feed(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<PostResponse>>, ApiError> {
    let req = PageRequest::new(query.number(), state.settings.posts_per_page);
    let page = with_db(&state, move |db| {
        paginate(req, |limit, offset| db.all_posts(limit, offset))
    })
    .await?;

    let locale = ctx.locale;
    Ok(Json(
        page.map(|row| views::post_response(row, locale))
            .into_response(&PageLink::new("/explore")),
    ))
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(req): ApiJson<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate(ctx.locale)?;

    let body = req.post.trim().to_string();
    let language = state.detector.detect(&body).unwrap_or_default();
    debug!("Detected language '{}' for new post", language);

    let post_id = Uuid::new_v4().to_string();
    let timestamp = murmur_db::format_timestamp(Utc::now());
    let (id, author, text) = (post_id.clone(), ctx.user.id.clone(), body.clone());
    with_db(&state, move |db| db.insert_post(&id, &author, &text, &language, &timestamp)).await?;

    if let Err(e) = state.search.add_to_index(POSTS_INDEX, &post_id, &body).await {
        warn!("Failed to index post {}: {:#}", post_id, e);
    }

    info!("User '{}' posted {}", ctx.user.username, post_id);
    Ok((
        StatusCode::CREATED,
        Json(FlashResponse {
            message: Msg::PostLive.text(ctx.locale),
            redirect: "/index".into(),
        }),
    ))
}

// -- Profiles --

/// Load a user by name together with their follow counts as seen by
/// `viewer`. `None` when no such user exists.
pub(crate) async fn load_profile(
    state: &AppState,
    viewer_id: &str,
    username: &str,
) -> Result<Option<Profile>, ApiError> {
    let viewer = viewer_id.to_string();
    let username = username.to_string();
    with_db(state, move |db| {
        let Some(user) = db.get_user_by_username(&username)? else {
            return Ok(None);
        };
        let counts = db.follow_counts(&user.id)?;
        let is_self = user.id == viewer;
        let is_following = !is_self && db.is_following(&viewer, &user.id)?;
        Ok(Some(Profile {
            user,
            counts,
            is_self,
            is_following,
        }))
    })
    .await
}

pub(crate) fn user_not_found(username: &str, locale: Locale) -> ApiError {
    ApiError::not_found(Msg::UserNotFound(username).text(locale)).with_redirect("/index")
}

pub(crate) fn summary(state: &AppState, ctx: &RequestContext, profile: Profile) -> Result<UserSummary, ApiError> {
    let token = csrf::issue(&state.settings.secret, ctx.user_id, Utc::now())?;
    Ok(views::user_summary(profile, token))
}

pub async fn user_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ProfilePage>, ApiError> {
    let profile = load_profile(&state, &ctx.user.id, &username)
        .await?
        .ok_or_else(|| user_not_found(&username, ctx.locale))?;

    let req = PageRequest::new(query.number(), state.settings.posts_per_page);
    let author_id = profile.user.id.clone();
    let page = with_db(&state, move |db| {
        paginate(req, |limit, offset| db.user_posts(&author_id, limit, offset))
    })
    .await?;

    let path = format!("/user/{}", profile.user.username);
    let locale = ctx.locale;
    let posts = page
        .map(|row| views::post_response(row, locale))
        .into_response(&PageLink::new(&path));

    Ok(Json(ProfilePage {
        user: summary(&state, &ctx, profile)?,
        posts,
    }))
}

pub async fn user_popup(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(username): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let profile = load_profile(&state, &ctx.user.id, &username)
        .await?
        .ok_or_else(|| user_not_found(&username, ctx.locale))?;
    Ok(Json(summary(&state, &ctx, profile)?))
}

pub async fn edit_profile_page(
    Extension(ctx): Extension<RequestContext>,
) -> Json<EditProfileResponse> {
    Json(EditProfileResponse {
        username: ctx.user.username,
        about_me: ctx.user.about_me,
    })
}

pub async fn edit_profile(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(req): ApiJson<EditProfileRequest>,
) -> Result<Json<FlashResponse>, ApiError> {
    req.validate(ctx.locale)?;

    let locale = ctx.locale;
    let user_id = ctx.user.id.clone();
    let username = req.username.trim().to_string();
    let about_me = req
        .about_me
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    let taken = with_db(&state, move |db| {
        if let Some(other) = db.get_user_by_username(&username)? {
            if other.id != user_id {
                return Ok(true);
            }
        }
        match db.update_profile(&user_id, &username, about_me.as_deref()) {
            Ok(()) => Ok(false),
            Err(e) if murmur_db::unique_violation(&e).as_deref() == Some("users.username") => Ok(true),
            Err(e) => Err(e),
        }
    })
    .await?;

    if taken {
        return Err(ApiError::Validation(FieldErrors::single(
            "username",
            Msg::UsernameTaken.text(locale),
        )));
    }

    Ok(Json(FlashResponse {
        message: Msg::ChangesSaved.text(locale),
        redirect: "/edit_profile".into(),
    }))
}
