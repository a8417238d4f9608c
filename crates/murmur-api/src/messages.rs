use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use murmur_db::queries::NotificationStamp;
use murmur_types::api::{FlashResponse, MessageResponse, PageResponse, SendMessageRequest, UserSummary};
use murmur_types::events::NotificationEvent;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::forms::Validate;
use crate::i18n::Msg;
use crate::middleware::RequestContext;
use crate::notifications::epoch_seconds;
use crate::pagination::{PageLink, PageQuery, PageRequest, paginate};
use crate::posts::{load_profile, summary, user_not_found};
use crate::state::{AppState, with_db};
use crate::views;

pub async fn send_message_page(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(recipient): Path<String>,
) -> Result<Json<UserSummary>, ApiError> {
    let profile = load_profile(&state, &ctx.user.id, &recipient)
        .await?
        .ok_or_else(|| user_not_found(&recipient, ctx.locale))?;
    Ok(Json(summary(&state, &ctx, profile)?))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(recipient): Path<String>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = recipient.clone();
    let Some(target) = with_db(&state, move |db| db.get_user_by_username(&name)).await? else {
        return Err(user_not_found(&recipient, ctx.locale));
    };
    req.validate(ctx.locale)?;

    let message_id = Uuid::new_v4().to_string();
    let notification_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let timestamp = murmur_db::format_timestamp(now);
    let sent_at = epoch_seconds(now);
    let body = req.message.trim().to_string();
    let (sender_id, recipient_id) = (ctx.user.id.clone(), target.id.clone());

    let unread = with_db(&state, move |db| {
        db.send_message(
            &message_id,
            &sender_id,
            &recipient_id,
            &body,
            &timestamp,
            NotificationStamp {
                id: &notification_id,
                name: NotificationEvent::UNREAD_MESSAGE_COUNT,
                now: sent_at,
            },
            |unread| NotificationEvent::UnreadMessageCount(unread).data().to_string(),
        )
    })
    .await?;

    info!(
        "'{}' messaged '{}' ({} unread)",
        ctx.user.username, target.username, unread
    );
    Ok((
        StatusCode::CREATED,
        Json(FlashResponse {
            message: Msg::MessageSent.text(ctx.locale),
            redirect: format!("/user/{}", target.username),
        }),
    ))
}

/// Opening the inbox marks everything in it as read.
pub async fn inbox(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<PageQuery>,
) -> Result<Json<PageResponse<MessageResponse>>, ApiError> {
    let req = PageRequest::new(query.number(), state.settings.posts_per_page);
    let user_id = ctx.user.id.clone();
    let now = Utc::now();
    let read_at = murmur_db::format_timestamp(now);
    let stamp_at = epoch_seconds(now);
    let notification_id = Uuid::new_v4().to_string();

    let page = with_db(&state, move |db| {
        db.mark_messages_read(
            &user_id,
            &read_at,
            NotificationStamp {
                id: &notification_id,
                name: NotificationEvent::UNREAD_MESSAGE_COUNT,
                now: stamp_at,
            },
            &NotificationEvent::UnreadMessageCount(0).data().to_string(),
        )?;
        paginate(req, |limit, offset| db.received_messages(&user_id, limit, offset))
    })
    .await?;

    Ok(Json(
        page.map(views::message_response)
            .into_response(&PageLink::new("/messages")),
    ))
}
