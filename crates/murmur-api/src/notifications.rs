use axum::{
    Extension, Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use murmur_db::models::NotificationRow;
use murmur_types::api::NotificationResponse;

use crate::error::ApiError;
use crate::middleware::RequestContext;
use crate::state::{AppState, with_db};

/// Float seconds since the Unix epoch, the notification clock.
pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Default, Deserialize)]
pub struct SinceQuery {
    pub since: Option<String>,
}

impl SinceQuery {
    /// Missing or unparsable values mean "from the beginning".
    pub fn value(&self) -> f64 {
        self.since
            .as_deref()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite())
            .unwrap_or(0.0)
    }
}

/// Notifications newer than `since`, oldest first. Clients poll with the
/// largest timestamp they have seen.
pub async fn notifications(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<NotificationResponse>>, ApiError> {
    let since = query.value();
    let user_id = ctx.user.id.clone();
    let rows = with_db(&state, move |db| db.notifications_since(&user_id, since)).await?;
    Ok(Json(rows.into_iter().map(notification_response).collect()))
}

fn notification_response(row: NotificationRow) -> NotificationResponse {
    let data = serde_json::from_str(&row.payload_json).unwrap_or_else(|e| {
        warn!("Corrupt payload on notification {}: {}", row.id, e);
        serde_json::Value::Null
    });
    NotificationResponse {
        name: row.name,
        data,
        timestamp: row.timestamp,
    }
}
