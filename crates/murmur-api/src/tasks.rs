//! Background export of a user's posts.
//!
//! The request handler only records the task and spawns the job; progress is
//! reported through `task_progress` notifications.

use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::{PostRow, TaskRow, UserRow};
use murmur_db::queries::NotificationStamp;
use murmur_types::api::FlashResponse;
use murmur_types::events::NotificationEvent;

use crate::error::ApiError;
use crate::i18n::Msg;
use crate::mail::{self, EmailAttachment, OutgoingEmail};
use crate::middleware::RequestContext;
use crate::notifications::epoch_seconds;
use crate::state::{AppState, with_db};

pub const EXPORT_POSTS: &str = "export_posts";

pub async fn export_posts(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<FlashResponse>, ApiError> {
    let locale = ctx.locale;
    let redirect = format!("/user/{}", ctx.user.username);

    let task_id = Uuid::new_v4();
    let description = Msg::ExportingPosts.text(locale);
    let (id, desc, user_id) = (task_id.to_string(), description.clone(), ctx.user.id.clone());
    let launched = with_db(&state, move |db| {
        db.launch_task_if_idle(&id, EXPORT_POSTS, &desc, &user_id)
    })
    .await?;

    let Some(task) = launched else {
        return Ok(Json(FlashResponse {
            message: Msg::ExportInProgress.text(locale),
            redirect,
        }));
    };

    info!("Starting export {} for '{}'", task.id, ctx.user.username);
    tokio::spawn(run_export(state.clone(), task_id, task, ctx.user));

    Ok(Json(FlashResponse {
        message: description,
        redirect,
    }))
}

#[derive(Serialize)]
struct ExportedPost {
    body: String,
    timestamp: String,
}

#[derive(Serialize)]
struct Export {
    posts: Vec<ExportedPost>,
}

/// Runs the export to completion. Whatever happens, the task ends complete at
/// 100% so the user can start another one.
pub async fn run_export(state: AppState, task_id: Uuid, task: TaskRow, user: UserRow) {
    if let Err(e) = export(&state, task_id, &user).await {
        error!("Export {} for '{}' failed: {:#}", task.id, user.username, e);
    }

    let db = state.db.clone();
    let finished = blocking(db, move |db| {
        record_progress(db, &user.id, task_id, 100)?;
        db.complete_task(&task.id)
    })
    .await;
    match finished {
        Ok(()) => info!("Export {} finished", task_id),
        Err(e) => error!("Failed to close export {}: {:#}", task_id, e),
    }
}

async fn export(state: &AppState, task_id: Uuid, user: &UserRow) -> anyhow::Result<()> {
    let user_id = user.id.clone();
    let posts = blocking(state.db.clone(), move |db| {
        record_progress(db, &user_id, task_id, 0)?;
        db.all_user_posts(&user_id)
    })
    .await?;

    let total = posts.len();
    let mut exported = Vec::with_capacity(total);
    for (i, post) in posts.into_iter().enumerate() {
        exported.push(exported_post(post));
        let progress = ((i + 1) * 100 / total.max(1)).min(99) as u8;
        let user_id = user.id.clone();
        if let Err(e) = blocking(state.db.clone(), move |db| {
            record_progress(db, &user_id, task_id, progress)
        })
        .await
        {
            warn!("Failed to record progress for export {}: {:#}", task_id, e);
        }
    }

    let data = serde_json::to_vec_pretty(&Export { posts: exported })?;
    let email = OutgoingEmail {
        from: state.settings.mail_sender.clone(),
        to: vec![user.email.clone()],
        subject: "[Murmur] Your blog posts".into(),
        body: format!(
            "Dear {},\n\nPlease find attached the archive of your posts that you requested.\n\n\
             Sincerely,\n\nThe Murmur Team\n",
            user.username
        ),
        attachments: vec![EmailAttachment {
            filename: "posts.json".into(),
            content_type: "application/json".into(),
            data,
        }],
    };
    mail::send_logged(state.mailer.as_ref(), email).await;
    Ok(())
}

fn exported_post(row: PostRow) -> ExportedPost {
    ExportedPost {
        body: row.body,
        timestamp: row.timestamp,
    }
}

fn record_progress(db: &Database, user_id: &str, task_id: Uuid, progress: u8) -> anyhow::Result<()> {
    let event = NotificationEvent::TaskProgress { task_id, progress };
    let id = Uuid::new_v4().to_string();
    db.add_notification(
        user_id,
        NotificationStamp {
            id: &id,
            name: event.name(),
            now: epoch_seconds(Utc::now()),
        },
        &event.data().to_string(),
    )?;
    Ok(())
}

async fn blocking<F, T>(db: Arc<Database>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&db)).await?
}
