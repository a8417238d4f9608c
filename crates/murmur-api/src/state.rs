use std::sync::Arc;

use murmur_db::Database;
use tracing::error;

use crate::error::ApiError;
use crate::i18n::Locale;
use crate::language::LanguageDetector;
use crate::mail::Mailer;
use crate::search::SearchIndex;
use crate::translate::Translator;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub settings: Settings,
    pub detector: Arc<dyn LanguageDetector>,
    pub translator: Arc<dyn Translator>,
    pub search: Arc<dyn SearchIndex>,
    pub mailer: Arc<dyn Mailer>,
}

/// Runtime settings the handlers need. Built by the server from its config.
#[derive(Debug, Clone)]
pub struct Settings {
    pub secret: String,
    /// Public URL of the service, used in links sent by email.
    pub base_url: String,
    pub posts_per_page: u32,
    pub remember_days: i64,
    pub languages: Vec<Locale>,
    pub mail_sender: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            base_url: "http://localhost:3000".into(),
            posts_per_page: 25,
            remember_days: 30,
            languages: vec![Locale::En, Locale::Es],
            mail_sender: "no-reply@murmur.local".into(),
        }
    }
}

/// Run blocking database work off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}
