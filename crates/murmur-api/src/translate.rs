use std::time::Duration;

use async_trait::async_trait;
use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use murmur_types::api::{TranslateRequest, TranslateResponse};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::forms::Validate;
use crate::i18n::Msg;
use crate::middleware::RequestContext;
use crate::state::AppState;

pub const DEFAULT_ENDPOINT: &str = "https://api.cognitive.microsofttranslator.com";

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("translation provider is not configured")]
    NotConfigured,

    #[error("translation failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError>;
}

/// Used when no provider key is configured.
pub struct UnconfiguredTranslator;

#[async_trait]
impl Translator for UnconfiguredTranslator {
    async fn translate(&self, _: &str, _: &str, _: &str) -> Result<String, TranslateError> {
        Err(TranslateError::NotConfigured)
    }
}

/// Microsoft Translator text API, v3.
pub struct MicrosoftTranslator {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    region: Option<String>,
}

impl MicrosoftTranslator {
    pub fn new(
        key: String,
        region: Option<String>,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            key,
            region,
        })
    }
}

#[derive(Deserialize)]
struct TranslationResult {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

#[async_trait]
impl Translator for MicrosoftTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslateError> {
        let mut request = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .query(&[("api-version", "3.0"), ("from", from), ("to", to)])
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .json(&json!([{ "Text": text }]));
        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TranslateError::Failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TranslateError::Failed(format!("provider answered {status}")));
        }

        let results: Vec<TranslationResult> = response
            .json()
            .await
            .map_err(|e| TranslateError::Failed(e.to_string()))?;
        results
            .into_iter()
            .next()
            .and_then(|r| r.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or_else(|| TranslateError::Failed("empty translation".into()))
    }
}

pub async fn translate_text(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(req): ApiJson<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    req.validate(ctx.locale)?;

    debug!(
        "Translating {} chars {} -> {}",
        req.text.chars().count(),
        req.source_language,
        req.dest_language
    );
    match state
        .translator
        .translate(&req.text, &req.source_language, &req.dest_language)
        .await
    {
        Ok(text) => Ok(Json(TranslateResponse { text })),
        Err(TranslateError::NotConfigured) => Err(ApiError::Unavailable(
            Msg::TranslationNotConfigured.text(ctx.locale),
        )),
        Err(TranslateError::Failed(reason)) => {
            warn!("Translation failed: {}", reason);
            Err(ApiError::Upstream(Msg::TranslationFailed.text(ctx.locale)))
        }
    }
}
