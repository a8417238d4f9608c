use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Extension, Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use murmur_db::Database;

use crate::error::ApiError;
use crate::middleware::RequestContext;
use crate::pagination::{Page, PageLink, PageQuery, PageRequest};
use crate::state::{AppState, with_db};
use crate::views;

/// Index holding post bodies.
pub const POSTS_INDEX: &str = "posts";

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn add_to_index(&self, index: &str, id: &str, body: &str) -> anyhow::Result<()>;

    async fn remove_from_index(&self, index: &str, id: &str) -> anyhow::Result<()>;

    /// One page of matching ids, best first, plus the total number of hits.
    async fn query_index(
        &self,
        index: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> anyhow::Result<(Vec<String>, u64)>;
}

/// Full-text search in the application database.
pub struct FtsIndex {
    db: Arc<Database>,
}

impl FtsIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn run<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl SearchIndex for FtsIndex {
    async fn add_to_index(&self, index: &str, id: &str, body: &str) -> anyhow::Result<()> {
        let (index, id, body) = (index.to_string(), id.to_string(), body.to_string());
        self.run(move |db| db.fts_add(&index, &id, &body)).await
    }

    async fn remove_from_index(&self, index: &str, id: &str) -> anyhow::Result<()> {
        let (index, id) = (index.to_string(), id.to_string());
        self.run(move |db| db.fts_remove(&index, &id)).await
    }

    async fn query_index(
        &self,
        index: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> anyhow::Result<(Vec<String>, u64)> {
        let (index, query) = (index.to_string(), query.to_string());
        let req = PageRequest::new(page, per_page);
        self.run(move |db| db.fts_query(&index, &query, req.per_page, req.offset()))
            .await
    }
}

/// Elasticsearch over its REST API.
pub struct ElasticsearchIndex {
    client: reqwest::Client,
    base: Url,
}

impl ElasticsearchIndex {
    pub fn new(base: Url, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Elasticsearch URL cannot be a base: {}", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[derive(Deserialize)]
struct SearchReply {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    total: Total,
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Total {
    value: u64,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn add_to_index(&self, index: &str, id: &str, body: &str) -> anyhow::Result<()> {
        self.client
            .put(self.url(&[index, "_doc", id])?)
            .json(&json!({ "body": body }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn remove_from_index(&self, index: &str, id: &str) -> anyhow::Result<()> {
        let response = self.client.delete(self.url(&[index, "_doc", id])?).send().await?;
        if response.status() != reqwest::StatusCode::NOT_FOUND {
            response.error_for_status()?;
        }
        Ok(())
    }

    async fn query_index(
        &self,
        index: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> anyhow::Result<(Vec<String>, u64)> {
        let req = PageRequest::new(page, per_page);
        let response = self
            .client
            .post(self.url(&[index, "_search"])?)
            .json(&json!({
                "query": { "multi_match": { "query": query, "fields": ["*"] } },
                "from": req.offset(),
                "size": req.per_page,
            }))
            .send()
            .await?;

        // Nothing has been indexed yet.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((vec![], 0));
        }
        let reply: SearchReply = response.error_for_status()?.json().await?;
        let ids = reply.hits.hits.into_iter().map(|h| h.id).collect();
        Ok((ids, reply.hits.total.value))
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub page: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Response, ApiError> {
    let q = query.q.trim().to_string();
    if q.is_empty() {
        return Ok(Redirect::to("/explore").into_response());
    }

    let number = PageQuery { page: query.page }.number();
    let req = PageRequest::new(number, state.settings.posts_per_page);
    let (ids, total) = state
        .search
        .query_index(POSTS_INDEX, &q, req.page, req.per_page)
        .await?;

    let posts = if ids.is_empty() {
        vec![]
    } else {
        let wanted = ids.clone();
        let rows = with_db(&state, move |db| db.posts_by_ids(&wanted)).await?;
        let mut by_id: HashMap<String, _> = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
        // Hits whose post no longer exists are skipped.
        ids.iter().filter_map(|id| by_id.remove(id)).collect()
    };

    let locale = ctx.locale;
    let page = Page::from_total(posts, total, req).map(|row| views::post_response(row, locale));
    let link = PageLink::new("/search").param("q", &q);
    Ok(Json(page.into_response(&link)).into_response())
}
