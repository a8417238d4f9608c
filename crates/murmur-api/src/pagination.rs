//! Page-number pagination shared by every listing.
//!
//! Sources either fetch one row beyond the page (`paginate`) or report a total
//! count (`Page::from_total`); both produce the same [`Page`].

use murmur_types::api::PageResponse;
use serde::Deserialize;
use url::form_urlencoded;

/// `?page=` as sent by clients. Anything that does not parse as a positive
/// integer means the first page.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    pub fn number(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .map(|p| p.clamp(1, u32::MAX as i64) as u32)
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Fetch one page from a source that takes `(limit, offset)`. The source is
/// asked for one extra row to learn whether a next page exists.
pub fn paginate<T, F>(req: PageRequest, fetch: F) -> anyhow::Result<Page<T>>
where
    F: FnOnce(u32, u64) -> anyhow::Result<Vec<T>>,
{
    let mut items = fetch(req.per_page.saturating_add(1), req.offset())?;
    let has_next = items.len() > req.per_page as usize;
    items.truncate(req.per_page as usize);

    Ok(Page {
        items,
        page: req.page,
        has_next,
        has_prev: req.page > 1,
    })
}

impl<T> Page<T> {
    /// Adapt a source that reports the total number of matches.
    pub fn from_total(items: Vec<T>, total: u64, req: PageRequest) -> Self {
        Self {
            items,
            page: req.page,
            has_next: total > req.page as u64 * req.per_page as u64,
            has_prev: req.page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            has_next: self.has_next,
            has_prev: self.has_prev,
        }
    }

    /// Render with navigation links that keep `link`'s path and query.
    pub fn into_response(self, link: &PageLink<'_>) -> PageResponse<T> {
        PageResponse {
            next_url: self.has_next.then(|| link.url(self.page + 1)),
            prev_url: self.has_prev.then(|| link.url(self.page - 1)),
            page: self.page,
            items: self.items,
        }
    }
}

/// Where a listing lives, for building `next_url`/`prev_url`.
#[derive(Debug, Clone)]
pub struct PageLink<'a> {
    path: &'a str,
    params: Vec<(&'a str, &'a str)>,
}

impl<'a> PageLink<'a> {
    pub fn new(path: &'a str) -> Self {
        Self {
            path,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &'a str, value: &'a str) -> Self {
        self.params.push((key, value));
        self
    }

    pub fn url(&self, page: u32) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.params {
            query.append_pair(k, v);
        }
        query.append_pair("page", &page.to_string());
        format!("{}?{}", self.path, query.finish())
    }
}
