use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;
use uuid::Uuid;

use murmur_db::models::UserRow;
use murmur_types::api::Claims;

use crate::error::ApiError;
use crate::i18n::{Locale, Msg};
use crate::state::{AppState, with_db};

pub const SESSION_COOKIE: &str = "session";

/// Per-request state attached by [`require_auth`]: the signed-in user and the
/// negotiated locale.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub user: UserRow,
    pub locale: Locale,
}

/// Resolve the session token (bearer header first, then the session cookie),
/// load the user, record their last-seen time and attach a [`RequestContext`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let locale = Locale::negotiate(
        req.headers()
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok()),
        &state.settings.languages,
    );
    let redirect = login_redirect(&req);
    let login_required =
        || ApiError::unauthorized(Msg::LoginRequired.text(locale)).with_redirect(redirect.clone());

    let token = session_token(req.headers()).ok_or_else(login_required)?;
    let claims = decode_session_token(&state.settings.secret, &token).map_err(|e| {
        debug!("Rejected session token: {}", e);
        login_required()
    })?;

    let user_id = claims.sub;
    let now = murmur_db::format_timestamp(chrono::Utc::now());
    let user = with_db(&state, move |db| {
        let id = user_id.to_string();
        let Some(user) = db.get_user_by_id(&id)? else {
            return Ok(None);
        };
        db.touch_last_seen(&id, &now)?;
        Ok(Some(UserRow {
            last_seen: Some(now),
            ..user
        }))
    })
    .await?
    .ok_or_else(login_required)?;

    req.extensions_mut().insert(RequestContext {
        user_id,
        user,
        locale,
    });
    Ok(next.run(req).await)
}

pub fn decode_session_token(secret: &str, token: &str) -> anyhow::Result<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    bearer.or_else(|| get_cookie(headers, SESSION_COOKIE))
}

fn login_redirect(req: &Request) -> String {
    let next = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    format!("/login?{query}")
}

pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(header::COOKIE) {
        let Ok(header) = header.to_str() else {
            continue;
        };
        for part in header.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k.trim() == name && !v.trim().is_empty() {
                    return Some(v.trim().to_string());
                }
            }
        }
    }
    None
}

/// `Set-Cookie` value for a session. Without `max_age_secs` the cookie ends
/// with the browser session.
pub fn session_cookie(token: &str, max_age_secs: Option<i64>) -> String {
    let base = format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax");
    match max_age_secs {
        Some(secs) => format!("{base}; Max-Age={secs}"),
        None => base,
    }
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=from-cookie"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-cookie"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cleared_cookie_is_not_a_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&headers), None);
    }

    #[test]
    fn remember_me_controls_max_age() {
        assert!(!session_cookie("t", None).contains("Max-Age"));
        assert!(session_cookie("t", Some(60)).ends_with("Max-Age=60"));
        assert!(clear_session_cookie().contains("Max-Age=0"));
    }
}
