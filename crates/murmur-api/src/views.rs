//! Conversions from database rows to response bodies.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use tracing::warn;
use uuid::Uuid;

use murmur_db::models::{FollowCounts, MessageRow, PostRow, UserRow};
use murmur_types::api::{AuthorResponse, MessageResponse, PostResponse, UserSummary};

use crate::i18n::Locale;

pub const AVATAR_SMALL: u32 = 36;
pub const AVATAR_LARGE: u32 = 128;

/// Gravatar identicon for an email address.
pub fn avatar(email: &str, size: u32) -> String {
    let digest = hex::encode(Md5::digest(email.trim().to_lowercase().as_bytes()));
    format!("https://www.gravatar.com/avatar/{digest}?d=identicon&s={size}")
}

pub fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub fn parse_time(raw: &str, what: &str) -> DateTime<Utc> {
    murmur_db::parse_timestamp(raw).unwrap_or_else(|| {
        warn!("Corrupt {} timestamp '{}'", what, raw);
        DateTime::default()
    })
}

pub fn post_response(row: PostRow, locale: Locale) -> PostResponse {
    let translatable = !row.language.is_empty() && row.language != locale.code();
    PostResponse {
        id: parse_id(&row.id, "post id"),
        timestamp: parse_time(&row.timestamp, "post"),
        author: AuthorResponse {
            avatar: avatar(&row.author_email, AVATAR_SMALL),
            username: row.author_username,
        },
        body: row.body,
        language: row.language,
        translatable,
    }
}

pub fn message_response(row: MessageRow) -> MessageResponse {
    MessageResponse {
        id: parse_id(&row.id, "message id"),
        timestamp: parse_time(&row.timestamp, "message"),
        sender: AuthorResponse {
            avatar: avatar(&row.sender_email, AVATAR_SMALL),
            username: row.sender_username,
        },
        body: row.body,
    }
}

/// Profile header as seen by `viewer`.
pub struct Profile {
    pub user: UserRow,
    pub counts: FollowCounts,
    pub is_self: bool,
    pub is_following: bool,
}

pub fn user_summary(profile: Profile, csrf_token: String) -> UserSummary {
    let Profile {
        user,
        counts,
        is_self,
        is_following,
    } = profile;

    UserSummary {
        id: parse_id(&user.id, "user id"),
        avatar: avatar(&user.email, AVATAR_LARGE),
        last_seen: user.last_seen.as_deref().map(|ts| parse_time(ts, "last_seen")),
        username: user.username,
        about_me: user.about_me,
        followers: counts.followers,
        following: counts.following,
        is_self,
        is_following,
        csrf_token,
    }
}
