use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Session token claims. Issued at login, carried in the `session` cookie or
/// an `Authorization: Bearer` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

/// Password reset token claims. The field name keeps session tokens and reset
/// tokens from being accepted in each other's place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetClaims {
    pub reset_password: Uuid,
    pub exp: usize,
}

// -- Generic responses --

/// Outcome of a state-changing request: a user-visible message and the page a
/// browser client should move to next.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlashResponse {
    pub message: String,
    pub redirect: String,
}

/// Metadata for a form page (`GET` on a form route).
#[derive(Debug, Serialize, Deserialize)]
pub struct FormPage {
    pub title: String,
}

/// One page of a paginated listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub next_url: Option<String>,
    pub prev_url: Option<String>,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
    pub redirect: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordForm {
    pub password: String,
    pub password2: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorResponse {
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub avatar: String,
    pub about_me: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub followers: u64,
    pub following: u64,
    pub is_self: bool,
    pub is_following: bool,
    /// Token for the follow/unfollow confirmation form.
    pub csrf_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfilePage {
    pub user: UserSummary,
    pub posts: PageResponse<PostResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditProfileRequest {
    pub username: String,
    #[serde(default)]
    pub about_me: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EditProfileResponse {
    pub username: String,
    pub about_me: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FollowRequest {
    pub csrf_token: String,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub post: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub body: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
    pub author: AuthorResponse,
    /// True when the post is in a known language other than the reader's.
    pub translatable: bool,
}

// -- Translation --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub dest_language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub text: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender: AuthorResponse,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub name: String,
    pub data: serde_json::Value,
    pub timestamp: f64,
}
