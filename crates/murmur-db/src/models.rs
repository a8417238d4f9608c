/// Database row types. These map directly to SQLite rows.
/// Distinct from murmur-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub about_me: Option<String>,
    pub last_seen: Option<String>,
    pub last_message_read_time: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowCounts {
    pub followers: u64,
    pub following: u64,
}

/// A post joined with the author columns needed to render it.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: String,
    pub body: String,
    pub language: String,
    pub timestamp: String,
    pub user_id: String,
    pub author_username: String,
    pub author_email: String,
}

/// A message joined with its sender.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub sender_email: String,
    pub recipient_id: String,
    pub body: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub timestamp: f64,
    pub payload_json: String,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub user_id: String,
    pub complete: bool,
}
