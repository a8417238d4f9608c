use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notifications written for a user and picked up by polling `/notifications`.
///
/// Each variant maps to a notification name; writing a notification replaces
/// the user's previous one of the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// Number of received messages newer than the user's last inbox visit.
    UnreadMessageCount(u64),

    /// Progress of a background task, 0..=100.
    TaskProgress { task_id: Uuid, progress: u8 },
}

impl NotificationEvent {
    pub const UNREAD_MESSAGE_COUNT: &'static str = "unread_message_count";
    pub const TASK_PROGRESS: &'static str = "task_progress";

    pub fn name(&self) -> &'static str {
        match self {
            Self::UnreadMessageCount(_) => Self::UNREAD_MESSAGE_COUNT,
            Self::TaskProgress { .. } => Self::TASK_PROGRESS,
        }
    }

    /// The payload stored alongside the name.
    pub fn data(&self) -> serde_json::Value {
        match self {
            Self::UnreadMessageCount(count) => serde_json::json!(count),
            Self::TaskProgress { task_id, progress } => {
                serde_json::json!({ "task_id": task_id, "progress": progress })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_progress_payload_shape() {
        let task_id = Uuid::new_v4();
        let event = NotificationEvent::TaskProgress { task_id, progress: 40 };
        assert_eq!(event.name(), "task_progress");
        assert_eq!(event.data()["progress"], 40);
        assert_eq!(event.data()["task_id"], task_id.to_string());
    }

    #[test]
    fn unread_count_payload_is_bare_number() {
        let event = NotificationEvent::UnreadMessageCount(3);
        assert_eq!(event.name(), "unread_message_count");
        assert_eq!(event.data(), serde_json::json!(3));
    }
}
