use crate::models::{FollowCounts, MessageRow, NotificationRow, PostRow, TaskRow, UserRow};
use crate::{Database, format_timestamp};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "id, username, email, password_hash, about_me, last_seen, last_message_read_time, created_at";

const POST_SELECT: &str = "SELECT p.id, p.body, p.language, p.timestamp, p.user_id, u.username, u.email
     FROM posts p
     JOIN users u ON p.user_id = u.id";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<()> {
        let created_at = format_timestamp(chrono::Utc::now());
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, username, email, password_hash, &created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn touch_last_seen(&self, id: &str, now: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE users SET last_seen = ?2 WHERE id = ?1", (id, now))?;
            Ok(())
        })
    }

    pub fn update_profile(&self, id: &str, username: &str, about_me: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET username = ?2, about_me = ?3 WHERE id = ?1",
                rusqlite::params![id, username, about_me],
            )?;
            Ok(())
        })
    }

    pub fn set_password_hash(&self, id: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET password_hash = ?2 WHERE id = ?1",
                (id, password_hash),
            )?;
            Ok(())
        })
    }

    // -- Follow graph --

    /// Adds the edge unless it already exists. Returns whether a row was inserted.
    pub fn follow(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO followers (follower_id, followed_id) VALUES (?1, ?2)",
                (follower_id, followed_id),
            )?;
            Ok(n > 0)
        })
    }

    /// Removes the edge if present. Returns whether a row was deleted.
    pub fn unfollow(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "DELETE FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
                (follower_id, followed_id),
            )?;
            Ok(n > 0)
        })
    }

    pub fn is_following(&self, follower_id: &str, followed_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM followers WHERE follower_id = ?1 AND followed_id = ?2)",
                (follower_id, followed_id),
                |row| row.get::<_, bool>(0),
            )?;
            Ok(found)
        })
    }

    pub fn follow_counts(&self, user_id: &str) -> Result<FollowCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM followers WHERE followed_id = ?1),
                    (SELECT COUNT(*) FROM followers WHERE follower_id = ?1)",
                [user_id],
                |row| {
                    Ok(FollowCounts {
                        followers: row.get::<_, i64>(0)? as u64,
                        following: row.get::<_, i64>(1)? as u64,
                    })
                },
            )?;
            Ok(counts)
        })
    }

    // -- Posts --

    pub fn insert_post(
        &self,
        id: &str,
        user_id: &str,
        body: &str,
        language: &str,
        timestamp: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO posts (id, body, language, timestamp, user_id) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, body, language, timestamp, user_id),
            )?;
            Ok(())
        })
    }

    /// Posts by users `user_id` follows, plus the user's own, newest first.
    pub fn following_posts(&self, user_id: &str, limit: u32, offset: u64) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT}
                     WHERE p.user_id = ?1
                        OR p.user_id IN (SELECT followed_id FROM followers WHERE follower_id = ?1)
                     ORDER BY p.timestamp DESC, p.rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                rusqlite::params![user_id, limit, offset as i64],
            )
        })
    }

    /// Every post, newest first.
    pub fn all_posts(&self, limit: u32, offset: u64) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT}
                     ORDER BY p.timestamp DESC, p.rowid DESC
                     LIMIT ?1 OFFSET ?2"
                ),
                rusqlite::params![limit, offset as i64],
            )
        })
    }

    /// One user's posts, newest first.
    pub fn user_posts(&self, user_id: &str, limit: u32, offset: u64) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT}
                     WHERE p.user_id = ?1
                     ORDER BY p.timestamp DESC, p.rowid DESC
                     LIMIT ?2 OFFSET ?3"
                ),
                rusqlite::params![user_id, limit, offset as i64],
            )
        })
    }

    /// One user's posts, oldest first, unpaginated. Used by the export job.
    pub fn all_user_posts(&self, user_id: &str) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            query_posts(
                conn,
                &format!(
                    "{POST_SELECT}
                     WHERE p.user_id = ?1
                     ORDER BY p.timestamp ASC, p.rowid ASC"
                ),
                [user_id],
            )
        })
    }

    /// Batch-fetch posts by id. Order of the result is unspecified.
    pub fn posts_by_ids(&self, ids: &[String]) -> Result<Vec<PostRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!("{POST_SELECT} WHERE p.id IN ({})", placeholders.join(", "));
            let params: Vec<&dyn rusqlite::types::ToSql> = ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            query_posts(conn, &sql, params.as_slice())
        })
    }

    // -- Messages --

    /// Stores a message and refreshes the recipient's unread counter
    /// notification in one transaction. `payload` renders the new unread
    /// count, which is also returned.
    pub fn send_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        timestamp: &str,
        stamp: NotificationStamp<'_>,
        payload: impl FnOnce(u64) -> String,
    ) -> Result<u64> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, body, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, sender_id, recipient_id, body, timestamp),
            )?;
            let unread = count_unread_messages(tx, recipient_id)?;
            replace_notification(tx, recipient_id, &stamp, &payload(unread))?;
            Ok(unread)
        })
    }

    /// Marks every received message as read by moving the user's read
    /// timestamp to `now`, and writes the unread counter notification with
    /// `payload_json`, the rendered zero count.
    pub fn mark_messages_read(
        &self,
        user_id: &str,
        now: &str,
        stamp: NotificationStamp<'_>,
        payload_json: &str,
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE users SET last_message_read_time = ?2 WHERE id = ?1",
                (user_id, now),
            )?;
            replace_notification(tx, user_id, &stamp, payload_json)?;
            Ok(())
        })
    }

    pub fn unread_message_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| count_unread_messages(conn, user_id))
    }

    /// Messages received by `user_id`, newest first.
    pub fn received_messages(&self, user_id: &str, limit: u32, offset: u64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, u.username, u.email, m.recipient_id, m.body, m.timestamp
                 FROM messages m
                 JOIN users u ON m.sender_id = u.id
                 WHERE m.recipient_id = ?1
                 ORDER BY m.timestamp DESC, m.rowid DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, offset as i64], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_username: row.get(2)?,
                        sender_email: row.get(3)?,
                        recipient_id: row.get(4)?,
                        body: row.get(5)?,
                        timestamp: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_messages_from(&self, sender_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE sender_id = ?1",
                [sender_id],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }

    // -- Notifications --

    /// Writes a notification, superseding the user's earlier one of the same
    /// name. Returns the timestamp it was stored under.
    pub fn add_notification(
        &self,
        user_id: &str,
        stamp: NotificationStamp<'_>,
        payload_json: &str,
    ) -> Result<f64> {
        self.with_tx(|tx| replace_notification(tx, user_id, &stamp, payload_json))
    }

    /// Notifications newer than `since`, oldest first.
    pub fn notifications_since(&self, user_id: &str, since: f64) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, user_id, timestamp, payload_json
                 FROM notifications
                 WHERE user_id = ?1 AND timestamp > ?2
                 ORDER BY timestamp ASC",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, since], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        user_id: row.get(2)?,
                        timestamp: row.get(3)?,
                        payload_json: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Tasks --

    /// Creates a task row unless the user already has an incomplete task of
    /// the same name. The check and the insert share one transaction.
    pub fn launch_task_if_idle(
        &self,
        id: &str,
        name: &str,
        description: &str,
        user_id: &str,
    ) -> Result<Option<TaskRow>> {
        self.with_tx(|tx| {
            if query_task_in_progress(tx, user_id, name)?.is_some() {
                return Ok(None);
            }
            tx.execute(
                "INSERT INTO tasks (id, name, description, user_id, complete) VALUES (?1, ?2, ?3, ?4, 0)",
                (id, name, description, user_id),
            )?;
            Ok(Some(TaskRow {
                id: id.to_string(),
                name: name.to_string(),
                description: Some(description.to_string()),
                user_id: user_id.to_string(),
                complete: false,
            }))
        })
    }

    pub fn task_in_progress(&self, user_id: &str, name: &str) -> Result<Option<TaskRow>> {
        self.with_conn(|conn| query_task_in_progress(conn, user_id, name))
    }

    pub fn complete_task(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE tasks SET complete = 1 WHERE id = ?1", [id])?;
            Ok(())
        })
    }
}

/// Identity of a notification about to be written. `now` is the writer's
/// clock in float epoch seconds.
#[derive(Debug, Clone, Copy)]
pub struct NotificationStamp<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub now: f64,
}

/// Smallest step between two notifications of one user.
const NOTIFICATION_TICK: f64 = 1e-6;

/// Replaces the user's notification of the same name. The stored timestamp
/// is `now`, bumped past the user's newest notification so that the last
/// write to commit always sorts last for pollers.
fn replace_notification(
    conn: &Connection,
    user_id: &str,
    stamp: &NotificationStamp<'_>,
    payload_json: &str,
) -> Result<f64> {
    let latest: Option<f64> = conn.query_row(
        "SELECT MAX(timestamp) FROM notifications WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    let timestamp = match latest {
        Some(latest) if latest + NOTIFICATION_TICK > stamp.now => latest + NOTIFICATION_TICK,
        _ => stamp.now,
    };

    conn.execute(
        "DELETE FROM notifications WHERE user_id = ?1 AND name = ?2",
        (user_id, stamp.name),
    )?;
    conn.execute(
        "INSERT INTO notifications (id, name, user_id, timestamp, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![stamp.id, stamp.name, user_id, timestamp, payload_json],
    )?;
    Ok(timestamp)
}

fn count_unread_messages(conn: &Connection, user_id: &str) -> Result<u64> {
    // A NULL read time means the inbox was never opened: everything is unread.
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages m
         JOIN users u ON u.id = m.recipient_id
         WHERE m.recipient_id = ?1
           AND (u.last_message_read_time IS NULL OR m.timestamp > u.last_message_read_time)",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"
    ))?;

    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        about_me: row.get(4)?,
        last_seen: row.get(5)?,
        last_message_read_time: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_posts<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<PostRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(PostRow {
                id: row.get(0)?,
                body: row.get(1)?,
                language: row.get(2)?,
                timestamp: row.get(3)?,
                user_id: row.get(4)?,
                author_username: row.get(5)?,
                author_email: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_task_in_progress(conn: &Connection, user_id: &str, name: &str) -> Result<Option<TaskRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, description, user_id, complete FROM tasks
             WHERE user_id = ?1 AND name = ?2 AND complete = 0",
            (user_id, name),
            |row| {
                Ok(TaskRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    user_id: row.get(3)?,
                    complete: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn new_user(db: &Database, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, &format!("{username}@example.com"), "hash")
            .unwrap();
        id
    }

    fn post_at(db: &Database, user_id: &str, body: &str, ts: &str) {
        db.insert_post(&Uuid::new_v4().to_string(), user_id, body, "en", ts)
            .unwrap();
    }

    fn unread_stamp(id: &str, now: f64) -> NotificationStamp<'_> {
        NotificationStamp {
            id,
            name: "unread_message_count",
            now,
        }
    }

    fn count(n: u64) -> String {
        n.to_string()
    }

    #[test]
    fn follow_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        let b = new_user(&db, "b");

        assert!(db.follow(&a, &b).unwrap());
        assert!(!db.follow(&a, &b).unwrap());
        assert!(db.is_following(&a, &b).unwrap());
        assert!(!db.is_following(&b, &a).unwrap());
        assert_eq!(db.follow_counts(&b).unwrap(), FollowCounts { followers: 1, following: 0 });

        assert!(db.unfollow(&a, &b).unwrap());
        assert!(!db.unfollow(&a, &b).unwrap());
        assert!(!db.is_following(&a, &b).unwrap());
    }

    #[test]
    fn self_follow_violates_check_constraint() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        assert!(db.follow(&a, &a).is_err());
    }

    #[test]
    fn following_posts_include_own_and_followed_only() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        let b = new_user(&db, "b");
        let c = new_user(&db, "c");
        db.follow(&a, &b).unwrap();

        post_at(&db, &a, "mine", "2024-01-01T00:00:01.000000Z");
        post_at(&db, &b, "followed", "2024-01-01T00:00:02.000000Z");
        post_at(&db, &c, "stranger", "2024-01-01T00:00:03.000000Z");

        let bodies: Vec<String> = db
            .following_posts(&a, 10, 0)
            .unwrap()
            .into_iter()
            .map(|p| p.body)
            .collect();
        assert_eq!(bodies, vec!["followed", "mine"]);

        assert_eq!(db.all_posts(10, 0).unwrap().len(), 3);
        assert_eq!(db.all_posts(10, 0).unwrap()[0].body, "stranger");
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        for body in ["one", "two", "three"] {
            post_at(&db, &a, body, "2024-01-01T00:00:00.000000Z");
        }
        let bodies: Vec<String> = db.user_posts(&a, 10, 0).unwrap().into_iter().map(|p| p.body).collect();
        assert_eq!(bodies, vec!["three", "two", "one"]);
        let oldest_first: Vec<String> = db.all_user_posts(&a).unwrap().into_iter().map(|p| p.body).collect();
        assert_eq!(oldest_first, vec!["one", "two", "three"]);
    }

    #[test]
    fn unread_count_tracks_read_time() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        let b = new_user(&db, "b");

        let unread = db
            .send_message("m1", &a, &b, "hi", "2024-01-01T00:00:01.000000Z", unread_stamp("n1", 1.0), count)
            .unwrap();
        assert_eq!(unread, 1);
        let unread = db
            .send_message("m2", &a, &b, "again", "2024-01-01T00:00:02.000000Z", unread_stamp("n2", 2.0), count)
            .unwrap();
        assert_eq!(unread, 2);

        db.mark_messages_read(&b, "2024-01-01T00:00:03.000000Z", unread_stamp("n3", 3.0), "0")
            .unwrap();
        assert_eq!(db.unread_message_count(&b).unwrap(), 0);

        let rows = db.notifications_since(&b, 0.0).unwrap();
        assert_eq!(rows.len(), 1, "same-name notifications supersede each other");
        assert_eq!(rows[0].payload_json, "0");

        let inbox = db.received_messages(&b, 10, 0).unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].body, "again");
        assert_eq!(inbox[0].sender_username, "a");
    }

    #[test]
    fn notifications_since_is_strictly_greater() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        let progress = NotificationStamp {
            id: "n1",
            name: "task_progress",
            now: 10.0,
        };
        db.add_notification(&a, progress, "{}").unwrap();
        db.add_notification(&a, unread_stamp("n2", 20.0), "1").unwrap();

        let all = db.notifications_since(&a, 0.0).unwrap();
        assert_eq!(all.iter().map(|n| n.timestamp).collect::<Vec<_>>(), vec![10.0, 20.0]);
        assert_eq!(db.notifications_since(&a, 10.0).unwrap().len(), 1);
        assert!(db.notifications_since(&a, 20.0).unwrap().is_empty());
    }

    #[test]
    fn late_commit_with_older_clock_still_reaches_pollers() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        let b = new_user(&db, "b");

        // Two sends whose clocks were read in one order but committed in the other.
        db.send_message("m1", &a, &b, "first", "2024-01-01T00:00:02.000000Z", unread_stamp("n1", 2.0), count)
            .unwrap();
        let seen = db.notifications_since(&b, 0.0).unwrap();
        assert_eq!(seen[0].payload_json, "1");
        let cursor = seen[0].timestamp;

        db.send_message("m2", &a, &b, "second", "2024-01-01T00:00:01.000000Z", unread_stamp("n2", 1.0), count)
            .unwrap();
        let fresh = db.notifications_since(&b, cursor).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].payload_json, "2");
        assert!(fresh[0].timestamp > cursor);
    }

    #[test]
    fn notification_clock_is_kept_when_ahead() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");
        assert_eq!(db.add_notification(&a, unread_stamp("n1", 5.0), "1").unwrap(), 5.0);
        assert_eq!(db.add_notification(&a, unread_stamp("n2", 7.5), "2").unwrap(), 7.5);
        let bumped = db.add_notification(&a, unread_stamp("n3", 7.5), "3").unwrap();
        assert!(bumped > 7.5);
    }

    #[test]
    fn only_one_task_in_progress_per_name() {
        let db = Database::open_in_memory().unwrap();
        let a = new_user(&db, "a");

        assert!(db.launch_task_if_idle("t1", "export_posts", "Exporting", &a).unwrap().is_some());
        assert!(db.launch_task_if_idle("t2", "export_posts", "Exporting", &a).unwrap().is_none());
        assert_eq!(db.task_in_progress(&a, "export_posts").unwrap().unwrap().id, "t1");

        db.complete_task("t1").unwrap();
        assert!(db.task_in_progress(&a, "export_posts").unwrap().is_none());
        assert!(db.launch_task_if_idle("t3", "export_posts", "Exporting", &a).unwrap().is_some());
    }
}
