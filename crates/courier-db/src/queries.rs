use crate::Database;
use crate::models::{MessageRow, ProfileRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::Connection;
use uuid::Uuid;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        phone: &str,
    ) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, first_name, last_name, phone)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (username, password_hash, first_name, last_name, phone),
            )?;

            query_user_by_username(conn, username)?
                .ok_or_else(|| anyhow!("User {} vanished after insert", username))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    /// Best-effort last-login stamp. Unknown usernames are a no-op.
    pub fn touch_last_login(&self, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login_at = datetime('now') WHERE username = ?1",
                [username],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Allocate an id and sent_at, persist, and return the stored row.
    pub fn create_message(&self, from: &str, to: &str, body: &str) -> Result<MessageRow> {
        let id = Uuid::new_v4().to_string();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, from_username, to_username, body) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, from, to, body],
            )?;

            query_message(conn, &id)?.ok_or_else(|| anyhow!("Message {} vanished after insert", id))
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Fetch a message together with both party profiles.
    /// JOIN users twice to fetch sender and recipient in a single query
    /// (eliminates N+1).
    pub fn get_message_detail(
        &self,
        id: &str,
    ) -> Result<Option<(MessageRow, ProfileRow, ProfileRow)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.from_username, m.to_username, m.body, m.sent_at, m.read_at,
                        f.first_name, f.last_name, f.phone,
                        t.first_name, t.last_name, t.phone
                 FROM messages m
                 JOIN users f ON m.from_username = f.username
                 JOIN users t ON m.to_username = t.username
                 WHERE m.id = ?1",
            )?;

            let row = stmt
                .query_row([id], |row| {
                    let message = MessageRow {
                        id: row.get(0)?,
                        from_username: row.get(1)?,
                        to_username: row.get(2)?,
                        body: row.get(3)?,
                        sent_at: row.get(4)?,
                        read_at: row.get(5)?,
                    };
                    let from = ProfileRow {
                        username: message.from_username.clone(),
                        first_name: row.get(6)?,
                        last_name: row.get(7)?,
                        phone: row.get(8)?,
                    };
                    let to = ProfileRow {
                        username: message.to_username.clone(),
                        first_name: row.get(9)?,
                        last_name: row.get(10)?,
                        phone: row.get(11)?,
                    };
                    Ok((message, from, to))
                })
                .optional()?;

            Ok(row)
        })
    }

    /// Set read_at if not already set, then return the stored timestamp.
    /// Marking an already-read message keeps the original timestamp.
    /// Returns None if no such message exists.
    pub fn mark_read(&self, id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET read_at = datetime('now') WHERE id = ?1 AND read_at IS NULL",
                [id],
            )?;

            let read_at = conn
                .query_row("SELECT read_at FROM messages WHERE id = ?1", [id], |row| {
                    row.get::<_, Option<String>>(0)
                })
                .optional()?;

            Ok(read_at.flatten())
        })
    }
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT username, password, first_name, last_name, phone, last_login_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                username: row.get(0)?,
                password: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
                phone: row.get(4)?,
                last_login_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, from_username, to_username, body, sent_at, read_at
         FROM messages WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                from_username: row.get(1)?,
                to_username: row.get(2)?,
                body: row.get(3)?,
                sent_at: row.get(4)?,
                read_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
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
