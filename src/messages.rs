use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::{Message, MessageDetail, ReadReceipt, ReceivedMessage, SentMessage, UserSummary};
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

/// Message store. Listings are ordered by `sent_at`, then `id`, oldest first,
/// and an empty listing is a normal result.
#[derive(Clone)]
pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, from_username: &str, to_username: &str, body: &str) -> AppResult<Message> {
        let result = sqlx::query(
            "INSERT INTO messages (from_username, to_username, body, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(from_username)
        .bind(to_username)
        .bind(body)
        .bind(Utc::now())
        .execute(self.pool.as_ref())
        .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(sqlx::Error::Database(db_err)) if db_err.is_foreign_key_violation() => {
                return Err(AppError::NotFound("User"));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(id, from = from_username, to = to_username, "message stored");

        let message = sqlx::query_as::<_, Message>(
            "SELECT id, from_username, to_username, body, sent_at, read_at FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(message)
    }

    pub async fn get(&self, id: i64) -> AppResult<MessageDetail> {
        let row = sqlx::query(
            r#"
            SELECT
                m.id, m.body, m.sent_at, m.read_at,
                f.username AS from_username, f.first_name AS from_first_name,
                f.last_name AS from_last_name, f.phone AS from_phone,
                t.username AS to_username, t.first_name AS to_first_name,
                t.last_name AS to_last_name, t.phone AS to_phone
            FROM messages m
            JOIN users f ON m.from_username = f.username
            JOIN users t ON m.to_username = t.username
            WHERE m.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?
        .ok_or(AppError::NotFound("Message"))?;

        Ok(MessageDetail {
            id: row.get("id"),
            from_user: summary(&row, "from_"),
            to_user: summary(&row, "to_"),
            body: row.get("body"),
            sent_at: row.get("sent_at"),
            read_at: row.get("read_at"),
        })
    }

    pub async fn mark_read(&self, id: i64) -> AppResult<ReadReceipt> {
        let result = sqlx::query("UPDATE messages SET read_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Message"));
        }

        let receipt = sqlx::query_as::<_, ReadReceipt>("SELECT id, read_at FROM messages WHERE id = ?")
            .bind(id)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(receipt)
    }

    pub async fn list_sent_by(&self, username: &str) -> AppResult<Vec<SentMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.body, m.sent_at, m.read_at,
                   u.username, u.first_name, u.last_name, u.phone
            FROM messages m
            JOIN users u ON m.to_username = u.username
            WHERE m.from_username = ?
            ORDER BY m.sent_at, m.id
            "#,
        )
        .bind(username)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .iter()
            .map(|row| SentMessage {
                id: row.get("id"),
                to_user: summary(row, ""),
                body: row.get("body"),
                sent_at: row.get("sent_at"),
                read_at: row.get("read_at"),
            })
            .collect())
    }

    pub async fn list_received_by(&self, username: &str) -> AppResult<Vec<ReceivedMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.body, m.sent_at, m.read_at,
                   u.username, u.first_name, u.last_name, u.phone
            FROM messages m
            JOIN users u ON m.from_username = u.username
            WHERE m.to_username = ?
            ORDER BY m.sent_at, m.id
            "#,
        )
        .bind(username)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .iter()
            .map(|row| ReceivedMessage {
                id: row.get("id"),
                from_user: summary(row, ""),
                body: row.get("body"),
                sent_at: row.get("sent_at"),
                read_at: row.get("read_at"),
            })
            .collect())
    }
}

fn summary(row: &SqliteRow, prefix: &str) -> UserSummary {
    UserSummary {
        username: row.get(format!("{prefix}username").as_str()),
        first_name: row.get(format!("{prefix}first_name").as_str()),
        last_name: row.get(format!("{prefix}last_name").as_str()),
        phone: row.get(format!("{prefix}phone").as_str()),
    }
}
