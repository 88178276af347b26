//! SQLite conversation store.
//!
//! Conversations and their messages live in `.taxbot/conversations.db`. A
//! turn is written as one transaction holding both the user message and the
//! answer, so a turn that failed leaves no trace.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use taxbot_core::{AppError, AppResult};
use taxbot_llm::{ChatMessage, Role};

/// Characters of the first question kept as a conversation title.
const TITLE_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: u32,
    pub updated_at: DateTime<Utc>,
}

pub struct ConversationStore {
    conn: Connection,
}

fn db_err(context: &str, e: rusqlite::Error) -> AppError {
    AppError::Persistence(format!("{}: {}", context, e))
}

impl ConversationStore {
    /// Open (creating if needed) the store at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Persistence(format!("Failed to create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| db_err("Failed to open conversation store", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            "#,
        )
        .map_err(|e| db_err("Failed to create tables", e))?;

        tracing::debug!("Opened conversation store at {:?}", db_path);
        Ok(Self { conn })
    }

    pub fn exists(&self, conversation_id: &str) -> AppResult<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM conversations WHERE id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("Failed to look up conversation", e))?;
        Ok(found.is_some())
    }

    /// Messages of a conversation in the order they were written.
    pub fn history(&self, conversation_id: &str) -> AppResult<Vec<ChatMessage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT role, content FROM messages WHERE conversation_id = ?1 ORDER BY id")
            .map_err(|e| db_err("Failed to prepare history query", e))?;

        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| db_err("Failed to read history", e))?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content) = row.map_err(|e| db_err("Failed to read message", e))?;
            let role = Role::parse(&role).ok_or_else(|| {
                AppError::Persistence(format!("Unknown message role '{}'", role))
            })?;
            messages.push(ChatMessage::new(role, content));
        }
        Ok(messages)
    }

    /// Record a completed turn, creating the conversation on its first turn.
    pub fn append_turn(
        &mut self,
        conversation_id: &str,
        question: &str,
        answer: &str,
    ) -> AppResult<()> {
        let now = Utc::now().to_rfc3339();
        let title: String = question.chars().take(TITLE_CHARS).collect();

        let tx = self
            .conn
            .transaction()
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        tx.execute(
            "INSERT OR IGNORE INTO conversations (id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![conversation_id, title, now],
        )
        .map_err(|e| db_err("Failed to insert conversation", e))?;

        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )
        .map_err(|e| db_err("Failed to update conversation", e))?;

        for (role, content) in [(Role::User, question), (Role::Assistant, answer)] {
            tx.execute(
                "INSERT INTO messages (conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role.as_str(), content, now],
            )
            .map_err(|e| db_err("Failed to insert message", e))?;
        }

        tx.commit().map_err(|e| db_err("Failed to commit turn", e))
    }

    /// All conversations, most recently updated first.
    pub fn list(&self) -> AppResult<Vec<ConversationSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT c.id, c.title, c.updated_at, COUNT(m.id)
                 FROM conversations c LEFT JOIN messages m ON m.conversation_id = c.id
                 GROUP BY c.id
                 ORDER BY c.updated_at DESC",
            )
            .map_err(|e| db_err("Failed to prepare list query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(|e| db_err("Failed to list conversations", e))?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, title, updated_at, count) =
                row.map_err(|e| db_err("Failed to read conversation", e))?;
            let updated_at = DateTime::parse_from_rfc3339(&updated_at)
                .map_err(|e| AppError::Persistence(format!("Bad timestamp '{}': {}", updated_at, e)))?
                .with_timezone(&Utc);
            summaries.push(ConversationSummary {
                id,
                title,
                message_count: count as u32,
                updated_at,
            });
        }
        Ok(summaries)
    }
}
