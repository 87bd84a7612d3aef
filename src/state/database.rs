//! SQLite chat store with WAL mode.
//!
//! Owned by the chat layer, not the engine: the engine receives history and
//! returns pending state; this store is where the CLI keeps both between
//! turns.

use crate::state::schema;
use crate::types::*;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

/// The parley chat store.
pub struct ChatStore {
    conn: Connection,
}

impl ChatStore {
    /// Open (or create) the store at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema creation and migrations.
    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating chat store schema v{}", schema::SCHEMA_VERSION);
            self.conn
                .execute_batch(schema::CREATE_SCHEMA)
                .context("Failed to create schema")?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version < schema::SCHEMA_VERSION {
            self.conn.execute(
                "UPDATE schema_version SET version = ?1",
                params![schema::SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Get the current schema version (0 if uninitialized).
    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Chats
    // -----------------------------------------------------------------------

    /// Find the chat for a contact phone, creating it on first contact.
    pub fn create_or_get_chat(&self, phone: &str, name: &str) -> Result<ChatRecord> {
        let existing = self
            .conn
            .query_row(
                "SELECT id, contact_name, contact_phone, metadata_json, created_at
                 FROM chats WHERE contact_phone = ?1",
                params![phone],
                row_to_chat,
            )
            .optional()?;

        if let Some(chat) = existing {
            return Ok(chat);
        }

        let chat = ChatRecord {
            id: ulid::Ulid::new().to_string(),
            contact_name: name.to_string(),
            contact_phone: phone.to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO chats (id, contact_name, contact_phone, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat.id,
                chat.contact_name,
                chat.contact_phone,
                chat.metadata.to_string(),
                chat.created_at.to_rfc3339(),
            ],
        )?;
        Ok(chat)
    }

    pub fn chat_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Append one message to a chat.
    pub fn append_message(
        &self,
        chat_id: &str,
        direction: MessageDirection,
        content: &str,
    ) -> Result<String> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO messages (id, chat_id, direction, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                chat_id,
                direction.to_string(),
                content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// The most recent messages of a chat, oldest first, as detector history.
    pub fn recent_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT direction, content, created_at FROM messages
             WHERE chat_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let mut entries: Vec<HistoryEntry> = stmt
            .query_map(params![chat_id, limit as i64], |row| {
                let direction: String = row.get(0)?;
                let content: String = row.get(1)?;
                let created_at: String = row.get(2)?;
                Ok((direction, content, created_at))
            })?
            .filter_map(|r| r.ok())
            .map(|(direction, content, created_at)| HistoryEntry {
                role: if direction == "inbound" {
                    ChatRole::User
                } else {
                    ChatRole::Assistant
                },
                text: content,
                timestamp: chrono::DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    pub fn message_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Interactions
    // -----------------------------------------------------------------------

    /// Record an executed intention.
    pub fn save_interaction(&self, record: &InteractionRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO interactions (id, chat_id, tool_name, fields_json, succeeded, reply, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.chat_id,
                record.tool_name,
                record.fields.to_string(),
                record.succeeded as i32,
                record.reply,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn interaction_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM interactions", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Pending slot-filling state
    // -----------------------------------------------------------------------

    /// Store (or replace) the pending intention for a chat.
    pub fn set_pending(&self, chat_id: &str, pending: &PendingIntention) -> Result<()> {
        let json = serde_json::to_string(pending)?;
        self.conn.execute(
            "INSERT INTO pending_intentions (chat_id, pending_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET pending_json = ?2, updated_at = ?3",
            params![chat_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// The pending intention for a chat, if any.
    pub fn get_pending(&self, chat_id: &str) -> Result<Option<PendingIntention>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT pending_json FROM pending_intentions WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Drop the pending intention for a chat.
    pub fn clear_pending(&self, chat_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_intentions WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(())
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRecord> {
    let metadata_json: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    Ok(ChatRecord {
        id: row.get(0)?,
        contact_name: row.get(1)?,
        contact_phone: row.get(2)?,
        metadata: serde_json::from_str(&metadata_json)
            .unwrap_or_else(|_| serde_json::json!({})),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
