//! SQLite-backed conversation store.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{RelayError, RelayResult};

use super::types::{
    Conversation, ConversationId, ConversationSummary, Message, MessageId, PLACEHOLDER_TITLE, Role,
};

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistence contract for conversations and their messages.
///
/// Every operation is scoped to a single conversation aggregate.
pub trait ConversationStore: Send + Sync {
    /// Load a conversation and all of its messages.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_by_session(&self, session_id: &str)
    -> StoreFuture<'_, RelayResult<Option<Conversation>>>;

    /// Create an empty conversation with the placeholder title.
    ///
    /// # Errors
    /// Returns [`RelayError::Validation`] if the session already exists.
    fn create(&self, session_id: &str) -> StoreFuture<'_, RelayResult<Conversation>>;

    /// Load the conversation for `session_id`, creating it first if needed.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_or_create(&self, session_id: &str) -> StoreFuture<'_, RelayResult<Conversation>>;

    /// Append a message at the end of a conversation and touch its `updated_at`.
    ///
    /// # Errors
    /// Returns [`RelayError::NotFound`] if the conversation does not exist.
    fn append(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: &str,
    ) -> StoreFuture<'_, RelayResult<Message>>;

    /// Replace a conversation's title and touch its `updated_at`.
    ///
    /// # Errors
    /// Returns [`RelayError::NotFound`] if the conversation does not exist.
    fn rename(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, RelayResult<Conversation>>;

    /// List every conversation, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_all(&self) -> StoreFuture<'_, RelayResult<Vec<ConversationSummary>>>;
}

/// Millisecond clock that never repeats or goes backwards.
///
/// Keeps "most recently updated" a strict order even when several writes land
/// in the same millisecond.
#[derive(Debug, Default)]
struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    const fn starting_after(last_ms: i64) -> Self {
        Self {
            last_ms: AtomicI64::new(last_ms),
        }
    }

    fn now_ms(&self) -> i64 {
        let wall = Utc::now().timestamp_millis();
        let mut prev = self.last_ms.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev.saturating_add(1));
            match self
                .last_ms
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated
        ON conversations (updated_at DESC);
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages (conversation_id, id);";

const SELECT_CONVERSATION: &str =
    "SELECT id, session_id, title, created_at, updated_at FROM conversations";

struct ConversationRow {
    id: i64,
    session_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

struct MessageRow {
    id: i64,
    conversation_id: i64,
    role: String,
    content: String,
    created_at: i64,
}

type RawConversation = (ConversationRow, Vec<MessageRow>);

fn read_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn load_messages(
    conn: &rusqlite::Connection,
    row: ConversationRow,
) -> rusqlite::Result<RawConversation> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY id",
    )?;
    let messages = stmt
        .query_map([row.id], |r| {
            Ok(MessageRow {
                id: r.get(0)?,
                conversation_id: r.get(1)?,
                role: r.get(2)?,
                content: r.get(3)?,
                created_at: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok((row, messages))
}

fn select_by_session(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> rusqlite::Result<Option<RawConversation>> {
    let row = conn
        .query_row(
            &format!("{SELECT_CONVERSATION} WHERE session_id = ?1"),
            [session_id],
            read_conversation_row,
        )
        .optional()?;
    row.map(|row| load_messages(conn, row)).transpose()
}

fn millis_to_utc(ms: i64) -> RelayResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| RelayError::InvalidRecord(format!("invalid timestamp: {ms}")))
}

fn into_message(row: MessageRow) -> RelayResult<Message> {
    let role = Role::from_str(&row.role)
        .map_err(|err| RelayError::InvalidRecord(format!("invalid role: {err}")))?;
    Ok(Message {
        id: MessageId(row.id),
        conversation_id: ConversationId(row.conversation_id),
        role,
        content: row.content,
        created_at: millis_to_utc(row.created_at)?,
    })
}

fn into_conversation((row, messages): RawConversation) -> RelayResult<Conversation> {
    Ok(Conversation {
        id: ConversationId(row.id),
        session_id: row.session_id,
        title: row.title,
        messages: messages
            .into_iter()
            .map(into_message)
            .collect::<RelayResult<Vec<_>>>()?,
        created_at: millis_to_utc(row.created_at)?,
        updated_at: millis_to_utc(row.updated_at)?,
    })
}

/// `SQLite` implementation of [`ConversationStore`].
pub struct SqliteConversationStore {
    conn: Connection,
    clock: MonotonicClock,
}

impl SqliteConversationStore {
    /// Open (or create) the database file named in `config`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(config: &StorageConfig) -> RelayResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        Self::with_connection(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory() -> RelayResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    /// Initialize the schema on an existing connection.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub async fn with_connection(conn: Connection) -> RelayResult<Self> {
        let last_ms = conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                let last: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(updated_at), 0) FROM conversations",
                    [],
                    |row| row.get(0),
                )?;
                Ok(last)
            })
            .await?;

        Ok(Self {
            conn,
            clock: MonotonicClock::starting_after(last_ms),
        })
    }
}

impl ConversationStore for SqliteConversationStore {
    fn find_by_session(
        &self,
        session_id: &str,
    ) -> StoreFuture<'_, RelayResult<Option<Conversation>>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let raw = self
                .conn
                .call(move |conn| Ok(select_by_session(conn, &session_id)?))
                .await?;
            raw.map(into_conversation).transpose()
        })
    }

    fn create(&self, session_id: &str) -> StoreFuture<'_, RelayResult<Conversation>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let now = self.clock.now_ms();
            let key = session_id.clone();
            let inserted = self
                .conn
                .call(move |conn| {
                    let result = conn.execute(
                        "INSERT INTO conversations (session_id, title, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?3)",
                        rusqlite::params![key, PLACEHOLDER_TITLE, now],
                    );
                    match result {
                        Ok(_) => Ok(Some(conn.last_insert_rowid())),
                        Err(rusqlite::Error::SqliteFailure(err, _))
                            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                        {
                            Ok(None)
                        }
                        Err(err) => Err(err.into()),
                    }
                })
                .await?;

            let id = inserted.ok_or_else(|| {
                RelayError::Validation(format!("session `{session_id}` already exists"))
            })?;
            debug!("Created conversation {id} for session {session_id}");

            let created_at = millis_to_utc(now)?;
            Ok(Conversation {
                id: ConversationId(id),
                session_id,
                title: PLACEHOLDER_TITLE.to_string(),
                messages: Vec::new(),
                created_at,
                updated_at: created_at,
            })
        })
    }

    fn get_or_create(&self, session_id: &str) -> StoreFuture<'_, RelayResult<Conversation>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let now = self.clock.now_ms();
            let (created, raw) = self
                .conn
                .call(move |conn| {
                    let created = conn.execute(
                        "INSERT OR IGNORE INTO conversations (session_id, title, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?3)",
                        rusqlite::params![session_id, PLACEHOLDER_TITLE, now],
                    )?;
                    let raw = select_by_session(conn, &session_id)?
                        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                    Ok((created > 0, raw))
                })
                .await?;

            let conversation = into_conversation(raw)?;
            if created {
                debug!(
                    "Created conversation {} for session {}",
                    conversation.id, conversation.session_id
                );
            }
            Ok(conversation)
        })
    }

    fn append(
        &self,
        conversation_id: ConversationId,
        role: Role,
        content: &str,
    ) -> StoreFuture<'_, RelayResult<Message>> {
        let content = content.to_string();
        Box::pin(async move {
            let now = self.clock.now_ms();
            let id = conversation_id.get();
            let stored = content.clone();
            let message_id = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let touched = tx.execute(
                        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![now, id],
                    )?;
                    if touched == 0 {
                        return Ok(None);
                    }
                    tx.execute(
                        "INSERT INTO messages (conversation_id, role, content, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![id, role.as_str(), stored, now],
                    )?;
                    let message_id = tx.last_insert_rowid();
                    tx.commit()?;
                    Ok(Some(message_id))
                })
                .await?;

            let message_id = message_id
                .ok_or_else(|| RelayError::NotFound(format!("conversation id {conversation_id}")))?;

            Ok(Message {
                id: MessageId(message_id),
                conversation_id,
                role,
                content,
                created_at: millis_to_utc(now)?,
            })
        })
    }

    fn rename(
        &self,
        conversation_id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, RelayResult<Conversation>> {
        let title = title.to_string();
        Box::pin(async move {
            let now = self.clock.now_ms();
            let id = conversation_id.get();
            let raw = self
                .conn
                .call(move |conn| {
                    let touched = conn.execute(
                        "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![title, now, id],
                    )?;
                    if touched == 0 {
                        return Ok(None);
                    }
                    let row = conn.query_row(
                        &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                        [id],
                        read_conversation_row,
                    )?;
                    Ok(Some(load_messages(conn, row)?))
                })
                .await?;

            raw.map(into_conversation)
                .transpose()?
                .ok_or_else(|| RelayError::NotFound(format!("conversation id {conversation_id}")))
        })
    }

    fn list_all(&self) -> StoreFuture<'_, RelayResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(|conn| {
                    let mut stmt = conn.prepare(
                        "SELECT c.id, c.session_id, c.title, c.created_at, c.updated_at, COUNT(m.id)
                         FROM conversations c
                         LEFT JOIN messages m ON m.conversation_id = c.id
                         GROUP BY c.id
                         ORDER BY c.updated_at DESC, c.id DESC",
                    )?;
                    let rows = stmt
                        .query_map([], |row| {
                            let conversation = read_conversation_row(row)?;
                            let count: i64 = row.get(5)?;
                            Ok((conversation, count))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut summaries = Vec::with_capacity(rows.len());
            for (row, count) in rows {
                let message_count = u32::try_from(count).map_err(|_| {
                    RelayError::InvalidRecord(format!("invalid message count: {count}"))
                })?;
                summaries.push(ConversationSummary {
                    id: ConversationId(row.id),
                    session_id: row.session_id,
                    title: row.title,
                    created_at: millis_to_utc(row.created_at)?,
                    updated_at: millis_to_utc(row.updated_at)?,
                    message_count,
                });
            }
            Ok(summaries)
        })
    }
}
