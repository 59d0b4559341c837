use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{ArchiveError, Result};
use crate::logging::OperationTimer;
use crate::models::{IdentityMapping, MediaDescriptor, MessageRecord};
use crate::schema::{chats, lid_mappings, messages, messages_fts, sync_state};

// Type alias for the database connection pool
/// Single-connection SQLite pool
pub type DbPool = Pool<SqliteConnectionManager>;
/// Connection checked out of the pool
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const CREATE_TABLES: &str = include_str!("../migrations/2025-06-01-000000_create_tables/up.sql");
const CREATE_MESSAGES_FTS: &str =
    include_str!("../migrations/2025-06-01-000001_create_messages_fts/up.sql");
const CREATE_SYNC_STATE: &str = include_str!("../migrations/2025-06-02-000000_create_sync_state/up.sql");

const UPSERT_CHAT: &str = "
    INSERT INTO chats (jid, name, last_message_time) VALUES (?1, ?2, ?3)
    ON CONFLICT(jid) DO UPDATE SET
        name = CASE
            WHEN chats.name IS NULL OR chats.name = '' THEN excluded.name
            ELSE chats.name
        END,
        last_message_time = CASE
            WHEN chats.last_message_time IS NULL THEN excluded.last_message_time
            WHEN excluded.last_message_time > chats.last_message_time THEN excluded.last_message_time
            ELSE chats.last_message_time
        END";

const UPSERT_MESSAGE: &str = "
    INSERT INTO messages (
        id, chat_jid, sender, sender_name, content, timestamp, is_from_me,
        media_type, filename, url, media_key, file_sha256, file_enc_sha256, file_length
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
    ON CONFLICT(id, chat_jid) DO UPDATE SET
        sender = excluded.sender,
        sender_name = excluded.sender_name,
        content = excluded.content,
        timestamp = excluded.timestamp,
        is_from_me = excluded.is_from_me,
        media_type = excluded.media_type,
        filename = excluded.filename,
        url = excluded.url,
        media_key = excluded.media_key,
        file_sha256 = excluded.file_sha256,
        file_enc_sha256 = excluded.file_enc_sha256,
        file_length = excluded.file_length";

const UPSERT_LID_MAPPING: &str = "
    INSERT INTO lid_mappings (lid, phone, name, updated_at)
    VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)
    ON CONFLICT(lid) DO UPDATE SET
        phone = COALESCE(NULLIF(excluded.phone, ''), lid_mappings.phone),
        name = COALESCE(NULLIF(excluded.name, ''), lid_mappings.name),
        updated_at = CURRENT_TIMESTAMP";

/// Handle to the local message store.
///
/// The pool holds exactly one connection, so every write (and every read)
/// serializes through it. Cloning the store shares the pool.
#[derive(Clone, Debug)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    /// Open the store at `path` with default pool settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let config = StoreConfig {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..StoreConfig::default()
        };
        Self::open_with(&config)
    }

    /// Open (creating if needed) the store and bring its schema and
    /// full-text index up to date. Safe to call on every start.
    pub fn open_with(config: &StoreConfig) -> Result<Self> {
        let path = config.path();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ArchiveError::Configuration(format!("failed to create db dir {}: {e}", parent.display()))
            })?;
        }

        // Set up connection manager and a single-connection pool
        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .map_err(|e| {
                ArchiveError::Configuration(format!("failed to open messages db {}: {e}", path.display()))
            })?;

        // Run migrations
        let conn = pool.get()?;
        run_migrations(&conn)?;
        drop(conn);

        debug!(path = %path.display(), "Message store opened");
        Ok(Self { pool })
    }

    /// Get the (single) connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Create or advance a chat row. See [`upsert_chat`].
    pub fn upsert_chat(&self, jid: &str, name: &str, last_message_time: Option<DateTime<Utc>>) -> Result<()> {
        let conn = self.get_connection()?;
        upsert_chat(&conn, jid, name, last_message_time)
    }

    /// Create a chat row if it does not exist yet, without touching its time.
    pub fn ensure_chat(&self, jid: &str, name: &str) -> Result<()> {
        self.upsert_chat(jid, name, None)
    }

    /// Stored chat name: `None` when the chat does not exist, `Some("")` when unnamed.
    pub fn chat_name(&self, jid: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        chat_name(&conn, jid)
    }

    /// Overwrite a chat's name.
    pub fn set_chat_name(&self, jid: &str, name: &str) -> Result<bool> {
        let conn = self.get_connection()?;
        set_chat_name(&conn, jid, name)
    }

    /// Idempotent message upsert keyed by (id, chat).
    pub fn upsert_message(&self, record: &MessageRecord) -> Result<()> {
        let conn = self.get_connection()?;
        upsert_message(&conn, record)
    }

    /// Full stored row for a message key.
    pub fn message(&self, id: &str, chat_jid: &str) -> Result<Option<MessageRecord>> {
        let conn = self.get_connection()?;
        message(&conn, id, chat_jid)
    }

    /// Delete a message; returns whether a row was removed.
    pub fn delete_message(&self, id: &str, chat_jid: &str) -> Result<bool> {
        let conn = self.get_connection()?;
        let removed = conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                messages::TABLE,
                messages::ID,
                messages::CHAT_JID
            ),
            params![id, chat_jid],
        )?;
        Ok(removed > 0)
    }

    /// Media descriptor of a stored message, complete enough to download.
    pub fn media_descriptor(&self, id: &str, chat_jid: &str) -> Result<MediaDescriptor> {
        let record = self
            .message(id, chat_jid)?
            .ok_or_else(|| ArchiveError::NotFound(format!("message {id} in {chat_jid}")))?;
        let media = record.media.unwrap_or_default();
        if let Some(missing) = media.first_missing_field() {
            return Err(ArchiveError::IncompleteMedia {
                message_id: id.to_string(),
                missing,
            });
        }
        Ok(media)
    }

    /// Merge a secondary-identifier mapping. Empty values never clobber.
    pub fn store_identity_mapping(&self, lid: &str, phone: &str, name: &str) -> Result<()> {
        let conn = self.get_connection()?;
        store_identity_mapping(&conn, lid, phone, name)
    }

    /// Mapping row for a secondary identifier user part.
    pub fn identity_mapping(&self, lid: &str) -> Result<Option<IdentityMapping>> {
        let conn = self.get_connection()?;
        identity_mapping(&conn, lid)
    }

    /// Time of the last completed sync attempt, if any.
    pub fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.get_connection()?;
        let secs: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = 1",
                    sync_state::LAST_SYNC_TIME,
                    sync_state::TABLE,
                    sync_state::ID
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(secs.map(from_unix))
    }

    /// Record the time of the latest sync attempt.
    pub fn set_last_sync_time(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {table} ({id}, {col}) VALUES (1, ?1)
                 ON CONFLICT({id}) DO UPDATE SET {col} = excluded.{col}",
                table = sync_state::TABLE,
                id = sync_state::ID,
                col = sync_state::LAST_SYNC_TIME
            ),
            params![at.timestamp()],
        )?;
        Ok(())
    }
}

/// Run database migrations
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;

    // Databases written before sender names were stored
    if !column_exists(conn, messages::TABLE, messages::SENDER_NAME)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            messages::TABLE,
            messages::SENDER_NAME
        ))?;
        info!("Added sender_name column to messages");
    }

    let had_index = table_exists(conn, messages_fts::TABLE)?;
    conn.execute_batch(CREATE_MESSAGES_FTS).map_err(capability_error)?;
    if !table_exists(conn, messages_fts::TABLE)? {
        return Err(ArchiveError::Capability {
            feature: "FTS5",
            detail: format!("{} not present after migration", messages_fts::TABLE),
        });
    }
    if !had_index {
        rebuild_index(conn)?;
    }

    normalize_legacy_times(conn)?;

    conn.execute_batch(CREATE_SYNC_STATE)?;
    Ok(())
}

/// Older databases stored times as text such as `2024-01-01 10:00:00+00:00`.
/// Text sorts above every integer in SQLite, so convert each parseable value
/// to unix seconds. Unparseable text is left alone.
fn normalize_legacy_times(conn: &Connection) -> Result<()> {
    for (table, column) in [
        (messages::TABLE, messages::TIMESTAMP),
        (chats::TABLE, chats::LAST_MESSAGE_TIME),
    ] {
        let converted = conn.execute(
            &format!(
                "UPDATE {table} SET {column} = CAST(strftime('%s', {column}) AS INTEGER)
                 WHERE typeof({column}) = 'text' AND strftime('%s', {column}) IS NOT NULL"
            ),
            [],
        )?;
        if converted > 0 {
            info!(table, column, count = converted, "Converted legacy text timestamps");
        }
    }
    Ok(())
}

fn capability_error(err: rusqlite::Error) -> ArchiveError {
    let text = err.to_string().to_lowercase();
    if text.contains("fts5") || text.contains("no such module") {
        ArchiveError::Capability {
            feature: "FTS5",
            detail: err.to_string(),
        }
    } else {
        ArchiveError::Database(err)
    }
}

/// Repopulate the full-text index from `messages.content`.
pub(crate) fn rebuild_index(conn: &Connection) -> Result<()> {
    let timer = OperationTimer::new("rebuild_messages_fts");
    conn.execute(
        &format!(
            "INSERT INTO {table}({table}) VALUES ('rebuild')",
            table = messages_fts::TABLE
        ),
        [],
    )?;
    timer.finish();
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Create a chat or advance an existing one.
///
/// A new row takes `name` as is. An existing row only gains a name while its
/// current one is empty, and its `last_message_time` only moves forward.
pub(crate) fn upsert_chat(
    conn: &Connection,
    jid: &str,
    name: &str,
    last_message_time: Option<DateTime<Utc>>,
) -> Result<()> {
    conn.execute(UPSERT_CHAT, params![jid, name, last_message_time.map(|t| t.timestamp())])?;
    Ok(())
}

pub(crate) fn chat_name(conn: &Connection, jid: &str) -> Result<Option<String>> {
    let name: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE {} = ?1", chats::NAME, chats::TABLE, chats::JID),
            params![jid],
            |row| row.get(0),
        )
        .optional()?;
    Ok(name.map(Option::unwrap_or_default))
}

pub(crate) fn set_chat_name(conn: &Connection, jid: &str, name: &str) -> Result<bool> {
    let updated = conn.execute(
        &format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", chats::TABLE, chats::NAME, chats::JID),
        params![name, jid],
    )?;
    Ok(updated > 0)
}

/// Last-write-wins upsert: every column of an existing row is replaced. The
/// row id is kept, so the update trigger re-indexes the new content.
/// Records without text or media are rejected.
pub(crate) fn upsert_message(conn: &Connection, record: &MessageRecord) -> Result<()> {
    if !record.has_payload() {
        return Err(ArchiveError::EmptyMessage(record.id.clone()));
    }
    let media = record.media.as_ref();
    conn.execute(
        UPSERT_MESSAGE,
        params![
            record.id,
            record.chat_jid,
            record.sender,
            record.sender_name,
            record.content,
            record.timestamp.timestamp(),
            record.is_from_me,
            media.map(|m| m.media_type.as_str()),
            media.and_then(|m| m.filename.as_deref()),
            media.and_then(|m| m.url.as_deref()),
            media.and_then(|m| m.media_key.as_deref()),
            media.and_then(|m| m.file_sha256.as_deref()),
            media.and_then(|m| m.file_enc_sha256.as_deref()),
            media.and_then(|m| m.file_length).and_then(|len| i64::try_from(len).ok()),
        ],
    )?;
    Ok(())
}

pub(crate) fn message(conn: &Connection, id: &str, chat_jid: &str) -> Result<Option<MessageRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT * FROM {} WHERE {} = ?1 AND {} = ?2",
                messages::TABLE,
                messages::ID,
                messages::CHAT_JID
            ),
            params![id, chat_jid],
            map_message_record,
        )
        .optional()?;
    Ok(record)
}

/// Map a database row to a `MessageRecord`
fn map_message_record(row: &Row) -> rusqlite::Result<MessageRecord> {
    let media_type: Option<String> = row.get(messages::MEDIA_TYPE)?;
    let media = match media_type.filter(|t| !t.is_empty()) {
        Some(media_type) => Some(MediaDescriptor {
            media_type,
            filename: row.get(messages::FILENAME)?,
            url: row.get(messages::URL)?,
            media_key: row.get(messages::MEDIA_KEY)?,
            file_sha256: row.get(messages::FILE_SHA256)?,
            file_enc_sha256: row.get(messages::FILE_ENC_SHA256)?,
            file_length: row
                .get::<_, Option<i64>>(messages::FILE_LENGTH)?
                .and_then(|len| u64::try_from(len).ok()),
        }),
        None => None,
    };

    Ok(MessageRecord {
        id: row.get(messages::ID)?,
        chat_jid: row.get(messages::CHAT_JID)?,
        sender: row.get::<_, Option<String>>(messages::SENDER)?.unwrap_or_default(),
        sender_name: row.get::<_, Option<String>>(messages::SENDER_NAME)?.unwrap_or_default(),
        content: row.get(messages::CONTENT)?,
        timestamp: from_unix(row.get(messages::TIMESTAMP)?),
        is_from_me: row.get(messages::IS_FROM_ME)?,
        media,
    })
}

pub(crate) fn store_identity_mapping(conn: &Connection, lid: &str, phone: &str, name: &str) -> Result<()> {
    conn.execute(UPSERT_LID_MAPPING, params![lid, phone, name])?;
    Ok(())
}

pub(crate) fn identity_mapping(conn: &Connection, lid: &str) -> Result<Option<IdentityMapping>> {
    let mapping = conn
        .query_row(
            &format!(
                "SELECT {}, {}, {} FROM {} WHERE {} = ?1",
                lid_mappings::LID,
                lid_mappings::PHONE,
                lid_mappings::NAME,
                lid_mappings::TABLE,
                lid_mappings::LID
            ),
            params![lid],
            |row| {
                Ok(IdentityMapping {
                    lid: row.get(0)?,
                    phone: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(mapping)
}
