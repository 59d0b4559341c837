//! Read-side queries: chat listing, message listing and full-text search.
//!
//! Filters are lenient. A bound or class that cannot be parsed is logged as a
//! query error and dropped; the query runs without it. Rows that fail to
//! convert are skipped one by one.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Utc};
use rusqlite::{params, ErrorCode, Row, ToSql};
use tracing::warn;

use crate::db::{from_unix, Store};
use crate::error::{ArchiveError, Result};
use crate::jid::Jid;
use crate::models::{Chat, ChatExport, ListChatsOptions, ListMessagesOptions, MediaKind, Message, SearchOptions, StoreStats};
use crate::schema::{chats, messages};

const MESSAGE_COLUMNS: &str = "
    SELECT m.id, m.chat_jid, m.sender,
           COALESCE(NULLIF(m.sender_name, ''), l.name) AS sender_name,
           m.content, m.timestamp, m.is_from_me,
           m.media_type, m.filename, c.name AS chat_name
    FROM messages m";

const MESSAGE_JOINS: &str = "
    LEFT JOIN chats c ON m.chat_jid = c.jid
    LEFT JOIN lid_mappings l ON m.sender = l.lid";

/// Named time window relative to now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    /// The past 60 minutes
    LastHour,
    /// Since local midnight
    Today,
    /// The previous local day
    Yesterday,
    /// The past 72 hours
    Last3Days,
    /// Since Monday of the current week
    ThisWeek,
    /// Monday to Sunday of the previous week
    LastWeek,
    /// Since the first of the current month
    ThisMonth,
}

impl FromStr for Timeframe {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "last_hour" => Ok(Self::LastHour),
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "last_3_days" => Ok(Self::Last3Days),
            "this_week" => Ok(Self::ThisWeek),
            "last_week" => Ok(Self::LastWeek),
            "this_month" => Ok(Self::ThisMonth),
            other => Err(ArchiveError::Query(format!(
                "invalid timeframe: {other} (valid: last_hour, today, yesterday, last_3_days, this_week, last_week, this_month)"
            ))),
        }
    }
}

impl Timeframe {
    /// Inclusive `(after, before)` bounds of the window, evaluated in `now`'s zone.
    pub fn bounds<Tz: TimeZone>(self, now: &DateTime<Tz>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let zone = now.timezone();
        let midnight = |date: chrono::NaiveDate| {
            date.and_time(NaiveTime::MIN)
                .and_local_timezone(zone.clone())
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        };
        let today = now.date_naive();
        let now_utc = now.with_timezone(&Utc);
        let days_from_monday = i64::from(today.weekday().num_days_from_monday());

        let bounds = match self {
            Self::LastHour => (now_utc - Duration::hours(1), now_utc),
            Self::Today => (midnight(today)?, now_utc),
            Self::Yesterday => (midnight(today.pred_opt()?)?, midnight(today)?),
            Self::Last3Days => (now_utc - Duration::days(3), now_utc),
            Self::ThisWeek => (midnight(today - Duration::days(days_from_monday))?, now_utc),
            Self::LastWeek => {
                let monday = today - Duration::days(days_from_monday + 7);
                let end = midnight(monday + Duration::days(7))? - Duration::seconds(1);
                (midnight(monday)?, end)
            }
            Self::ThisMonth => (midnight(today.with_day(1)?)?, now_utc),
        };
        Some(bounds)
    }
}

/// Message class filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFilter {
    /// Messages without media
    Text,
    /// Messages with this media kind
    Kind(MediaKind),
}

impl FromStr for MediaFilter {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "text" {
            Ok(Self::Text)
        } else {
            s.parse().map(Self::Kind)
        }
    }
}

fn parse_bound(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ArchiveError::Query(format!("invalid timestamp {raw:?}: {e}")))
}

/// Parse a filter value, logging and dropping it when malformed.
fn lenient<T>(raw: Option<&str>, parse: impl FnOnce(&str) -> Result<T>) -> Option<T> {
    let raw = raw.map(str::trim).filter(|r| !r.is_empty())?;
    match parse(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "Dropping malformed filter");
            None
        }
    }
}

/// Resolve explicit bounds and an optional timeframe; explicit bounds win.
pub fn resolve_bounds(
    after: Option<&str>,
    before: Option<&str>,
    timeframe: Option<&str>,
    now: &DateTime<Local>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let window = lenient(timeframe, Timeframe::from_str).and_then(|tf| tf.bounds(now));
    let after = lenient(after, parse_bound).or(window.map(|w| w.0));
    let before = lenient(before, parse_bound).or(window.map(|w| w.1));
    (after, before)
}

/// WHERE-clause accumulator shared by listing and search
#[derive(Default)]
struct Filters {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl Filters {
    fn push(&mut self, clause: &str, value: impl ToSql + 'static) {
        self.clauses.push(clause.to_string());
        self.params.push(Box::new(value));
    }

    fn message_filters(
        &mut self,
        chat_jid: Option<&str>,
        after: Option<&str>,
        before: Option<&str>,
        timeframe: Option<&str>,
        media_type: Option<&str>,
    ) {
        if let Some(chat) = chat_jid.filter(|c| !c.is_empty()) {
            self.push("m.chat_jid = ?", chat.to_string());
        }

        let (after, before) = resolve_bounds(after, before, timeframe, &Local::now());
        if let Some(after) = after {
            self.push("m.timestamp >= ?", after.timestamp());
        }
        if let Some(before) = before {
            self.push("m.timestamp <= ?", before.timestamp());
        }

        match lenient(media_type, MediaFilter::from_str) {
            Some(MediaFilter::Text) => self
                .clauses
                .push("(m.media_type IS NULL OR m.media_type = '')".to_string()),
            Some(MediaFilter::Kind(kind)) => self.push("m.media_type = ?", kind.as_str()),
            None => {}
        }
    }

    fn render(&self) -> String {
        self.clauses.iter().map(|c| format!(" AND {c}")).collect()
    }
}

/// Row conversion failures are skipped; engine failures propagate.
fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>, what: &'static str) -> Result<Vec<T>> {
    let mut results = Vec::new();
    for row in rows {
        match row {
            Ok(value) => results.push(value),
            Err(
                err @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => {
                warn!(error = %err, what, "Skipping unreadable row");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(results)
}

fn map_message(row: &Row) -> rusqlite::Result<Message> {
    let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
    Ok(Message {
        id: row.get(0)?,
        chat_jid: row.get(1)?,
        sender: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        sender_name: non_empty(row.get(3)?),
        content: row.get(4)?,
        timestamp: from_unix(row.get(5)?),
        is_from_me: row.get(6)?,
        media_type: non_empty(row.get(7)?),
        filename: non_empty(row.get(8)?),
        chat_name: row.get(9)?,
    })
}

fn map_chat(row: &Row) -> rusqlite::Result<Chat> {
    let jid: String = row.get(0)?;
    Ok(Chat {
        is_group: Jid::parse(&jid).is_ok_and(|parsed| parsed.is_group()),
        name: row.get::<_, Option<String>>(1)?.filter(|n| !n.is_empty()),
        last_message_time: row.get::<_, Option<i64>>(2)?.map(from_unix),
        last_message: row.get(3)?,
        last_sender: row.get(4)?,
        last_is_from_me: row.get(5)?,
        jid,
    })
}

fn limit_value(limit: Option<usize>) -> i64 {
    limit
        .filter(|&l| l > 0)
        .and_then(|l| i64::try_from(l).ok())
        .unwrap_or(-1)
}

/// Generic engine errors while evaluating MATCH are malformed expressions.
fn search_error(err: ArchiveError) -> ArchiveError {
    match err {
        ArchiveError::Database(rusqlite::Error::SqliteFailure(failure, message))
            if failure.code == ErrorCode::Unknown =>
        {
            ArchiveError::Query(message.unwrap_or_else(|| failure.to_string()))
        }
        other => other,
    }
}

impl Store {
    /// List chats, newest activity first (chats never messaged last).
    pub fn list_chats(&self, opts: &ListChatsOptions) -> Result<Vec<Chat>> {
        let conn = self.get_connection()?;

        let mut query = String::from(
            "SELECT c.jid, c.name, c.last_message_time,
                (SELECT content FROM messages WHERE chat_jid = c.jid ORDER BY timestamp DESC LIMIT 1),
                (SELECT sender FROM messages WHERE chat_jid = c.jid ORDER BY timestamp DESC LIMIT 1),
                (SELECT is_from_me FROM messages WHERE chat_jid = c.jid ORDER BY timestamp DESC LIMIT 1)
             FROM chats c
             WHERE 1=1",
        );
        let mut filters = Filters::default();
        if let Some(text) = opts.query.as_deref().filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", text.to_lowercase());
            filters.clauses.push("(LOWER(c.name) LIKE ? OR c.jid LIKE ?)".to_string());
            filters.params.push(Box::new(pattern.clone()));
            filters.params.push(Box::new(pattern));
        }
        if opts.only_groups {
            filters.clauses.push(format!("c.jid LIKE '%@{}'", crate::jid::GROUP_SERVER));
        }
        query.push_str(&filters.render());
        query.push_str(" ORDER BY c.last_message_time DESC NULLS LAST LIMIT ?");
        filters.params.push(Box::new(limit_value(opts.limit)));

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(filters.params.iter()), map_chat)?;
        collect_rows(rows, "chat")
    }

    /// List messages, newest first.
    pub fn list_messages(&self, opts: &ListMessagesOptions) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;

        let mut filters = Filters::default();
        filters.message_filters(
            opts.chat_jid.as_deref(),
            opts.after.as_deref(),
            opts.before.as_deref(),
            opts.timeframe.as_deref(),
            opts.media_type.as_deref(),
        );
        let query = format!(
            "{MESSAGE_COLUMNS}{MESSAGE_JOINS} WHERE 1=1{} ORDER BY m.timestamp DESC LIMIT ?",
            filters.render()
        );
        filters.params.push(Box::new(limit_value(opts.limit)));

        let mut stmt = conn.prepare(&query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(filters.params.iter()), map_message)?;
        collect_rows(rows, "message")
    }

    /// Token search over message content, newest first.
    pub fn search_messages(&self, opts: &SearchOptions) -> Result<Vec<Message>> {
        if opts.query.trim().is_empty() {
            return Err(ArchiveError::Query("search query must not be empty".to_string()));
        }
        let conn = self.get_connection()?;

        let mut filters = Filters::default();
        filters.message_filters(
            opts.chat_jid.as_deref(),
            opts.after.as_deref(),
            opts.before.as_deref(),
            opts.timeframe.as_deref(),
            opts.media_type.as_deref(),
        );
        if let Some(from) = opts.from.as_deref().filter(|f| !f.is_empty()) {
            filters.push("m.sender = ?", crate::jid::normalize_user(from));
        }
        let query = format!(
            "{MESSAGE_COLUMNS}
             JOIN messages_fts ON m.rowid = messages_fts.rowid{MESSAGE_JOINS}
             WHERE messages_fts MATCH ?{} ORDER BY m.timestamp DESC LIMIT ?",
            filters.render()
        );
        let mut bound: Vec<Box<dyn ToSql>> = vec![Box::new(opts.query.clone())];
        bound.append(&mut filters.params);
        bound.push(Box::new(limit_value(opts.limit)));

        let mut stmt = conn.prepare(&query).map_err(|e| search_error(e.into()))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bound.iter()), map_message)
            .map_err(|e| search_error(e.into()))?;
        collect_rows(rows, "message").map_err(search_error)
    }

    /// Every stored message of one chat with its name, newest first.
    pub fn export_chat(&self, jid: &str) -> Result<ChatExport> {
        let name = self.chat_name(jid)?;
        let messages = self.list_messages(&ListMessagesOptions {
            chat_jid: Some(jid.to_string()),
            limit: None,
            ..ListMessagesOptions::default()
        })?;
        if name.is_none() && messages.is_empty() {
            return Err(ArchiveError::NotFound(format!("chat {jid}")));
        }
        Ok(ChatExport {
            jid: jid.to_string(),
            name: name.filter(|n| !n.is_empty()),
            message_count: messages.len(),
            messages,
        })
    }

    /// Number of chats, optionally restricted by a name/identifier substring.
    pub fn count_chats(&self, query: Option<&str>) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 = match query.filter(|q| !q.is_empty()) {
            None => conn.query_row(&format!("SELECT COUNT(*) FROM {}", chats::TABLE), [], |row| row.get(0))?,
            Some(text) => {
                let pattern = format!("%{}%", text.to_lowercase());
                conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE LOWER({}) LIKE ?1 OR {} LIKE ?1",
                        chats::TABLE,
                        chats::NAME,
                        chats::JID
                    ),
                    params![pattern],
                    |row| row.get(0),
                )?
            }
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Number of stored messages.
    pub fn count_messages(&self) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", messages::TABLE), [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Chat and message counts.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            chats: self.count_chats(None)?,
            messages: self.count_messages()?,
        })
    }
}
