//! Identity resolution: best-effort display names for senders and chats.
//!
//! Sources, in rank order: the identity mapping table, an existing chat name,
//! the transport's contact/group directory, and the push name embedded in a
//! message. Resolution never fails on a missing name; it degrades to a
//! placeholder or to an empty string.
//!
//! Directory lookups never run while the store connection is checked out.
//! Writers capture a [`DirectorySnapshot`] first and resolve against it.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::db::{self, Store};
use crate::error::Result;
use crate::jid::Jid;
use crate::logging::OperationTimer;
use crate::metrics;
use crate::models::IdentityMapping;
use crate::schema::chats;
use crate::transport::{ContactInfo, Directory};

/// Directory answers captured ahead of a write transaction.
///
/// Misses are cached too, so each identifier is asked about at most once.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    contacts: HashMap<Jid, Option<ContactInfo>>,
    groups: HashMap<Jid, Option<String>>,
}

impl DirectorySnapshot {
    /// Ask `directory` about every identifier in `jids`.
    pub fn capture<'a, D, I>(directory: &D, jids: I) -> Self
    where
        D: Directory + ?Sized,
        I: IntoIterator<Item = &'a Jid>,
    {
        let mut snapshot = Self::default();
        for jid in jids {
            snapshot.add(directory, jid);
        }
        snapshot
    }

    /// Ask `directory` about one more identifier.
    pub fn add<D: Directory + ?Sized>(&mut self, directory: &D, jid: &Jid) {
        if jid.is_group() {
            self.groups
                .entry(jid.clone())
                .or_insert_with(|| directory.group_name(jid));
        } else {
            self.contacts
                .entry(jid.clone())
                .or_insert_with(|| directory.contact(jid));
        }
    }
}

impl Directory for DirectorySnapshot {
    fn contact(&self, jid: &Jid) -> Option<ContactInfo> {
        self.contacts.get(jid).cloned().flatten()
    }

    fn group_name(&self, jid: &Jid) -> Option<String> {
        self.groups.get(jid).cloned().flatten()
    }
}

/// Identifiers sender resolution and shadow-chat naming may look up, given
/// the sender's current mapping row.
pub fn sender_lookup_jids(sender: &Jid, mapping: Option<&IdentityMapping>) -> Vec<Jid> {
    let mut jids = vec![sender.clone(), sender.to_phone()];
    if let Some(phone) = mapping.map(|m| m.phone.as_str()).filter(|p| !p.is_empty()) {
        jids.push(Jid::phone(phone));
    }
    jids
}

/// Directory name for an identifier: group subject for groups, contact
/// display name otherwise.
pub fn directory_name<D: Directory + ?Sized>(directory: &D, jid: &Jid) -> Option<String> {
    let name = if jid.is_group() {
        directory.group_name(jid)
    } else {
        directory
            .contact(jid)
            .and_then(|info| info.display_name().map(str::to_string))
    };
    name.filter(|n| !n.is_empty())
}

/// Directory name, falling back to the local part.
pub fn preferred_name<D: Directory + ?Sized>(directory: &D, jid: &Jid) -> String {
    directory_name(directory, jid).unwrap_or_else(|| jid.local_part().to_string())
}

/// Resolve a sender's display name.
///
/// Mapping table, then the stored chat of the sender's individual identity,
/// then the directory by exact identifier and by phone-based variant, then
/// the push name. Returns an empty string when nothing is known.
pub fn resolve_sender_name<D: Directory + ?Sized>(
    conn: &Connection,
    directory: &D,
    sender: &Jid,
    push_name: &str,
) -> Result<String> {
    let mapping = db::identity_mapping(conn, sender.local_part())?;
    if let Some(name) = mapping.as_ref().map(|m| m.name.as_str()).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }

    let phone = mapping
        .as_ref()
        .filter(|m| !m.phone.is_empty())
        .map_or_else(|| sender.to_phone(), |m| Jid::phone(m.phone.clone()));

    // Placeholder chat names (the bare local part) do not count
    for candidate in [&phone, sender] {
        if let Some(name) = db::chat_name(conn, &candidate.to_string())?
            .filter(|n| !n.is_empty() && n != candidate.local_part())
        {
            return Ok(name);
        }
    }

    for candidate in [sender, &phone] {
        if let Some(name) = directory_name(directory, candidate) {
            return Ok(name);
        }
    }

    Ok(push_name.to_string())
}

/// Resolve a chat's display name: stored non-empty name, directory entry,
/// the sender string, then the local part of the identifier.
pub fn resolve_chat_name<D: Directory + ?Sized>(
    conn: &Connection,
    directory: &D,
    chat: &Jid,
    sender: &str,
) -> Result<String> {
    if let Some(name) = db::chat_name(conn, &chat.to_string())?.filter(|n| !n.is_empty()) {
        return Ok(name);
    }
    if let Some(name) = directory_name(directory, chat) {
        return Ok(name);
    }
    if !sender.is_empty() {
        return Ok(sender.to_string());
    }
    Ok(chat.local_part().to_string())
}

/// Individual chat a sender's messages stay addressable under.
///
/// Phone-based senders map to themselves. A secondary-identifier sender maps
/// to its known phone when the mapping table has one, and otherwise keeps
/// its secondary identifier.
pub fn shadow_chat_jid(conn: &Connection, sender: &Jid) -> Result<Jid> {
    if !sender.is_hidden_user() {
        return Ok(sender.to_phone());
    }
    let phone = db::identity_mapping(conn, sender.local_part())?
        .map(|m| m.phone)
        .filter(|p| !p.is_empty());
    Ok(phone.map_or_else(|| sender.clone(), Jid::phone))
}

/// Create the sender's shadow chat, or name it if it is still unnamed.
/// Existing names are never replaced.
pub fn ensure_shadow_chat<D: Directory + ?Sized>(conn: &Connection, directory: &D, sender: &Jid) -> Result<()> {
    if sender.local_part().is_empty() {
        return Ok(());
    }
    let shadow = shadow_chat_jid(conn, sender)?;
    let key = shadow.to_string();
    match db::chat_name(conn, &key)? {
        None => {
            let name = preferred_name(directory, &shadow);
            db::upsert_chat(conn, &key, &name, None)?;
            debug!(chat_jid = %key, name = %name, "Created shadow chat");
        }
        Some(existing) if existing.is_empty() => {
            if let Some(name) = directory_name(directory, &shadow) {
                db::set_chat_name(conn, &key, &name)?;
            }
        }
        Some(_) => {}
    }
    Ok(())
}

fn looks_unresolved(jid: &str, parsed: &Jid, name: &str) -> bool {
    name.is_empty() || name == parsed.local_part() || name == jid
}

/// Name a chat from the directory, consulting the mapping row of a
/// secondary identifier.
fn lookup_chat_name<D: Directory + ?Sized>(
    directory: &D,
    jid: &Jid,
    mapping: Option<&IdentityMapping>,
) -> Option<String> {
    if let Some(name) = directory_name(directory, jid) {
        return Some(name);
    }
    let mapping = mapping.filter(|_| jid.is_hidden_user())?;
    if !mapping.name.is_empty() {
        return Some(mapping.name.clone());
    }
    if mapping.phone.is_empty() {
        return None;
    }
    directory_name(directory, &Jid::phone(mapping.phone.clone()))
}

struct BackfillCandidate {
    raw: String,
    jid: Jid,
    name: String,
    mapping: Option<IdentityMapping>,
}

fn backfill_candidates(conn: &Connection) -> Result<Vec<BackfillCandidate>> {
    let rows: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, COALESCE({}, '') FROM {}",
            chats::JID,
            chats::NAME,
            chats::TABLE
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        rows.filter_map(|row| match row {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(error = %e, "Backfill: skipping unreadable chat row");
                None
            }
        })
        .collect()
    };

    let mut candidates = Vec::new();
    for (raw, name) in rows {
        let Ok(jid) = Jid::parse(&raw) else {
            continue;
        };
        if !looks_unresolved(&raw, &jid, &name) {
            continue;
        }
        let mapping = if jid.is_hidden_user() {
            db::identity_mapping(conn, jid.local_part())?
        } else {
            None
        };
        candidates.push(BackfillCandidate { raw, jid, name, mapping });
    }
    Ok(candidates)
}

/// Re-resolve every chat whose name looks unresolved (empty, equal to the
/// local part, or equal to the raw identifier). Only a different, non-empty
/// name overwrites, and only if the stored name did not change meanwhile.
/// Returns the number of renamed chats.
pub fn backfill_chat_names<D: Directory + ?Sized>(store: &Store, directory: &D) -> Result<usize> {
    let timer = OperationTimer::new("backfill_chat_names");
    let candidates = {
        let conn = store.get_connection()?;
        backfill_candidates(&conn)?
    };

    let renames: Vec<(BackfillCandidate, String)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let resolved = lookup_chat_name(directory, &candidate.jid, candidate.mapping.as_ref())?;
            (resolved != candidate.name).then_some((candidate, resolved))
        })
        .collect();

    let mut updated = 0;
    if !renames.is_empty() {
        let conn = store.get_connection()?;
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2 AND COALESCE({}, '') = ?3",
            chats::TABLE,
            chats::NAME,
            chats::JID,
            chats::NAME
        );
        for (candidate, resolved) in renames {
            match conn.execute(&sql, params![resolved, candidate.raw, candidate.name]) {
                Ok(0) => debug!(chat_jid = %candidate.raw, "Backfill: chat renamed meanwhile"),
                Ok(_) => updated += 1,
                Err(e) => warn!(chat_jid = %candidate.raw, error = %e, "Backfill: update failed"),
            }
        }
    }

    if updated > 0 {
        info!(count = updated, "Backfilled chat names");
    }
    metrics::record_backfill(updated);
    timer.finish();
    Ok(updated)
}
