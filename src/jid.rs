//! Chat and sender identifiers.
//!
//! An identifier has the shape `user[.agent][:device]@server`. Only the user
//! part and the server take part in addressing a chat; agent and device
//! suffixes are dropped on parse.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// Server of phone-based individual identifiers
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server of group identifiers
pub const GROUP_SERVER: &str = "g.us";
/// Server of secondary (privacy-preserving) identifiers
pub const HIDDEN_USER_SERVER: &str = "lid";
/// Server of broadcast lists and status updates
pub const BROADCAST_SERVER: &str = "broadcast";

/// A parsed chat or sender identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    /// User part (phone number or pseudo-identifier)
    pub user: String,
    /// Server part
    pub server: String,
}

impl Jid {
    /// Build an identifier from its parts as given.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// Phone-based individual identifier for a user part.
    pub fn phone(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Parse a full identifier. Agent and device suffixes are stripped.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((user, server)) = raw.split_once('@') else {
            return Err(ArchiveError::InvalidIdentifier(format!("{raw}: missing server")));
        };
        if server.is_empty() || server.contains('@') {
            return Err(ArchiveError::InvalidIdentifier(raw.to_string()));
        }
        let user = user.split(':').next().unwrap_or_default();
        let user = if server == DEFAULT_USER_SERVER || server == HIDDEN_USER_SERVER {
            user.split('.').next().unwrap_or_default()
        } else {
            user
        };
        if user.is_empty() && server != BROADCAST_SERVER {
            return Err(ArchiveError::InvalidIdentifier(format!("{raw}: empty user")));
        }
        Ok(Self::new(user, server))
    }

    /// Resolve something a person typed: a full identifier, or a phone number
    /// (with or without a leading `+`) addressed on the individual server.
    pub fn parse_recipient(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.contains('@') {
            return Self::parse(raw);
        }
        let digits = raw.trim_start_matches('+');
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ArchiveError::InvalidIdentifier(format!("{raw}: not a phone number")));
        }
        Ok(Self::phone(digits))
    }

    /// Group chat identifier
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// Secondary (privacy-preserving) identifier
    #[must_use]
    pub fn is_hidden_user(&self) -> bool {
        self.server == HIDDEN_USER_SERVER
    }

    /// Individual account, phone-based or secondary
    #[must_use]
    pub fn is_individual(&self) -> bool {
        self.server == DEFAULT_USER_SERVER || self.server == HIDDEN_USER_SERVER
    }

    /// The local part: text before the server suffix.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.user
    }

    /// Same user part addressed on the phone-based server.
    #[must_use]
    pub fn to_phone(&self) -> Self {
        Self::phone(self.user.clone())
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Jid {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Reduce a participant pseudo-identifier (or a bare user) to its user part.
#[must_use]
pub fn normalize_user(raw: &str) -> String {
    if raw.contains('@') {
        match Jid::parse(raw) {
            Ok(jid) => jid.user,
            Err(_) => raw.split('@').next().unwrap_or_default().to_string(),
        }
    } else {
        raw.to_string()
    }
}
