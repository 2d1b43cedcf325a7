use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::constants::{CHANNEL_PREFIX, PROVISIONAL_ID_PREFIX};
use crate::error::IdError;

// Server ids arrive either as JSON strings or as integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageId
// ---------------------------------------------------------------------------

/// Identity of a chat message.
///
/// A message is either `Provisional` (created locally, shown optimistically,
/// not yet acknowledged by the server) or `Confirmed` (server-assigned id).
/// The only legal transition between the two is the store's
/// provisional replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    Provisional(Uuid),
    Confirmed(String),
}

impl MessageId {
    /// Generate a fresh provisional id.
    pub fn provisional() -> Self {
        Self::Provisional(Uuid::new_v4())
    }

    pub fn confirmed(id: impl Into<String>) -> Self {
        Self::Confirmed(id.into())
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisional(uuid) => write!(f, "{PROVISIONAL_ID_PREFIX}{uuid}"),
            Self::Confirmed(id) => f.write_str(id),
        }
    }
}

impl FromStr for MessageId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        match s.strip_prefix(PROVISIONAL_ID_PREFIX) {
            Some(rest) => Uuid::parse_str(rest)
                .map(Self::Provisional)
                .map_err(|_| IdError::InvalidProvisional(s.to_string())),
            None => Ok(Self::Confirmed(s.to_string())),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = RawId::deserialize(deserializer)?.into();
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// UserId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::EmptyUser);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the push channel carrying this user's conversation events.
    pub fn channel_name(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = RawId::deserialize(deserializer)?.into();
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Conversation target
// ---------------------------------------------------------------------------

/// Whose conversation the engine is synchronizing.
///
/// Regular users only ever see their own conversation with support;
/// privileged operators open the conversation of a specific user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ConversationTarget {
    #[default]
    Own,
    User(UserId),
}

impl ConversationTarget {
    /// Explicit counterpart, if any.
    pub fn counterpart(&self) -> Option<&UserId> {
        match self {
            Self::Own => None,
            Self::User(id) => Some(id),
        }
    }

    /// Push channel for this target, given the id of the signed-in user.
    pub fn channel_name(&self, current_user: &UserId) -> String {
        self.counterpart().unwrap_or(current_user).channel_name()
    }
}

impl fmt::Display for ConversationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Own => f.write_str("own"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Observable state published by a push-channel provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub error: Option<String>,
}

impl ConnectionState {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            error: Some(error.into()),
        }
    }
}
