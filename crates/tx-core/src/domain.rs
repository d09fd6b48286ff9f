use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Where a digest is delivered: a numeric chat id or a public `@channel` name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destination {
    Chat(i64),
    Channel(String),
}

impl Destination {
    /// Key used for per-destination bookkeeping (throttling, logs).
    pub fn key(&self) -> String {
        match self {
            Destination::Chat(id) => id.to_string(),
            Destination::Channel(name) => name.clone(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<ChatId> for Destination {
    fn from(c: ChatId) -> Self {
        Destination::Chat(c.0)
    }
}

/// `{ "id": .., "name": .. }` reference used throughout tracker payloads.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// `{ "id": .. }` reference (issues carry no name in time-entry payloads).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

/// One tracked-time record as returned by the tracker.
///
/// Date stamps are kept verbatim: `spent_on` is `YYYY-MM-DD`, the other two may
/// carry a time component depending on the tracker version.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TimeEntry {
    pub id: i64,
    pub project: NamedRef,
    #[serde(default)]
    pub issue: Option<IdRef>,
    pub user: NamedRef,
    pub activity: NamedRef,
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub comments: String,
    pub spent_on: String,
    #[serde(default)]
    pub created_on: String,
    #[serde(default)]
    pub updated_on: String,
}
