//! Persisted statistics model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const GROUP_NAME_PREFIX: &str = "Group_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub total_messages: u64,
    #[serde(default)]
    pub members: BTreeMap<String, MemberStat>,
    #[serde(default)]
    pub is_group: bool,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn empty(is_group: bool, now: DateTime<Utc>) -> Self {
        Self {
            total_messages: 0,
            members: BTreeMap::new(),
            is_group,
            last_activity: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStat {
    pub display_name: String,
    pub message_count: u64,
    pub first_message_at: DateTime<Utc>,
    /// Store-wide creation ordinal, breaks ranking ties.
    #[serde(default)]
    pub join_order: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub display_name: String,
    pub total_messages: u64,
    #[serde(default)]
    pub conversations: BTreeSet<String>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub join_order: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn display_name_for(conversation_id: &str) -> String {
        let head: String = conversation_id.chars().take(6).collect();
        format!("{}{}", GROUP_NAME_PREFIX, head)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCounters {
    pub total_messages: u64,
    pub start_time: DateTime<Utc>,
    /// Milliseconds since `start_time`, refreshed right before each write.
    #[serde(default)]
    pub uptime: u64,
}

/// The whole store as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub messages: BTreeMap<String, Conversation>,
    #[serde(default)]
    pub users: BTreeMap<String, User>,
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
    pub global: GlobalCounters,
}

impl Snapshot {
    pub fn empty(start_time: DateTime<Utc>) -> Self {
        Self {
            messages: BTreeMap::new(),
            users: BTreeMap::new(),
            groups: BTreeMap::new(),
            global: GlobalCounters {
                total_messages: 0,
                start_time,
                uptime: 0,
            },
        }
    }
}

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRank {
    pub participant_id: String,
    pub display_name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub total_messages: u64,
    pub member_count: usize,
    pub top_members: Vec<ParticipantRank>,
    pub last_activity: DateTime<Utc>,
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSummary {
    pub total_messages: u64,
    pub total_users: usize,
    pub total_groups: usize,
    #[serde(with = "duration_ms")]
    pub uptime: chrono::Duration,
    pub start_time: DateTime<Utc>,
}

impl GlobalSummary {
    pub fn uptime_label(&self) -> String {
        uptime_label(self.uptime)
    }
}

/// `"<d> days <h> hours"`
pub fn uptime_label(uptime: chrono::Duration) -> String {
    let days = uptime.num_days();
    let hours = uptime.num_hours() - days * 24;
    format!("{} days {} hours", days, hours)
}

mod duration_ms {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &chrono::Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(value.num_milliseconds())
    }
}

/// Which population a ranking is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankScope<'a> {
    Conversation(&'a str),
    Global,
}
