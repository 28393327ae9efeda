//! Statbot Storage
//!
//! In-memory conversation statistics with whole-file JSON snapshot persistence

pub mod model;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub use model::{
    Conversation, ConversationSummary, GlobalCounters, GlobalSummary, Group, MemberStat,
    ParticipantRank, RankScope, Snapshot, User,
};
pub use model::uptime_label;

pub const SUMMARY_TOP_MEMBERS: usize = 10;

/// Durable home of a [`Snapshot`].
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` when nothing has been written yet.
    fn load(&self) -> Result<Option<Snapshot>>;
    fn save(&self, snapshot: &Snapshot) -> Result<()>;
    fn describe(&self) -> String;
}

/// Pretty-printed JSON file, replaced atomically through a sibling temp file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "storage.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow!(e).context(format!("reading {}", self.path.display())))
            }
        };
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let body = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.temp_path();
        std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// How [`StatsStore::load_or_default`] obtained its state.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded,
    Missing,
    Unreadable(anyhow::Error),
}

impl LoadOutcome {
    /// A fresh store must be written out before ingestion starts.
    pub fn needs_initial_write(&self) -> bool {
        !matches!(self, LoadOutcome::Loaded)
    }
}

/// Single owner of all statistics. Every mutation goes through
/// [`StatsStore::record_message`] or [`StatsStore::reset_conversation`].
#[derive(Debug, Clone)]
pub struct StatsStore {
    data: Snapshot,
    next_order: u64,
    dirty: bool,
}

impl StatsStore {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            data: Snapshot::empty(start_time),
            next_order: 0,
            dirty: false,
        }
    }

    /// Restores a persisted snapshot. `start_time` becomes the new process epoch.
    pub fn from_snapshot(mut snapshot: Snapshot, start_time: DateTime<Utc>) -> Self {
        snapshot.global.start_time = start_time;
        snapshot.global.uptime = 0;
        let member_max = snapshot
            .messages
            .values()
            .flat_map(|c| c.members.values().map(|m| m.join_order));
        let user_max = snapshot.users.values().map(|u| u.join_order);
        let next_order = member_max.chain(user_max).max().map_or(0, |max| max + 1);
        Self {
            data: snapshot,
            next_order,
            dirty: false,
        }
    }

    pub fn load_or_default(
        store: &dyn SnapshotStore,
        start_time: DateTime<Utc>,
    ) -> (Self, LoadOutcome) {
        match store.load() {
            Ok(Some(snapshot)) => (Self::from_snapshot(snapshot, start_time), LoadOutcome::Loaded),
            Ok(None) => (Self::new(start_time), LoadOutcome::Missing),
            Err(e) => (Self::new(start_time), LoadOutcome::Unreadable(e)),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Snapshot with `uptime` recomputed against `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Snapshot {
        let mut snapshot = self.data.clone();
        snapshot.global.uptime = (now - snapshot.global.start_time)
            .num_milliseconds()
            .max(0) as u64;
        snapshot
    }

    /// Writes the snapshot and clears the dirty flag on success.
    pub fn flush(&mut self, store: &dyn SnapshotStore) -> Result<()> {
        store.save(&self.snapshot_at(Utc::now()))?;
        self.dirty = false;
        Ok(())
    }

    pub fn record_message(
        &mut self,
        conversation_id: &str,
        participant_id: &str,
        display_name: &str,
        is_group: bool,
    ) -> u64 {
        self.record_message_at(
            conversation_id,
            participant_id,
            display_name,
            is_group,
            Utc::now(),
        )
    }

    /// Returns the participant's updated count within the conversation.
    pub fn record_message_at(
        &mut self,
        conversation_id: &str,
        participant_id: &str,
        display_name: &str,
        is_group: bool,
        now: DateTime<Utc>,
    ) -> u64 {
        let conversation = self
            .data
            .messages
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::empty(is_group, now));

        let next_order = &mut self.next_order;
        let member = conversation
            .members
            .entry(participant_id.to_string())
            .or_insert_with(|| {
                let join_order = *next_order;
                *next_order += 1;
                MemberStat {
                    display_name: display_name.to_string(),
                    message_count: 0,
                    first_message_at: now,
                    join_order,
                }
            });
        member.message_count += 1;
        let count = member.message_count;
        conversation.total_messages += 1;
        conversation.last_activity = now;
        let conversation_is_group = conversation.is_group;

        let next_order = &mut self.next_order;
        let user = self
            .data
            .users
            .entry(participant_id.to_string())
            .or_insert_with(|| {
                let join_order = *next_order;
                *next_order += 1;
                User {
                    display_name: display_name.to_string(),
                    total_messages: 0,
                    conversations: Default::default(),
                    last_seen_at: now,
                    join_order,
                }
            });
        user.display_name = display_name.to_string();
        user.total_messages += 1;
        user.last_seen_at = now;
        user.conversations.insert(conversation_id.to_string());

        if conversation_is_group && !self.data.groups.contains_key(conversation_id) {
            self.data.groups.insert(
                conversation_id.to_string(),
                Group {
                    display_name: Group::display_name_for(conversation_id),
                    created_at: now,
                },
            );
        }

        self.data.global.total_messages += 1;
        self.dirty = true;
        count
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.data.messages.get(conversation_id)
    }

    pub fn user(&self, participant_id: &str) -> Option<&User> {
        self.data.users.get(participant_id)
    }

    pub fn group(&self, conversation_id: &str) -> Option<&Group> {
        self.data.groups.get(conversation_id)
    }

    pub fn conversation_summary(&self, conversation_id: &str) -> Option<ConversationSummary> {
        let conversation = self.data.messages.get(conversation_id)?;
        Some(ConversationSummary {
            total_messages: conversation.total_messages,
            member_count: conversation.members.len(),
            top_members: self.top_participants(
                RankScope::Conversation(conversation_id),
                SUMMARY_TOP_MEMBERS,
            ),
            last_activity: conversation.last_activity,
            is_group: conversation.is_group,
        })
    }

    /// Sorted by count descending, then by first appearance.
    pub fn top_participants(&self, scope: RankScope<'_>, limit: usize) -> Vec<ParticipantRank> {
        let mut rows: Vec<(u64, ParticipantRank)> = match scope {
            RankScope::Conversation(conversation_id) => match self.data.messages.get(conversation_id)
            {
                Some(conversation) => conversation
                    .members
                    .iter()
                    .map(|(id, member)| {
                        (
                            member.join_order,
                            ParticipantRank {
                                participant_id: id.clone(),
                                display_name: member.display_name.clone(),
                                count: member.message_count,
                            },
                        )
                    })
                    .collect(),
                None => Vec::new(),
            },
            RankScope::Global => self
                .data
                .users
                .iter()
                .map(|(id, user)| {
                    (
                        user.join_order,
                        ParticipantRank {
                            participant_id: id.clone(),
                            display_name: user.display_name.clone(),
                            count: user.total_messages,
                        },
                    )
                })
                .collect(),
        };

        rows.sort_by(|(order_a, a), (order_b, b)| {
            b.count
                .cmp(&a.count)
                .then(order_a.cmp(order_b))
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        rows.truncate(limit);
        rows.into_iter().map(|(_, row)| row).collect()
    }

    pub fn global_summary(&self) -> GlobalSummary {
        self.global_summary_at(Utc::now())
    }

    pub fn global_summary_at(&self, now: DateTime<Utc>) -> GlobalSummary {
        let start_time = self.data.global.start_time;
        GlobalSummary {
            total_messages: self.data.global.total_messages,
            total_users: self.data.users.len(),
            total_groups: self.data.groups.len(),
            uptime: (now - start_time).max(chrono::Duration::zero()),
            start_time,
        }
    }

    /// Empties one conversation and takes its counts back out of the
    /// per-user and global totals. Group entries are left in place.
    /// Returns `false` when the conversation has never been seen.
    pub fn reset_conversation(&mut self, conversation_id: &str) -> bool {
        let Some(previous) = self.data.messages.get(conversation_id) else {
            return false;
        };
        let replacement = Conversation::empty(previous.is_group, Utc::now());
        let Some(previous) = self
            .data
            .messages
            .insert(conversation_id.to_string(), replacement)
        else {
            return false;
        };

        for (participant_id, member) in &previous.members {
            if let Some(user) = self.data.users.get_mut(participant_id) {
                user.total_messages = user.total_messages.saturating_sub(member.message_count);
                user.conversations.remove(conversation_id);
            }
        }
        self.data.global.total_messages = self
            .data
            .global
            .total_messages
            .saturating_sub(previous.total_messages);
        self.dirty = true;
        true
    }

    /// Lists every broken aggregate relation. Empty means consistent.
    pub fn consistency_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let mut per_user: std::collections::BTreeMap<&str, u64> = Default::default();
        let mut global_sum = 0u64;

        for (conversation_id, conversation) in &self.data.messages {
            let member_sum: u64 = conversation.members.values().map(|m| m.message_count).sum();
            if member_sum != conversation.total_messages {
                violations.push(format!(
                    "conversation {} total {} != member sum {}",
                    conversation_id, conversation.total_messages, member_sum
                ));
            }
            for (participant_id, member) in &conversation.members {
                *per_user.entry(participant_id.as_str()).or_default() += member.message_count;
            }
            global_sum += conversation.total_messages;

            let has_group = self.data.groups.contains_key(conversation_id);
            if conversation.is_group && conversation.total_messages > 0 && !has_group {
                violations.push(format!("group conversation {} has no group entry", conversation_id));
            }
            if has_group && !conversation.is_group {
                violations.push(format!("group entry {} for non-group conversation", conversation_id));
            }
        }

        for (participant_id, user) in &self.data.users {
            let expected = per_user.get(participant_id.as_str()).copied().unwrap_or(0);
            if expected != user.total_messages {
                violations.push(format!(
                    "user {} total {} != conversation sum {}",
                    participant_id, user.total_messages, expected
                ));
            }
            for conversation_id in &user.conversations {
                if !self.data.messages.contains_key(conversation_id) {
                    violations.push(format!(
                        "user {} references unknown conversation {}",
                        participant_id, conversation_id
                    ));
                }
            }
        }

        if global_sum != self.data.global.total_messages {
            violations.push(format!(
                "global total {} != conversation sum {}",
                self.data.global.total_messages, global_sum
            ));
        }

        violations
    }
}
