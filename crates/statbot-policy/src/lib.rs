//! Statbot Policy Engine
//!
//! Admin allowlist, self-suppression, and participant identity derivation

use regex::Regex;
use statbot_config::BotConfig;
use std::collections::HashSet;
use std::sync::OnceLock;

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Lowercased display name with every whitespace run collapsed to `_`.
///
/// Two people sharing a display name collapse into one participant; prefer a
/// collaborator-supplied id when one exists (see [`PolicyEngine::participant_id`]).
pub fn derive_participant_id(display_name: &str) -> String {
    whitespace_run()
        .replace_all(display_name, "_")
        .to_lowercase()
}

#[derive(Clone)]
pub struct PolicyEngine {
    admins: HashSet<String>,
    bot_name: String,
}

impl PolicyEngine {
    pub fn new(config: &BotConfig) -> Self {
        let admins = config
            .admin_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        Self {
            admins,
            bot_name: config.bot_name.clone(),
        }
    }

    pub fn is_admin(&self, participant_id: &str) -> bool {
        self.admins.contains(participant_id)
    }

    /// True for messages the bot itself sent.
    pub fn is_own_message(&self, sender_display_name: &str) -> bool {
        sender_display_name == self.bot_name
    }

    pub fn participant_id(&self, sender_id: Option<&str>, sender_display_name: &str) -> String {
        match sender_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => derive_participant_id(sender_display_name),
        }
    }

    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_participant_id, PolicyEngine};
    use statbot_config::BotConfig;

    fn engine(admins: &[&str]) -> PolicyEngine {
        let config = BotConfig {
            admin_ids: admins.iter().map(|s| s.to_string()).collect(),
            ..BotConfig::default()
        };
        PolicyEngine::new(&config)
    }

    #[test]
    fn derives_lowercase_underscored_identity() {
        assert_eq!(derive_participant_id("Alice"), "alice");
        assert_eq!(derive_participant_id("Nguyen  Van\tA"), "nguyen_van_a");
    }

    #[test]
    fn same_display_name_collides() {
        assert_eq!(
            derive_participant_id("John Smith"),
            derive_participant_id("john   smith")
        );
    }

    #[test]
    fn supplied_sender_id_wins_over_derivation() {
        let policy = engine(&[]);
        assert_eq!(policy.participant_id(Some("100042"), "Alice"), "100042");
        assert_eq!(policy.participant_id(Some("  "), "Alice B"), "alice_b");
        assert_eq!(policy.participant_id(None, "Alice B"), "alice_b");
    }

    #[test]
    fn admin_check_is_exact_membership() {
        let policy = engine(&["alice", " bob "]);
        assert!(policy.is_admin("alice"));
        assert!(policy.is_admin("bob"));
        assert!(!policy.is_admin("Alice"));
        assert!(!policy.is_admin("carol"));
        assert_eq!(policy.admin_count(), 2);
    }

    #[test]
    fn own_messages_match_configured_bot_name() {
        let policy = engine(&[]);
        assert!(policy.is_own_message("StatsBot"));
        assert!(!policy.is_own_message("statsbot"));
    }
}
