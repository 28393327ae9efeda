//! Prefixed chat commands

use chrono::{DateTime, Local, Utc};
use statbot_policy::PolicyEngine;
use statbot_storage::{ParticipantRank, RankScope, StatsStore};

pub const DEFAULT_TOP_LIMIT: usize = 5;
pub const MAX_TOP_LIMIT: usize = 50;
const STATS_TOP_MEMBERS: usize = 3;
const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];
const OTHER_MEDAL: &str = "🏅";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Stats,
    Top { limit: usize },
    Info,
    Ping,
    Clean,
    Unknown(String),
}

impl Command {
    /// `None` when `text` does not start with `prefix`.
    pub fn parse(prefix: &str, text: &str) -> Option<Self> {
        let rest = text.strip_prefix(prefix)?;
        let mut parts = rest.split_whitespace();
        let Some(name) = parts.next() else {
            return Some(Command::Unknown(String::new()));
        };

        let command = match name.to_lowercase().as_str() {
            "help" => Command::Help,
            "stats" => Command::Stats,
            "top" => Command::Top {
                limit: parse_top_limit(parts.next()),
            },
            "info" => Command::Info,
            "ping" => Command::Ping,
            "clean" => Command::Clean,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Help => "help",
            Command::Stats => "stats",
            Command::Top { .. } => "top",
            Command::Info => "info",
            Command::Ping => "ping",
            Command::Clean => "clean",
            Command::Unknown(name) => name,
        }
    }
}

/// Missing, non-numeric and non-positive arguments fall back to the default.
fn parse_top_limit(arg: Option<&str>) -> usize {
    match arg.and_then(|value| value.parse::<i64>().ok()) {
        Some(n) if n > 0 => (n as usize).min(MAX_TOP_LIMIT),
        _ => DEFAULT_TOP_LIMIT,
    }
}

/// Who issued a command and where.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub conversation_id: &'a str,
    pub requester_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub text: String,
    /// The store changed and should be written out right away.
    pub persist_now: bool,
}

impl CommandResponse {
    fn reply(text: String) -> Self {
        Self {
            text,
            persist_now: false,
        }
    }
}

pub struct CommandInterpreter {
    prefix: String,
    bot_name: String,
}

impl CommandInterpreter {
    pub fn new(prefix: &str, bot_name: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            bot_name: bot_name.to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parse(&self, text: &str) -> Option<Command> {
        Command::parse(&self.prefix, text)
    }

    /// Only [`Command::Clean`] mutates the store, and only for admins.
    pub fn execute(
        &self,
        command: &Command,
        ctx: CommandContext<'_>,
        store: &mut StatsStore,
        policy: &PolicyEngine,
    ) -> CommandResponse {
        match command {
            Command::Help => CommandResponse::reply(self.help_text(policy.is_admin(ctx.requester_id))),
            Command::Stats => CommandResponse::reply(self.stats_text(store, ctx.conversation_id)),
            Command::Top { limit } => {
                CommandResponse::reply(self.top_text(store, ctx.conversation_id, *limit))
            }
            Command::Info => CommandResponse::reply(self.info_text(store)),
            Command::Ping => CommandResponse::reply("🏓 Pong! Bot is running".to_string()),
            Command::Clean => self.clean(store, policy, ctx),
            Command::Unknown(_) => CommandResponse::reply(format!(
                "❓ Unknown command. Use {}help to see available commands",
                self.prefix
            )),
        }
    }

    fn help_text(&self, is_admin: bool) -> String {
        let p = &self.prefix;
        let mut text = format!(
            "📋 *Commands*\n\n\
{p}help - Show this help\n\
{p}stats - Statistics for this conversation\n\
{p}top [n] - Most active members (default {DEFAULT_TOP_LIMIT}, max {MAX_TOP_LIMIT})\n\
{p}info - Bot information\n\
{p}ping - Check the bot is alive"
        );
        if is_admin {
            text.push_str(&format!(
                "\n\n🛡️ *Admin commands*\n{p}clean - Clear statistics for this conversation"
            ));
        }
        text
    }

    fn stats_text(&self, store: &StatsStore, conversation_id: &str) -> String {
        let Some(summary) = store.conversation_summary(conversation_id) else {
            return "📊 No statistics for this conversation yet".to_string();
        };

        let mut text = format!(
            "📊 *Conversation stats*\n\n\
📈 Total messages: {}\n\
👥 Members: {}\n\
⏰ Last activity: {}",
            summary.total_messages,
            summary.member_count,
            format_local(summary.last_activity)
        );
        if !summary.top_members.is_empty() {
            text.push_str(&format!("\n\n🏆 *Top {}*", STATS_TOP_MEMBERS));
            for (index, row) in summary
                .top_members
                .iter()
                .take(STATS_TOP_MEMBERS)
                .enumerate()
            {
                text.push_str(&format!("\n{}. {}", index + 1, format_row(row)));
            }
        }
        text
    }

    fn top_text(&self, store: &StatsStore, conversation_id: &str, limit: usize) -> String {
        let ranking = store.top_participants(RankScope::Conversation(conversation_id), limit);
        if ranking.is_empty() {
            return "📊 No data yet".to_string();
        }

        let mut text = format!("🏆 *Top {}*", ranking.len());
        for (index, row) in ranking.iter().enumerate() {
            let medal = MEDALS.get(index).copied().unwrap_or(OTHER_MEDAL);
            text.push_str(&format!("\n{} {}", medal, format_row(row)));
        }
        text
    }

    fn info_text(&self, store: &StatsStore) -> String {
        let global = store.global_summary();
        format!(
            "🤖 *{}*\n\n\
📨 Messages processed: {}\n\
👤 Users: {}\n\
👥 Groups: {}\n\
⏱️ Uptime: {}\n\
🚀 Started: {}",
            self.bot_name,
            global.total_messages,
            global.total_users,
            global.total_groups,
            global.uptime_label(),
            format_local(global.start_time)
        )
    }

    fn clean(
        &self,
        store: &mut StatsStore,
        policy: &PolicyEngine,
        ctx: CommandContext<'_>,
    ) -> CommandResponse {
        if !policy.is_admin(ctx.requester_id) {
            return CommandResponse::reply("⛔ Admin permission required".to_string());
        }
        let changed = store.reset_conversation(ctx.conversation_id);
        CommandResponse {
            text: "✅ Statistics for this conversation were cleared".to_string(),
            persist_now: changed,
        }
    }
}

fn format_row(row: &ParticipantRank) -> String {
    format!("{}: {} messages", row.display_name, row.count)
}

pub fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{Command, CommandContext, CommandInterpreter, DEFAULT_TOP_LIMIT, MAX_TOP_LIMIT};
    use chrono::Utc;
    use statbot_config::BotConfig;
    use statbot_policy::PolicyEngine;
    use statbot_storage::StatsStore;

    fn policy(admins: &[&str]) -> PolicyEngine {
        let config = BotConfig {
            admin_ids: admins.iter().map(|id| id.to_string()).collect(),
            ..BotConfig::default()
        };
        PolicyEngine::new(&config)
    }

    fn ctx<'a>(conversation_id: &'a str, requester_id: &'a str) -> CommandContext<'a> {
        CommandContext {
            conversation_id,
            requester_id,
        }
    }

    fn run(store: &mut StatsStore, policy: &PolicyEngine, requester: &str, text: &str) -> String {
        let interpreter = CommandInterpreter::new("!", "StatsBot");
        let command = interpreter.parse(text).expect("prefixed");
        interpreter
            .execute(&command, ctx("C1", requester), store, policy)
            .text
    }

    #[test]
    fn parse_recognizes_prefix_and_case() {
        assert_eq!(Command::parse("!", "!HELP"), Some(Command::Help));
        assert_eq!(Command::parse("!", "!  stats  "), Some(Command::Stats));
        assert_eq!(Command::parse("!", "hello"), None);
        assert_eq!(Command::parse("!", "!"), Some(Command::Unknown(String::new())));
        assert_eq!(
            Command::parse("!", "!dance now"),
            Some(Command::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn parse_top_limit_falls_back_to_default() {
        let limit = |text: &str| match Command::parse("!", text) {
            Some(Command::Top { limit }) => limit,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(limit("!top"), DEFAULT_TOP_LIMIT);
        assert_eq!(limit("!top 2"), 2);
        assert_eq!(limit("!top zero"), DEFAULT_TOP_LIMIT);
        assert_eq!(limit("!top 0"), DEFAULT_TOP_LIMIT);
        assert_eq!(limit("!top -3"), DEFAULT_TOP_LIMIT);
        assert_eq!(limit("!top 100000"), MAX_TOP_LIMIT);
    }

    #[test]
    fn help_does_not_depend_on_store() {
        let policy = policy(&[]);
        let mut empty = StatsStore::new(Utc::now());
        let mut busy = StatsStore::new(Utc::now());
        busy.record_message("C1", "alice", "Alice", false);

        let a = run(&mut empty, &policy, "alice", "!help");
        let b = run(&mut busy, &policy, "alice", "!help");
        assert_eq!(a, b);
        assert!(a.contains("!top [n]"));
        assert!(a.contains("max 50"));
        assert!(!a.contains("!clean"));
    }

    #[test]
    fn help_lists_clean_for_admins() {
        let policy = policy(&["root"]);
        let mut store = StatsStore::new(Utc::now());
        assert!(run(&mut store, &policy, "root", "!help").contains("!clean"));
    }

    #[test]
    fn ping_replies_with_pong() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        assert_eq!(
            run(&mut store, &policy, "anyone", "!ping"),
            "🏓 Pong! Bot is running"
        );
    }

    #[test]
    fn top_ranks_by_count() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        for (id, name, n) in [("a", "A", 5), ("b", "B", 3), ("c", "C", 1)] {
            for _ in 0..n {
                store.record_message("C1", id, name, true);
            }
        }

        let text = run(&mut store, &policy, "a", "!top 2");
        let rows: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(rows, vec!["🥇 A: 5 messages", "🥈 B: 3 messages"]);
        assert!(text.starts_with("🏆 *Top 2*"));
    }

    #[test]
    fn top_for_unknown_conversation_has_no_data() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        store.record_message("other", "a", "A", false);
        assert_eq!(run(&mut store, &policy, "a", "!top"), "📊 No data yet");
    }

    #[test]
    fn stats_shows_totals_and_top_three() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        for (id, name, n) in [("a", "A", 4), ("b", "B", 3), ("c", "C", 2), ("d", "D", 1)] {
            for _ in 0..n {
                store.record_message("C1", id, name, false);
            }
        }

        let text = run(&mut store, &policy, "a", "!stats");
        assert!(text.contains("Total messages: 10"));
        assert!(text.contains("Members: 4"));
        assert!(text.contains("1. A: 4 messages"));
        assert!(text.contains("3. C: 2 messages"));
        assert!(!text.contains("D: 1 messages"));
    }

    #[test]
    fn stats_without_data() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        assert_eq!(
            run(&mut store, &policy, "a", "!stats"),
            "📊 No statistics for this conversation yet"
        );
    }

    #[test]
    fn info_reports_global_counts() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        store.record_message("G1", "a", "A", true);
        store.record_message("C1", "b", "B", false);

        let text = run(&mut store, &policy, "a", "!info");
        assert!(text.starts_with("🤖 *StatsBot*"));
        assert!(text.contains("Messages processed: 2"));
        assert!(text.contains("Users: 2"));
        assert!(text.contains("Groups: 1"));
        assert!(text.contains("Uptime: 0 days 0 hours"));
    }

    #[test]
    fn clean_requires_admin() {
        let policy = policy(&["root"]);
        let mut store = StatsStore::new(Utc::now());
        for _ in 0..3 {
            store.record_message("C1", "alice", "Alice", false);
        }
        let interpreter = CommandInterpreter::new("!", "StatsBot");

        let denied = interpreter.execute(&Command::Clean, ctx("C1", "alice"), &mut store, &policy);
        assert_eq!(denied.text, "⛔ Admin permission required");
        assert!(!denied.persist_now);
        assert_eq!(store.conversation("C1").map(|c| c.total_messages), Some(3));

        let granted = interpreter.execute(&Command::Clean, ctx("C1", "root"), &mut store, &policy);
        assert!(granted.persist_now);
        assert_eq!(store.conversation("C1").map(|c| c.total_messages), Some(0));
        assert_eq!(store.global_summary().total_messages, 0);
        assert!(store.consistency_violations().is_empty());
    }

    #[test]
    fn unknown_command_names_the_prefix() {
        let policy = policy(&[]);
        let mut store = StatsStore::new(Utc::now());
        let interpreter = CommandInterpreter::new("#", "StatsBot");
        let command = interpreter.parse("#what").expect("prefixed");
        let text = interpreter
            .execute(&command, ctx("C1", "a"), &mut store, &policy)
            .text;
        assert!(text.contains("#help"));
    }
}
