//! Statbot IPC
//!
//! Types exchanged between the messaging-surface collaborators and the core

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The newest message visible in one conversation at poll time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedMessage {
    pub conversation_id: String,
    pub text: String,
    #[serde(rename = "sender", alias = "senderDisplayName")]
    pub sender_display_name: String,
    /// Stable identity, when the surface exposes one.
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Unix milliseconds.
    #[serde(default = "now_unix_millis")]
    pub observed_at: i64,
}

impl ObservedMessage {
    pub fn new(conversation_id: &str, sender: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            sender_display_name: sender.to_string(),
            sender_id: None,
            is_group: false,
            observed_at: now_unix_millis(),
        }
    }

    pub fn in_group(mut self) -> Self {
        self.is_group = true;
        self
    }

    pub fn with_sender_id(mut self, sender_id: &str) -> Self {
        self.sender_id = Some(sender_id.to_string());
        self
    }

    pub fn observed_at(mut self, millis: i64) -> Self {
        self.observed_at = millis;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            conversation_id: self.conversation_id.clone(),
            text: self.text.clone(),
            observed_at: self.observed_at,
        }
    }
}

/// Exact-match identity of one observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub conversation_id: String,
    pub text: String,
    pub observed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    AutoReply,
    CommandResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundReply {
    pub conversation_id: String,
    pub text: String,
    pub kind: ReplyKind,
}

impl OutboundReply {
    pub fn auto(conversation_id: &str, text: String) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text,
            kind: ReplyKind::AutoReply,
        }
    }

    pub fn command(conversation_id: &str, text: String) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text,
            kind: ReplyKind::CommandResponse,
        }
    }
}

/// Read side of the remote messaging surface.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &str;
    /// Session setup; a failure here stops the runtime.
    async fn connect(&self) -> Result<()>;
    async fn poll(&self) -> Result<Vec<ObservedMessage>>;
    async fn release(&self) -> Result<()>;
}

/// Write side of the remote messaging surface.
#[async_trait::async_trait]
pub trait ReplyActuator: Send + Sync {
    /// `false` when delivery failed; implementations log the cause.
    async fn deliver(&self, conversation_id: &str, text: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_observation_gets_defaults() {
        let json = r#"{"conversationId":"C1","text":"hi","sender":"Alice"}"#;
        let msg: ObservedMessage = serde_json::from_str(json).expect("deserialize");
        assert_eq!(msg.conversation_id, "C1");
        assert_eq!(msg.sender_display_name, "Alice");
        assert!(!msg.is_group);
        assert!(msg.sender_id.is_none());
        assert!(msg.observed_at > 0);
    }

    #[test]
    fn sender_display_name_alias_is_accepted() {
        let json = r#"{"conversationId":"G1","text":"yo","senderDisplayName":"Bob","isGroup":true,"observedAt":42,"senderId":"b-1"}"#;
        let msg: ObservedMessage = serde_json::from_str(json).expect("deserialize");
        assert_eq!(msg.sender_display_name, "Bob");
        assert!(msg.is_group);
        assert_eq!(msg.observed_at, 42);
        assert_eq!(msg.sender_id.as_deref(), Some("b-1"));
    }

    #[test]
    fn fingerprint_ignores_sender_but_not_timestamp() {
        let a = ObservedMessage::new("C1", "Alice", "hello").observed_at(10);
        let b = ObservedMessage::new("C1", "Bob", "hello").observed_at(10);
        let c = ObservedMessage::new("C1", "Alice", "hello").observed_at(11);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn outbound_constructors_set_kind() {
        assert_eq!(
            OutboundReply::auto("C1", "x".to_string()).kind,
            ReplyKind::AutoReply
        );
        assert_eq!(
            OutboundReply::command("C1", "x".to_string()).kind,
            ReplyKind::CommandResponse
        );
    }
}
