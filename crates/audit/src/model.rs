//! Audit record model — shared envelope plus typed event payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable audit record.
///
/// The envelope fields are common to every record; the tagged `event`
/// carries only the fields relevant to its type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub user: String,
    pub session_id: String,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// The typed payload of an audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A tool was invoked.
    ToolCall {
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    /// A file was created, modified, or deleted.
    FileChange {
        file: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    /// An external service was called.
    ApiCall {
        service: String,
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// The gate rendered a verdict.
    Decision { decision: String, reason: String },
}

impl AuditEntry {
    /// Create an entry stamped with the given time.
    pub fn new(
        event: AuditEvent,
        agent: impl Into<String>,
        user: impl Into<String>,
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            agent: agent.into(),
            user: user.into(),
            session_id: session_id.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2026-08-06T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn event_variants_round_trip() {
        let events = vec![
            AuditEvent::ToolCall {
                tool: "shell".into(),
                file: None,
            },
            AuditEvent::FileChange {
                file: "src/main.rs".into(),
                action: "modify".into(),
                diff: Some("-old\n+new".into()),
            },
            AuditEvent::ApiCall {
                service: "anthropic".into(),
                operation: "messages.create".into(),
                target: Some("claude-sonnet-4".into()),
            },
            AuditEvent::Decision {
                decision: "reject".into(),
                reason: "rate_limit".into(),
            },
        ];

        for event in events {
            let entry = AuditEntry::new(event.clone(), "builder", "alice", "s-1", ts());
            let json = serde_json::to_string(&entry).unwrap();
            let back: AuditEntry = serde_json::from_str(&json).unwrap();
            assert_eq!(back, entry);
        }
    }

    #[test]
    fn type_tag_is_flattened_into_envelope() {
        let entry = AuditEntry::new(
            AuditEvent::Decision {
                decision: "accept".into(),
                reason: String::new(),
            },
            "builder",
            "alice",
            "s-1",
            ts(),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""type":"decision""#));
        assert!(json.contains(r#""agent":"builder""#));
    }

    #[test]
    fn optional_fields_omitted_when_absent() {
        let entry = AuditEntry::new(
            AuditEvent::ToolCall {
                tool: "calculator".into(),
                file: None,
            },
            "builder",
            "alice",
            "s-1",
            ts(),
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("\"file\""));
    }
}
