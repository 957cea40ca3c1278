// src/bot.rs

use std::fs;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::FlowGraph;

fn default_expiry_minutes() -> u64 {
    10
}

/// A bot definition: the trigger that opens a session, the matching
/// sensitivity, the idle timeout, the channels it listens on and the flow
/// graph it plays. Authored by the surrounding tooling; the engine only
/// reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BotDefinition {
    pub id: String,
    pub name: String,

    /// `;`-separated phrase list. Empty means the bot never self-starts.
    #[serde(default)]
    pub trigger: String,

    /// 0 disables approximation (exact compare); higher values accept a
    /// larger normalized edit-distance ratio, up to 1 which matches anything.
    #[serde(default)]
    pub fuzzy_threshold: f64,

    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u64,

    /// Channel identifiers this bot is attached to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,

    pub flow: FlowGraph,
}

impl BotDefinition {
    /// Rebuild the flow's internal indexes; call after deserialization.
    pub fn build(mut self) -> Self {
        self.flow = self.flow.build();
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let json = fs::read_to_string(path.as_ref())
            .map_err(|e| DefinitionError::Io(format!("read error: {}", e)))?;
        let definition: BotDefinition = serde_json::from_str(&json)
            .map_err(|e| DefinitionError::Serialization(format!("parse error: {}", e)))?;
        Ok(definition.build())
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), DefinitionError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DefinitionError::Serialization(format!("{}", e)))?;
        fs::write(path.as_ref(), json).map_err(|e| DefinitionError::Io(format!("{}", e)))?;
        Ok(())
    }

    pub fn expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.expiry_minutes as i64)
    }

    pub fn listens_on(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }

    /// Non-fatal diagnostics for `botic bot validate`.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.flow.validate();
        if self.trigger.is_empty() {
            problems.push("bot has no trigger; it will never start a conversation".to_string());
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            problems.push(format!(
                "fuzzy_threshold {} is outside 0..=1",
                self.fuzzy_threshold
            ));
        }
        problems
    }
}

#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("JSON error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FlowEdge, FlowNode, NodeKind};
    use tempfile::tempdir;

    fn sample() -> BotDefinition {
        BotDefinition {
            id: "support".to_string(),
            name: "Support".to_string(),
            trigger: "hello;hi".to_string(),
            fuzzy_threshold: 0.3,
            expiry_minutes: 5,
            channels: vec!["whatsapp".to_string()],
            flow: FlowGraph::new(
                vec![
                    FlowNode::new("start", NodeKind::Message, "Hi"),
                    FlowNode::new("ask", NodeKind::Message, "Continue?"),
                ],
                vec![FlowEdge::new("start", "ask")],
            ),
        }
    }

    #[test]
    fn test_file_round_trip_rebuilds_the_flow() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("support.json");

        let bot = sample();
        bot.to_file(&path).unwrap();

        let loaded = BotDefinition::from_file(&path).unwrap();
        assert_eq!(loaded, bot);
        // indexes were rebuilt, not just the serde-visible fields
        assert_eq!(loaded.flow.next("start").unwrap().id, "ask");
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = BotDefinition::from_file("/nonexistent/bot.json").unwrap_err();
        assert!(matches!(err, DefinitionError::Io(_)));
    }

    #[test]
    fn test_defaults_applied_on_load() {
        let json = r#"{
            "id": "b1",
            "name": "Bare",
            "flow": {"nodes": [], "edges": []}
        }"#;
        let bot: BotDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(bot.trigger, "");
        assert_eq!(bot.fuzzy_threshold, 0.0);
        assert_eq!(bot.expiry_minutes, 10);
        assert!(bot.channels.is_empty());
    }

    #[test]
    fn test_validate_reports_empty_trigger_and_flow() {
        let json = r#"{"id": "b1", "name": "Bare", "flow": {"nodes": [], "edges": []}}"#;
        let bot: BotDefinition = serde_json::from_str(json).unwrap();
        let problems = bot.build().validate();
        assert!(problems.iter().any(|p| p.contains("no nodes")));
        assert!(problems.iter().any(|p| p.contains("no trigger")));
    }

    #[test]
    fn test_listens_on() {
        let bot = sample();
        assert!(bot.listens_on("whatsapp"));
        assert!(!bot.listens_on("telegram"));
    }
}
