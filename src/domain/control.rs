use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::Source;

/// Control actions accepted by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    EmergencyStop,
    ClearEmergency,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::EmergencyStop => "emergency_stop",
            ControlAction::ClearEmergency => "clear_emergency",
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            "emergency_stop" => Ok(ControlAction::EmergencyStop),
            "clear_emergency" => Ok(ControlAction::ClearEmergency),
            other => Err(format!("unknown control action: {}", other)),
        }
    }
}

/// Target of a control command: one worker or the whole fleet
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Worker(String),
}

impl Target {
    pub const ALL: &'static str = "all";

    /// Parse an optional worker name; `None`, empty and "all" select the fleet
    pub fn from_optional(name: Option<&str>) -> Self {
        match name.map(str::trim) {
            None | Some("") => Target::All,
            Some(n) if n.eq_ignore_ascii_case(Self::ALL) => Target::All,
            Some(n) => Target::Worker(n.to_string()),
        }
    }

    pub fn worker(name: &str) -> Self {
        Target::from_optional(Some(name))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::All => Self::ALL,
            Target::Worker(name) => name,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who issued a control operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issuer {
    pub source: Source,
    pub user: Option<String>,
}

impl Issuer {
    pub fn new(source: Source, user: Option<&str>) -> Self {
        Self {
            source,
            user: user.map(str::to_string),
        }
    }

    pub fn coordinator() -> Self {
        Self::new(Source::Coordinator, None)
    }

    pub fn user(name: &str) -> Self {
        Self::new(Source::User, Some(name))
    }
}

/// A single command decoded from the shared control record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub action: ControlAction,
    pub target: Target,
    pub issuer: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl ControlCommand {
    /// Key used for duplicate detection: a command is new when this differs
    /// from the last one seen.
    pub fn identity(&self) -> (ControlAction, Target, DateTime<Utc>) {
        (self.action, self.target.clone(), self.issued_at)
    }
}

/// Shared, externally writable control record.
///
/// Field names are the wire contract with the API/dashboard layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlRecord {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub last_action: Option<ControlAction>,
    #[serde(default)]
    pub last_action_by: Option<String>,
    #[serde(default)]
    pub last_action_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub target_bot: Option<String>,
    #[serde(default)]
    pub emergency_stop: bool,
}

impl ControlRecord {
    /// Build a record carrying a freshly issued command
    pub fn issue(action: ControlAction, target: Option<&str>, issued_by: &str) -> Self {
        Self {
            running: !matches!(action, ControlAction::Stop | ControlAction::EmergencyStop),
            last_action: Some(action),
            last_action_by: Some(issued_by.to_string()),
            last_action_at: Some(Utc::now()),
            target_bot: target.map(str::to_string),
            emergency_stop: action == ControlAction::EmergencyStop,
        }
    }

    /// Decode the command carried by this record, if complete
    pub fn command(&self) -> Option<ControlCommand> {
        let action = self.last_action?;
        let issued_at = self.last_action_at?;
        Some(ControlCommand {
            action,
            target: Target::from_optional(self.target_bot.as_deref()),
            issuer: self.last_action_by.clone(),
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!(Target::from_optional(None), Target::All);
        assert_eq!(Target::from_optional(Some("ALL")), Target::All);
        assert_eq!(Target::from_optional(Some("  ")), Target::All);
        assert_eq!(
            Target::from_optional(Some("bot_meme")),
            Target::Worker("bot_meme".into())
        );
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!(
            "emergency-stop".parse::<ControlAction>(),
            Ok(ControlAction::EmergencyStop)
        );
        assert!("reboot".parse::<ControlAction>().is_err());
    }

    #[test]
    fn test_record_wire_format() {
        let raw = r#"{
            "running": true,
            "last_action": "restart",
            "last_action_by": "api",
            "last_action_at": "2025-01-01T00:00:00Z",
            "target_bot": null,
            "emergency_stop": false
        }"#;
        let record: ControlRecord = serde_json::from_str(raw).unwrap();
        let cmd = record.command().unwrap();
        assert_eq!(cmd.action, ControlAction::Restart);
        assert_eq!(cmd.target, Target::All);
        assert_eq!(cmd.issuer.as_deref(), Some("api"));
    }

    #[test]
    fn test_incomplete_record_has_no_command() {
        let record = ControlRecord {
            last_action: Some(ControlAction::Stop),
            ..Default::default()
        };
        assert!(record.command().is_none());
    }
}
