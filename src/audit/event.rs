use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kind of thing that happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ConfigChange,
    Restart,
    Stop,
    Trade,
    Error,
    PositionChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ConfigChange => "config_change",
            EventType::Restart => "restart",
            EventType::Stop => "stop",
            EventType::Trade => "trade",
            EventType::Error => "error",
            EventType::PositionChange => "position_change",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "config_change" => Ok(EventType::ConfigChange),
            "restart" => Ok(EventType::Restart),
            "stop" => Ok(EventType::Stop),
            "trade" => Ok(EventType::Trade),
            "error" => Ok(EventType::Error),
            "position_change" => Ok(EventType::PositionChange),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// Audit severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Component or actor that caused an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Api,
    Watcher,
    Bot,
    Coordinator,
    User,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Api => "api",
            Source::Watcher => "watcher",
            Source::Bot => "bot",
            Source::Coordinator => "coordinator",
            Source::User => "user",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(Source::Api),
            "watcher" => Ok(Source::Watcher),
            "bot" => Ok(Source::Bot),
            "coordinator" => Ok(Source::Coordinator),
            "user" => Ok(Source::User),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub source: Source,
    pub target: String,
    pub action: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        source: Source,
        target: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            severity,
            source,
            target: target.into(),
            action: action.into(),
            details: Map::new(),
            issuer: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }
}

/// Optional filters for querying events. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub source: Option<Source>,
    pub severity: Option<Severity>,
    pub target: Option<String>,
}

impl EventFilter {
    pub fn severity(severity: Severity) -> Self {
        Self {
            severity: Some(severity),
            ..Default::default()
        }
    }

    pub fn event_type(event_type: EventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.map_or(true, |t| t == event.event_type)
            && self.source.map_or(true, |s| s == event.source)
            && self.severity.map_or(true, |s| s == event.severity)
            && self.target.as_deref().map_or(true, |t| t == event.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_snake_case() {
        let event = AuditEvent::new(
            EventType::PositionChange,
            Severity::Info,
            Source::Bot,
            "BTC/USDT",
            "open",
        )
        .with_detail("worker", "bot_a");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "position_change");
        assert_eq!(json["severity"], "info");
        assert_eq!(json["source"], "bot");
        assert_eq!(json["details"]["worker"], "bot_a");
        assert!(json.get("issuer").is_none());
    }

    #[test]
    fn test_filter_matches() {
        let event = AuditEvent::new(
            EventType::Restart,
            Severity::Warning,
            Source::Watcher,
            "bot_a",
            "restart_initiated",
        );

        assert!(EventFilter::default().matches(&event));
        assert!(EventFilter::event_type(EventType::Restart).matches(&event));
        assert!(!EventFilter::severity(Severity::Critical).matches(&event));

        let filter = EventFilter {
            source: Some(Source::Watcher),
            target: Some("bot_b".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&event));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Critical".parse::<Severity>(), Ok(Severity::Critical));
        assert_eq!("config_change".parse::<EventType>(), Ok(EventType::ConfigChange));
        assert_eq!("api".parse::<Source>(), Ok(Source::Api));
        assert!("nope".parse::<Source>().is_err());
    }
}
