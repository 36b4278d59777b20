//! Enum types for Engram records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Event kind discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    ToolCall,
    ToolResult,
    Observation,
    Custom,
}

impl EventKind {
    /// Database string representation (matches the wire form).
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Observation => "observation",
            EventKind::Custom => "custom",
        }
    }

    /// Parse from the database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "message" => Ok(EventKind::Message),
            "tool_call" => Ok(EventKind::ToolCall),
            "tool_result" => Ok(EventKind::ToolResult),
            "observation" => Ok(EventKind::Observation),
            "custom" => Ok(EventKind::Custom),
            _ => Err(EnumParseError {
                enum_name: "EventKind",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for EventKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Lifecycle status of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactStatus {
    Active,
    Deprecated,
}

impl FactStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FactStatus::Active => "active",
            FactStatus::Deprecated => "deprecated",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "active" => Ok(FactStatus::Active),
            "deprecated" => Ok(FactStatus::Deprecated),
            _ => Err(EnumParseError {
                enum_name: "FactStatus",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for FactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// How aggressively an episode has been compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Raw,
    Summary,
    Gist,
}

/// Packet section identifiers, in fixed fitting priority order.
/// The derived ordering follows declaration order and matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Facts,
    Episodes,
    Procedures,
    Insights,
    Events,
}

impl Section {
    /// All sections in fitting priority order.
    pub const ALL: [Section; 5] = [
        Section::Facts,
        Section::Episodes,
        Section::Procedures,
        Section::Insights,
        Section::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Facts => "facts",
            Section::Episodes => "episodes",
            Section::Procedures => "procedures",
            Section::Insights => "insights",
            Section::Events => "events",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub enum_name: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {} value: {}", self.enum_name, self.input)
    }
}

impl std::error::Error for EnumParseError {}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_db_roundtrip() {
        for kind in [
            EventKind::Message,
            EventKind::ToolCall,
            EventKind::ToolResult,
            EventKind::Observation,
            EventKind::Custom,
        ] {
            assert_eq!(EventKind::from_db_str(kind.as_db_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_event_kind_wire_form() {
        let json = serde_json::to_string(&EventKind::ToolCall).unwrap();
        assert_eq!(json, "\"tool_call\"");
    }

    #[test]
    fn test_event_kind_rejects_unknown() {
        assert!(EventKind::from_db_str("telemetry").is_err());
    }

    #[test]
    fn test_fact_status_wire_form() {
        assert_eq!(
            serde_json::to_string(&FactStatus::Deprecated).unwrap(),
            "\"deprecated\""
        );
    }

    #[test]
    fn test_section_order_is_fitting_priority() {
        assert_eq!(
            Section::ALL.map(|s| s.as_str()),
            ["facts", "episodes", "procedures", "insights", "events"]
        );
    }
}
