use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod position;

pub use position::{Axis, AxisRange, BodyPart, Joint, PositionTree, Side};

/// Host used when nothing has been configured.
pub const DEFAULT_HOST: &str = "localhost";
/// Port used when nothing has been configured.
pub const DEFAULT_PORT: &str = "8080";

/// Where the robot API lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
        }
    }
}

impl ServerConfig {
    /// Base endpoint every request path is appended to.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }
}

/// Derived reachability of the robot endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Unknown => write!(f, "unknown"),
            ConnectivityState::Connected => write!(f, "connected"),
            ConnectivityState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Operating status reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotStatus {
    #[default]
    Idle,
    Active,
    Error,
}

impl fmt::Display for RobotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobotStatus::Idle => write!(f, "idle"),
            RobotStatus::Active => write!(f, "active"),
            RobotStatus::Error => write!(f, "error"),
        }
    }
}

/// Link state of one robot subsystem as reported by `/connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemStatus {
    Connected,
    Disconnected,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassStatus {
    #[default]
    Scheduled,
    Active,
    Completed,
    #[serde(other)]
    Other,
}

/// A lesson the robot can run, as listed by `/classes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDescriptor {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub status: ClassStatus,
    #[serde(default)]
    pub robot_actions: Vec<String>,
}

/// A named movement sequence the robot knows how to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Last-known-good robot telemetry.
///
/// Replaced wholesale on every publish; never edited in place once shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub status: RobotStatus,
    /// Battery charge, percent.
    pub battery: u8,
    /// Core temperature, °C.
    pub temperature: f64,
    pub position: PositionTree,
    pub connection: BTreeMap<String, SubsystemStatus>,
    pub classes: Vec<ClassDescriptor>,
    pub presets: Vec<Preset>,
    pub active_class: Option<u32>,
    /// When the robot last answered `/status`.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            status: RobotStatus::Idle,
            battery: 0,
            temperature: 0.0,
            position: PositionTree::default(),
            connection: BTreeMap::new(),
            classes: Vec::new(),
            presets: Vec::new(),
            active_class: None,
            updated_at: None,
        }
    }
}

/// The read model presentation code subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    pub connectivity: ConnectivityState,
    pub telemetry: TelemetrySnapshot,
    pub last_error: Option<LinkError>,
}

/// Something a command can claim while it is in flight.
///
/// Two commands with the same target are serialized; different targets run
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommandTarget {
    Joint(Joint),
    /// Robot status together with the running class.
    RunState,
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Joint(j) => write!(f, "{j}"),
            CommandTarget::RunState => write!(f, "run_state"),
        }
    }
}

/// Operator intents the engine can send to the robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum RobotCommand {
    /// Move one or more axes of a single part in one request.
    Move {
        part: BodyPart,
        targets: Vec<(Axis, f64)>,
    },
    ExecutePreset(String),
    StartClass(u32),
    StopClass,
    Speak(String),
    /// Halt every movement; skips optimistic updates and range checks.
    EmergencyStop,
}

impl RobotCommand {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RobotCommand::Move { .. } => "move",
            RobotCommand::ExecutePreset(_) => "execute_preset",
            RobotCommand::StartClass(_) => "start_class",
            RobotCommand::StopClass => "stop_class",
            RobotCommand::Speak(_) => "speak",
            RobotCommand::EmergencyStop => "emergency_stop",
        }
    }
}

/// Every failure the link can report.  Returned as data, never raised.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkError {
    #[error("Robot unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Robot answered with HTTP status {0}")]
    HttpStatus(u16),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("{target} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        target: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Robot is not connected")]
    NotConnected,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration storage error: {0}")]
    Storage(String),

    #[error("Robot link has been shut down")]
    EngineStopped,
}

impl LinkError {
    /// `true` for failures that come from talking to the robot rather than
    /// from local validation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::NetworkUnreachable(_)
                | LinkError::Timeout
                | LinkError::HttpStatus(_)
                | LinkError::MalformedResponse(_)
        )
    }
}

/// Uniform outcome of every transport and dispatcher call.
pub type CommandResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_base_url() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.base_url(), "http://localhost:8080/api");
    }

    #[test]
    fn custom_config_base_url() {
        let cfg = ServerConfig {
            host: "10.0.0.5".into(),
            port: "9090".into(),
        };
        assert_eq!(cfg.base_url(), "http://10.0.0.5:9090/api");
    }

    #[test]
    fn robot_command_move_roundtrip() {
        let cmd = RobotCommand::Move {
            part: BodyPart::Head,
            targets: vec![(Axis::X, 10.0)],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"Move\""));
        let back: RobotCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn emergency_stop_roundtrip() {
        let json = serde_json::to_string(&RobotCommand::EmergencyStop).unwrap();
        let back: RobotCommand = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, RobotCommand::EmergencyStop));
    }

    #[test]
    fn link_error_display() {
        assert!(LinkError::HttpStatus(503).to_string().contains("503"));
        let err = LinkError::OutOfRange {
            target: "head.x".into(),
            value: 46.0,
            min: -45.0,
            max: 45.0,
        };
        assert!(err.to_string().contains("head.x"));
    }

    #[test]
    fn only_wire_failures_are_transport_errors() {
        assert!(LinkError::Timeout.is_transport());
        assert!(LinkError::HttpStatus(500).is_transport());
        assert!(!LinkError::NotConnected.is_transport());
        assert!(!LinkError::InvalidConfig("x".into()).is_transport());
    }

    #[test]
    fn subsystem_status_tolerates_unknown_values() {
        let map: BTreeMap<String, SubsystemStatus> =
            serde_json::from_str(r#"{"camera":"connected","database":"booting"}"#).unwrap();
        assert_eq!(map["camera"], SubsystemStatus::Connected);
        assert_eq!(map["database"], SubsystemStatus::Unknown);
    }

    #[test]
    fn class_descriptor_accepts_sparse_payload() {
        let c: ClassDescriptor =
            serde_json::from_str(r#"{"id":2,"title":"Programming","robotActions":["wave"]}"#)
                .unwrap();
        assert_eq!(c.id, 2);
        assert_eq!(c.status, ClassStatus::Scheduled);
        assert_eq!(c.robot_actions, vec!["wave".to_string()]);
    }
}
