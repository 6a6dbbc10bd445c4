//! Robot API payload shapes.
//!
//! Responses are decoded into typed reports and validated here, before they
//! can reach the published state.  Request bodies for the command endpoints
//! are built here too.

use std::collections::BTreeMap;

use atlas_types::{
    Axis, BodyPart, ClassDescriptor, CommandResult, Joint, LinkError, Preset, RobotStatus,
    SubsystemStatus,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::transport::decode;

pub const STATUS: &str = "/status";
pub const POSITION: &str = "/position";
pub const CONNECTION: &str = "/connection";
pub const CLASSES: &str = "/classes";
pub const PRESETS: &str = "/presets";
pub const MOVE: &str = "/robot/move";
pub const SPEAK: &str = "/robot/speak";
pub const EMERGENCY: &str = "/robot/emergency";
pub const PRESET_EXECUTE: &str = "/preset/execute";
pub const CLASS_START: &str = "/class/start";
pub const CLASS_STOP: &str = "/class/stop";

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    battery: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    connection: Option<Value>,
    #[serde(default, rename = "activeClass")]
    active_class: Option<u32>,
}

/// Decoded `/status` body.  Absent or unusable fields are `None` and leave
/// the last-known value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub status: Option<RobotStatus>,
    pub battery: Option<u8>,
    pub temperature: Option<f64>,
    pub connection: Option<BTreeMap<String, SubsystemStatus>>,
    pub active_class: Option<u32>,
}

/// Map the robot's status word onto [`RobotStatus`].
pub fn parse_status_word(word: &str) -> Option<RobotStatus> {
    match word.trim().to_ascii_lowercase().as_str() {
        "idle" | "ready" | "standby" => Some(RobotStatus::Idle),
        "active" | "running" | "busy" | "moving" => Some(RobotStatus::Active),
        "error" | "fault" | "emergency" => Some(RobotStatus::Error),
        _ => None,
    }
}

pub fn parse_status(value: Value) -> CommandResult<StatusReport> {
    if !value.is_object() {
        return Err(LinkError::MalformedResponse(format!("{STATUS}: expected an object")));
    }
    let raw: RawStatus = decode(STATUS, value)?;

    let battery = match raw.battery {
        Some(b) if b.is_finite() && (0.0..=100.0).contains(&b) => Some(b.round() as u8),
        Some(b) => {
            return Err(LinkError::MalformedResponse(format!(
                "{STATUS}: battery {b} outside 0..=100"
            )));
        }
        None => None,
    };
    let temperature = match raw.temperature {
        Some(t) if !t.is_finite() => {
            return Err(LinkError::MalformedResponse(format!(
                "{STATUS}: temperature is not finite"
            )));
        }
        t => t,
    };

    Ok(StatusReport {
        status: raw.status.as_deref().and_then(parse_status_word),
        battery,
        temperature,
        connection: raw
            .connection
            .and_then(|c| serde_json::from_value(c).ok()),
        active_class: raw.active_class,
    })
}

/// Decode `/position` into joint readings.
///
/// Parts and axes this client does not track are ignored.  A tracked joint
/// with a non-numeric or out-of-range value rejects the whole payload.
pub fn parse_position(value: Value) -> CommandResult<Vec<(Joint, f64)>> {
    let Value::Object(parts) = value else {
        return Err(LinkError::MalformedResponse(format!("{POSITION}: expected an object")));
    };
    let mut readings = Vec::new();
    for (part_name, axes) in parts {
        let Some(part) = BodyPart::from_name(&part_name) else {
            continue;
        };
        let Value::Object(axes) = axes else {
            return Err(LinkError::MalformedResponse(format!(
                "{POSITION}: {part_name} is not an object"
            )));
        };
        for (axis_name, raw) in axes {
            let Some(joint) = Joint::from_names(part.name(), &axis_name) else {
                continue;
            };
            let Some(angle) = raw.as_f64() else {
                return Err(LinkError::MalformedResponse(format!(
                    "{POSITION}: {joint} is not a number"
                )));
            };
            if !joint.range().contains(angle) {
                return Err(LinkError::MalformedResponse(format!(
                    "{POSITION}: {joint} = {angle} outside its range"
                )));
            }
            readings.push((joint, angle));
        }
    }
    Ok(readings)
}

pub fn parse_connection(value: Value) -> CommandResult<BTreeMap<String, SubsystemStatus>> {
    decode(CONNECTION, value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassList {
    Bare(Vec<ClassDescriptor>),
    Wrapped { classes: Vec<ClassDescriptor> },
}

pub fn parse_classes(value: Value) -> CommandResult<Vec<ClassDescriptor>> {
    match decode(CLASSES, value)? {
        ClassList::Bare(c) | ClassList::Wrapped { classes: c } => Ok(c),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PresetEntry {
    Name(String),
    Detailed(Preset),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PresetList {
    Bare(Vec<PresetEntry>),
    Wrapped { presets: Vec<PresetEntry> },
}

/// Decode `/presets`, which is either a list of names or a list of objects,
/// optionally wrapped in `{ "presets": [...] }`.
pub fn parse_presets(value: Value) -> CommandResult<Vec<Preset>> {
    let entries = match decode(PRESETS, value)? {
        PresetList::Bare(e) | PresetList::Wrapped { presets: e } => e,
    };
    Ok(entries
        .into_iter()
        .map(|e| match e {
            PresetEntry::Name(name) => Preset {
                name,
                description: None,
            },
            PresetEntry::Detailed(p) => p,
        })
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// `/robot/move` body: the part name plus only the commanded axes.
///
/// Axes not named in `targets` are left out so the request never carries
/// another command's unconfirmed value.
pub fn move_body(part: BodyPart, targets: &[(Axis, f64)]) -> Value {
    let mut body = Map::new();
    body.insert("part".into(), Value::from(part.name()));
    for &(axis, angle) in targets {
        body.insert(axis.name().into(), Value::from(angle));
    }
    Value::Object(body)
}

pub fn preset_body(name: &str) -> Value {
    json!({ "preset": name })
}

pub fn class_start_body(id: u32) -> Value {
    json!({ "classId": id })
}

pub fn speak_body(text: &str) -> Value {
    json!({ "text": text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_types::Axis;

    #[test]
    fn status_parses_known_fields() {
        let report = parse_status(json!({
            "status": "active",
            "battery": 87,
            "temperature": 42.5,
            "connection": { "camera": "connected" }
        }))
        .unwrap();
        assert_eq!(report.status, Some(RobotStatus::Active));
        assert_eq!(report.battery, Some(87));
        assert_eq!(report.temperature, Some(42.5));
        assert_eq!(report.connection.unwrap()["camera"], SubsystemStatus::Connected);
    }

    #[test]
    fn unknown_status_word_is_ignored() {
        let report = parse_status(json!({ "status": "dancing" })).unwrap();
        assert_eq!(report.status, None);
    }

    #[test]
    fn battery_over_100_is_malformed() {
        let err = parse_status(json!({ "battery": 150 })).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }

    #[test]
    fn status_must_be_an_object() {
        assert!(parse_status(json!([1, 2])).is_err());
        assert!(parse_status(Value::Null).is_err());
    }

    #[test]
    fn position_skips_unknown_parts_and_axes() {
        let readings = parse_position(json!({
            "head": { "x": 10, "y": -5, "roll": 3 },
            "tail": { "wag": 1 }
        }))
        .unwrap();
        assert_eq!(readings.len(), 2);
        assert!(readings.contains(&(Joint::new(BodyPart::Head, Axis::X).unwrap(), 10.0)));
    }

    #[test]
    fn position_out_of_range_rejects_payload() {
        let err = parse_position(json!({ "head": { "x": 46 } })).unwrap_err();
        assert!(matches!(err, LinkError::MalformedResponse(_)));
    }

    #[test]
    fn position_non_number_rejects_payload() {
        assert!(parse_position(json!({ "leftArm": { "elbow": "bent" } })).is_err());
    }

    #[test]
    fn classes_accept_bare_and_wrapped_lists() {
        let bare = parse_classes(json!([{ "id": 1, "title": "Mathematics" }])).unwrap();
        let wrapped =
            parse_classes(json!({ "classes": [{ "id": 1, "title": "Mathematics" }] })).unwrap();
        assert_eq!(bare, wrapped);
    }

    #[test]
    fn presets_accept_names_and_objects() {
        let presets =
            parse_presets(json!(["Wave", { "name": "Greeting", "description": "hello" }])).unwrap();
        assert_eq!(presets[0].name, "Wave");
        assert_eq!(presets[1].description.as_deref(), Some("hello"));
        let wrapped = parse_presets(json!({ "presets": ["Wave"] })).unwrap();
        assert_eq!(wrapped.len(), 1);
    }

    #[test]
    fn move_body_carries_only_commanded_axes() {
        let body = move_body(BodyPart::LeftArm, &[(Axis::Elbow, 30.0)]);
        assert_eq!(body, json!({ "part": "leftArm", "elbow": 30.0 }));

        let body = move_body(BodyPart::Head, &[(Axis::X, 5.0), (Axis::Z, -10.0)]);
        assert_eq!(body, json!({ "part": "head", "x": 5.0, "z": -10.0 }));
    }

    #[test]
    fn command_bodies_use_api_field_names() {
        assert_eq!(class_start_body(2), json!({ "classId": 2 }));
        assert_eq!(preset_body("Wave"), json!({ "preset": "Wave" }));
        assert_eq!(speak_body("hi"), json!({ "text": "hi" }));
    }
}
