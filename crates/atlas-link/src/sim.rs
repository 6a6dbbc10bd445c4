//! In-process simulated robot for demo mode and headless tests.
//!
//! [`SimTransport`] answers the same endpoints as the robot API from an
//! in-memory model: moves update the pose, classes and the emergency stop
//! change the run state, and every `/status` read drains a little battery.
//! The whole link stack runs against it without any hardware.
//!
//! # Example
//!
//! ```rust
//! use atlas_link::sim::SimTransport;
//! use atlas_link::transport::{Method, Transport};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let sim = SimTransport::new();
//! let status = sim.request("/status", Method::Get, None).await.unwrap();
//! assert_eq!(status["status"], "idle");
//! # });
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use atlas_types::{
    BodyPart, ClassDescriptor, ClassStatus, CommandResult, Joint, LinkError, PositionTree, Preset,
    RobotStatus,
};
use serde_json::{Value, json};
use tracing::debug;

use crate::transport::{Method, Transport};
use crate::wire;

// ────────────────────────────────────────────────────────────────────────────
// Robot model
// ────────────────────────────────────────────────────────────────────────────

struct SimRobot {
    online: bool,
    status: RobotStatus,
    battery: f64,
    temperature: f64,
    reads: u64,
    position: PositionTree,
    active_class: Option<u32>,
    classes: Vec<ClassDescriptor>,
    presets: Vec<Preset>,
    spoken: Vec<String>,
}

impl SimRobot {
    fn new() -> Self {
        Self {
            online: true,
            status: RobotStatus::Idle,
            battery: 100.0,
            temperature: 38.0,
            reads: 0,
            position: PositionTree::default(),
            active_class: None,
            classes: seed_classes(),
            presets: ["Greeting", "Wave", "Applause", "Point", "OK", "Peace"]
                .into_iter()
                .map(|name| Preset {
                    name: name.to_string(),
                    description: None,
                })
                .collect(),
            spoken: Vec::new(),
        }
    }

    fn status_body(&mut self) -> Value {
        self.reads += 1;
        self.battery = (self.battery - 0.1).max(5.0);
        // Slow oscillation between 38 and 41 °C.
        let phase = (self.reads % 20) as f64;
        self.temperature = 38.0 + if phase < 10.0 { phase * 0.3 } else { (20.0 - phase) * 0.3 };
        json!({
            "status": self.status.to_string(),
            "battery": self.battery.round(),
            "temperature": self.temperature,
            "activeClass": self.active_class,
            "connection": self.connection_body(),
        })
    }

    fn connection_body(&self) -> Value {
        json!({
            "mainServer": "connected",
            "robotServer": "connected",
            "database": "connected",
            "camera": "disconnected",
        })
    }

    fn apply_move(&mut self, body: &Value) -> CommandResult<Value> {
        let part = body
            .get("part")
            .and_then(Value::as_str)
            .and_then(BodyPart::from_name)
            .ok_or(LinkError::HttpStatus(400))?;
        let mut next = self.position.clone();
        for &axis in part.axes() {
            let Some(raw) = body.get(axis.name()) else {
                continue;
            };
            let angle = raw.as_f64().ok_or(LinkError::HttpStatus(400))?;
            let joint = Joint::new(part, axis).ok_or(LinkError::HttpStatus(400))?;
            if !joint.range().contains(angle) {
                return Err(LinkError::HttpStatus(422));
            }
            next.set(joint, angle);
        }
        self.position = next;
        Ok(ok(format!("{part} moved")))
    }

    fn start_class(&mut self, body: &Value) -> CommandResult<Value> {
        let id = body
            .get("classId")
            .and_then(Value::as_u64)
            .ok_or(LinkError::HttpStatus(400))?;
        let class = self
            .classes
            .iter_mut()
            .find(|c| u64::from(c.id) == id)
            .ok_or(LinkError::HttpStatus(404))?;
        class.status = ClassStatus::Active;
        let (id, title) = (class.id, class.title.clone());
        self.active_class = Some(id);
        self.status = RobotStatus::Active;
        Ok(ok(format!("class {title} started")))
    }

    fn stop_class(&mut self) -> Value {
        if let Some(id) = self.active_class.take()
            && let Some(class) = self.classes.iter_mut().find(|c| c.id == id)
        {
            class.status = ClassStatus::Completed;
        }
        self.status = RobotStatus::Idle;
        ok("class stopped".into())
    }
}

fn ok(message: String) -> Value {
    json!({ "success": true, "message": message })
}

fn seed_classes() -> Vec<ClassDescriptor> {
    let class = |id, title: &str, duration: &str, level: &str, subject: &str, actions: &[&str]| {
        ClassDescriptor {
            id,
            title: title.to_string(),
            duration: Some(duration.to_string()),
            level: Some(level.to_string()),
            subject: Some(subject.to_string()),
            description: None,
            schedule: None,
            status: ClassStatus::Scheduled,
            robot_actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    };
    vec![
        class(
            1,
            "Introduction to Robotics",
            "45 min",
            "Basic",
            "Technology",
            &["Greeting", "Wave"],
        ),
        class(
            2,
            "Programming Movements",
            "60 min",
            "Intermediate",
            "Programming",
            &["Point", "OK"],
        ),
        class(3, "Basic Artificial Intelligence", "90 min", "Advanced", "AI", &["Applause"]),
        class(
            4,
            "Human-Robot Interaction",
            "75 min",
            "Intermediate",
            "Interaction",
            &["Greeting", "Peace"],
        ),
        class(5, "Sensors and Perception", "50 min", "Basic", "Electronics", &["Point"]),
    ]
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// [`Transport`] backed by a simulated robot.
pub struct SimTransport {
    robot: Mutex<SimRobot>,
    latency: Duration,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            robot: Mutex::new(SimRobot::new()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn robot(&self) -> MutexGuard<'_, SimRobot> {
        self.robot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the simulated robot off the network (`false`) or bring it back.
    pub fn set_online(&self, online: bool) {
        self.robot().online = online;
    }

    /// Current simulated pose.
    pub fn position(&self) -> PositionTree {
        self.robot().position.clone()
    }

    pub fn status(&self) -> RobotStatus {
        self.robot().status
    }

    /// Everything the robot has been asked to say, oldest first.
    pub fn spoken(&self) -> Vec<String> {
        self.robot().spoken.clone()
    }

    fn route(&self, endpoint: &str, method: Method, body: &Value) -> CommandResult<Value> {
        let mut robot = self.robot();
        if !robot.online {
            return Err(LinkError::NetworkUnreachable("simulated robot is offline".into()));
        }
        match (method, endpoint) {
            (Method::Get, wire::STATUS) => Ok(robot.status_body()),
            (Method::Get, wire::POSITION) => serde_json::to_value(&robot.position)
                .map_err(|e| LinkError::MalformedResponse(e.to_string())),
            (Method::Get, wire::CONNECTION) => Ok(robot.connection_body()),
            (Method::Get, wire::CLASSES) => serde_json::to_value(&robot.classes)
                .map_err(|e| LinkError::MalformedResponse(e.to_string())),
            (Method::Get, wire::PRESETS) => serde_json::to_value(&robot.presets)
                .map_err(|e| LinkError::MalformedResponse(e.to_string())),
            (Method::Post, wire::MOVE) => robot.apply_move(body),
            (Method::Post, wire::SPEAK) => {
                let text = body
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.trim().is_empty())
                    .ok_or(LinkError::HttpStatus(400))?;
                robot.spoken.push(text.to_string());
                Ok(ok(format!("said {text:?}")))
            }
            (Method::Post, wire::PRESET_EXECUTE) => {
                let name = body.get("preset").and_then(Value::as_str).unwrap_or_default();
                if robot.presets.iter().any(|p| p.name == name) {
                    Ok(ok(format!("preset {name} executed")))
                } else {
                    Err(LinkError::HttpStatus(404))
                }
            }
            (Method::Post, wire::CLASS_START) => robot.start_class(body),
            (Method::Post, wire::CLASS_STOP) => Ok(robot.stop_class()),
            (Method::Post, wire::EMERGENCY) => {
                robot.stop_class();
                Ok(ok("emergency stop engaged".into()))
            }
            _ => Err(LinkError::HttpStatus(404)),
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> CommandResult<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let body = body.unwrap_or(Value::Null);
        let result = self.route(endpoint, method, &body);
        debug!(endpoint, ?method, ok = result.is_ok(), "simulated robot request");
        result
    }
}
