//! [`RobotLink`] – the engine presentation code talks to.
//!
//! Owns one of each component and wires them to a shared [`StateHub`]:
//!
//! ```text
//!   ConfigStore ──► Transport ◄── Poller ──┐
//!                      ▲                   ├──► StateHub ──► subscribers
//!                      └──── Dispatcher ───┘
//! ```
//!
//! Build it once at the application root and share it by `Arc`.
//! [`RobotLink::start`] must be called from inside a Tokio runtime.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use atlas_types::{
    Axis, BodyPart, CommandResult, Joint, LinkState, Preset, RobotCommand, ServerConfig, Side,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config_store::ConfigStore;
use crate::dispatcher::{self, DispatchMode, Dispatcher};
use crate::hub::{StateHub, SubscriptionId};
use crate::poller::{CycleOutcome, Poller};
use crate::sim::SimTransport;
use crate::transport::{HttpTransport, Method, Transport};
use crate::wire;

/// Runtime knobs of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Talk to an in-process simulated robot instead of the network.
    pub demo_mode: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            demo_mode: false,
        }
    }
}

impl LinkSettings {
    /// Defaults overridden by `ATLAS_POLL_INTERVAL_MS`,
    /// `ATLAS_REQUEST_TIMEOUT_MS` and `ATLAS_DEMO`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        let millis = |key: &str| {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
                _ => {
                    warn!(key, value = %raw, "ignoring invalid duration override");
                    None
                }
            }
        };
        if let Some(d) = millis("ATLAS_POLL_INTERVAL_MS") {
            settings.poll_interval = d;
        }
        if let Some(d) = millis("ATLAS_REQUEST_TIMEOUT_MS") {
            settings.request_timeout = d;
        }
        if let Some(demo) = lookup("ATLAS_DEMO") {
            settings.demo_mode = matches!(
                demo.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
        settings
    }
}

/// Result of [`RobotLink::test_connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    pub config: ServerConfig,
}

pub struct RobotLink {
    settings: LinkSettings,
    config: Arc<ConfigStore>,
    transport: Arc<dyn Transport>,
    hub: Arc<StateHub>,
    poller: Arc<Poller>,
    dispatcher: Dispatcher,
    shutdown_tx: watch::Sender<bool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl RobotLink {
    /// Build an engine that talks HTTP, or the simulated robot in demo mode.
    pub fn new(settings: LinkSettings, config: Arc<ConfigStore>) -> Self {
        let transport: Arc<dyn Transport> = if settings.demo_mode {
            info!("demo mode: using the simulated robot");
            Arc::new(SimTransport::new().with_latency(Duration::from_millis(120)))
        } else {
            Arc::new(HttpTransport::new(Arc::clone(&config), settings.request_timeout))
        };
        Self::with_transport(settings, config, transport)
    }

    pub fn with_transport(
        settings: LinkSettings,
        config: Arc<ConfigStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let hub = Arc::new(StateHub::new());
        let poller = Arc::new(Poller::new(
            Arc::clone(&transport),
            Arc::clone(&hub),
            Arc::clone(&config),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&transport), Arc::clone(&hub));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            config,
            transport,
            hub,
            poller,
            dispatcher,
            shutdown_tx,
            poll_task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start background polling.  Idempotent; does nothing after
    /// [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        if self.hub.is_closed() {
            return;
        }
        let mut task = self.poll_task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        let shutdown = self.shutdown_tx.subscribe();
        *task = Some(Arc::clone(&self.poller).spawn(self.settings.poll_interval, shutdown));
    }

    /// Stop polling and freeze the published state.  Results of requests
    /// still in flight are dropped.  Idempotent.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        if !self.hub.is_closed() {
            self.hub.close();
            info!("robot link shut down");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.hub.is_closed()
            && self
                .poll_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    // ── Configuration ────────────────────────────────────────────────────────

    pub fn get_config(&self) -> ServerConfig {
        self.config.get()
    }

    /// Validate and persist a new endpoint.  The next request uses it; a
    /// poll cycle already in flight is discarded.
    pub fn set_config(&self, host: &str, port: &str) -> CommandResult<ServerConfig> {
        self.config.set(host, port)
    }

    pub fn reset_config(&self) -> ServerConfig {
        self.config.reset_to_default()
    }

    /// Probe `/status` once against the current config.
    pub async fn test_connection(&self) -> ConnectionReport {
        let config = self.config.get();
        match self.poller.probe().await {
            Ok(_) => ConnectionReport {
                success: true,
                message: format!("Connected to {}", config.base_url()),
                config,
            },
            Err(e) => ConnectionReport {
                success: false,
                message: e.to_string(),
                config,
            },
        }
    }

    // ── State ────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<LinkState> {
        self.hub.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<LinkState>> {
        self.hub.watch()
    }

    /// See [`StateHub::subscribe`].
    pub fn subscribe(
        &self,
        callback: impl Fn(&LinkState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.hub.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    pub fn clear_last_error(&self) {
        self.hub.update(|m| m.state.last_error = None);
    }

    /// Run a poll cycle immediately, outside the timer.  After
    /// [`shutdown`](Self::shutdown) nothing is fetched.
    pub async fn poll_now(&self) -> CycleOutcome {
        if self.hub.is_closed() {
            return CycleOutcome::Discarded;
        }
        self.poller.cycle().await
    }

    /// Fetch `/presets` and publish the list.
    pub async fn refresh_presets(&self) -> CommandResult<Vec<Preset>> {
        let result = self
            .transport
            .request(wire::PRESETS, Method::Get, None)
            .await
            .and_then(wire::parse_presets);
        match &result {
            Ok(presets) => {
                let presets = presets.clone();
                self.hub.update(|m| m.state.telemetry.presets = presets);
            }
            Err(e) => {
                let e = e.clone();
                self.hub.update(|m| m.state.last_error = Some(e));
            }
        }
        result
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub async fn dispatch(
        &self,
        command: RobotCommand,
        mode: DispatchMode,
    ) -> CommandResult<Value> {
        self.dispatcher.dispatch(command, mode).await
    }

    pub async fn move_joint(&self, joint: Joint, value: f64) -> CommandResult<Value> {
        self.dispatch(dispatcher::move_joint(joint, value), DispatchMode::Normal)
            .await
    }

    pub async fn move_head(&self, x: f64, y: f64, z: f64) -> CommandResult<Value> {
        self.dispatch(
            dispatcher::move_part(BodyPart::Head, [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)]),
            DispatchMode::Normal,
        )
        .await
    }

    pub async fn move_arm(
        &self,
        side: Side,
        shoulder: f64,
        elbow: f64,
        wrist: f64,
    ) -> CommandResult<Value> {
        self.dispatch(
            dispatcher::move_part(
                BodyPart::arm(side),
                [(Axis::Shoulder, shoulder), (Axis::Elbow, elbow), (Axis::Wrist, wrist)],
            ),
            DispatchMode::Normal,
        )
        .await
    }

    /// Fingers in `thumb, index, middle, ring, pinky` order.
    pub async fn move_hand(&self, side: Side, fingers: [f64; 5]) -> CommandResult<Value> {
        self.dispatch(
            dispatcher::move_part(BodyPart::hand(side), Axis::FINGERS.into_iter().zip(fingers)),
            DispatchMode::Normal,
        )
        .await
    }

    pub async fn move_torso(&self, rotation: f64, tilt: f64) -> CommandResult<Value> {
        self.dispatch(
            dispatcher::move_part(
                BodyPart::Torso,
                [(Axis::Rotation, rotation), (Axis::Tilt, tilt)],
            ),
            DispatchMode::Normal,
        )
        .await
    }

    pub async fn execute_preset(&self, name: &str) -> CommandResult<Value> {
        self.dispatch(RobotCommand::ExecutePreset(name.to_string()), DispatchMode::Normal)
            .await
    }

    pub async fn start_class(&self, class_id: u32) -> CommandResult<Value> {
        self.dispatch(RobotCommand::StartClass(class_id), DispatchMode::Normal)
            .await
    }

    pub async fn stop_class(&self) -> CommandResult<Value> {
        self.dispatch(RobotCommand::StopClass, DispatchMode::Normal).await
    }

    pub async fn speak(&self, text: &str) -> CommandResult<Value> {
        self.dispatch(RobotCommand::Speak(text.to_string()), DispatchMode::Normal)
            .await
    }

    /// Halt the robot.
    ///
    /// Skips range checks and field locks.  A `Disconnected` link refuses it
    /// with [`LinkError::NotConnected`] unless `mode` is
    /// [`DispatchMode::Forced`].
    pub async fn emergency_stop(&self, mode: DispatchMode) -> CommandResult<Value> {
        self.dispatch(RobotCommand::EmergencyStop, mode).await
    }
}

impl Drop for RobotLink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
