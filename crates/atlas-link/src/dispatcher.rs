//! [`Dispatcher`] – optimistic command delivery.
//!
//! A command runs through four steps:
//!
//! 1. **Verify** – [`CommandVerifier`] rejects malformed or out-of-range
//!    commands, and commands sent while the link is down, before anything is
//!    touched.
//! 2. **Claim** – the command locks every [`CommandTarget`] it changes.  Two
//!    commands on the same target run one after the other in arrival order;
//!    commands on different targets run concurrently.
//! 3. **Apply** – the new values are written to the published state and a
//!    [`PendingCommand`] records what they replaced.
//! 4. **Reconcile** – on success the pending record is dropped.  On failure
//!    each target is restored to its previous value, unless something newer
//!    has already overwritten it, and the error becomes `last_error`.
//!
//! The emergency stop skips claiming and applying.  Presets and speech have
//! no local effect to apply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use atlas_types::{
    Axis, BodyPart, CommandResult, CommandTarget, Joint, LinkError, LinkState, RobotCommand,
    RobotStatus,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{PendingCommand, StateHub, TargetValue};
use crate::transport::{Method, Transport};
use crate::verifier::{CommandVerifier, VerifyContext};
use crate::wire;

/// How strictly a command is gated on connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Refuse with [`LinkError::NotConnected`] while the robot is unreachable.
    #[default]
    Normal,
    /// Send regardless of the last observed connectivity.
    Forced,
}

/// One value a command wants to write before it is sent.
#[derive(Debug, Clone, Copy)]
struct Change {
    target: CommandTarget,
    value: TargetValue,
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    hub: Arc<StateHub>,
    verifier: CommandVerifier,
    slots: Mutex<HashMap<CommandTarget, Arc<AsyncMutex<()>>>>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, hub: Arc<StateHub>) -> Self {
        Self::with_verifier(transport, hub, CommandVerifier::standard())
    }

    pub fn with_verifier(
        transport: Arc<dyn Transport>,
        hub: Arc<StateHub>,
        verifier: CommandVerifier,
    ) -> Self {
        Self {
            transport,
            hub,
            verifier,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Send `command` and return the robot's answer.
    pub async fn dispatch(
        &self,
        command: RobotCommand,
        mode: DispatchMode,
    ) -> CommandResult<Value> {
        if self.hub.is_closed() {
            return Err(LinkError::EngineStopped);
        }

        let snapshot = self.hub.snapshot();
        let ctx = VerifyContext {
            state: &snapshot,
            mode,
        };
        if let Err(e) = self.verifier.verify(&command, &ctx) {
            self.record_error(&e);
            return Err(e);
        }

        let id = Uuid::new_v4();
        debug!(command_id = %id, kind = command.kind(), ?mode, "dispatching command");

        match command {
            RobotCommand::EmergencyStop => self.emergency_stop(id).await,
            RobotCommand::ExecutePreset(name) => {
                self.send_plain(id, wire::PRESET_EXECUTE, wire::preset_body(&name)).await
            }
            RobotCommand::Speak(text) => {
                self.send_plain(id, wire::SPEAK, wire::speak_body(&text)).await
            }
            RobotCommand::Move { part, targets } => {
                let changes = targets
                    .iter()
                    .filter_map(|&(axis, value)| {
                        Joint::new(part, axis).map(|joint| Change {
                            target: CommandTarget::Joint(joint),
                            value: TargetValue::Angle(value),
                        })
                    })
                    .collect();
                let body = wire::move_body(part, &targets);
                self.send_optimistic(id, changes, wire::MOVE, move |_| body).await
            }
            RobotCommand::StartClass(class_id) => {
                let change = Change {
                    target: CommandTarget::RunState,
                    value: TargetValue::Run {
                        status: RobotStatus::Active,
                        active_class: Some(class_id),
                    },
                };
                self.send_optimistic(id, vec![change], wire::CLASS_START, move |_| {
                    wire::class_start_body(class_id)
                })
                .await
            }
            RobotCommand::StopClass => {
                let change = Change {
                    target: CommandTarget::RunState,
                    value: TargetValue::Run {
                        status: RobotStatus::Idle,
                        active_class: None,
                    },
                };
                self.send_optimistic(id, vec![change], wire::CLASS_STOP, |_| json!({}))
                    .await
            }
        }
    }

    /// Claim, apply, send, reconcile.
    async fn send_optimistic(
        &self,
        id: Uuid,
        mut changes: Vec<Change>,
        endpoint: &'static str,
        body: impl FnOnce(&LinkState) -> Value,
    ) -> CommandResult<Value> {
        // Later duplicates of the same target win.
        changes.reverse();
        changes.sort_by_key(|c| c.target);
        changes.dedup_by_key(|c| c.target);

        let _claims = self.claim(&changes).await;

        let applied = self.hub.update(|m| {
            for change in &changes {
                let previous = TargetValue::read(&m.state, change.target);
                change.value.write(&mut m.state, change.target);
                m.insert_pending(PendingCommand {
                    id,
                    target: change.target,
                    previous,
                    new: change.value,
                });
            }
            body(&m.state)
        });
        let Some(body) = applied else {
            return Err(LinkError::EngineStopped);
        };

        let result = self.transport.request(endpoint, Method::Post, Some(body)).await;

        self.hub.update(|m| {
            for change in &changes {
                let Some(pending) = m.take_pending(change.target, id) else {
                    continue;
                };
                if result.is_err() && TargetValue::read(&m.state, change.target) == pending.new {
                    pending.previous.write(&mut m.state, change.target);
                }
            }
            if let Err(e) = &result {
                m.state.last_error = Some(e.clone());
            }
        });

        match &result {
            Ok(_) => debug!(command_id = %id, endpoint, "command confirmed"),
            Err(e) => warn!(command_id = %id, endpoint, error = %e, "command failed; rolled back"),
        }
        result
    }

    async fn send_plain(
        &self,
        id: Uuid,
        endpoint: &'static str,
        body: Value,
    ) -> CommandResult<Value> {
        let result = self.transport.request(endpoint, Method::Post, Some(body)).await;
        match &result {
            Ok(_) => debug!(command_id = %id, endpoint, "command confirmed"),
            Err(e) => {
                warn!(command_id = %id, endpoint, error = %e, "command failed");
                self.record_error(e);
            }
        }
        result
    }

    async fn emergency_stop(&self, id: Uuid) -> CommandResult<Value> {
        info!(command_id = %id, "emergency stop requested");
        let result = self
            .transport
            .request(wire::EMERGENCY, Method::Post, Some(json!({})))
            .await;
        match &result {
            Ok(_) => {
                self.hub.update(|m| {
                    m.state.telemetry.status = RobotStatus::Idle;
                    m.state.telemetry.active_class = None;
                });
                info!(command_id = %id, "emergency stop confirmed");
            }
            Err(e) => {
                warn!(command_id = %id, error = %e, "emergency stop failed");
                self.record_error(e);
            }
        }
        result
    }

    /// Lock every target in `changes`, in sorted order.
    async fn claim(&self, changes: &[Change]) -> Vec<OwnedMutexGuard<()>> {
        let slots: Vec<_> = {
            let mut map = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            changes
                .iter()
                .map(|c| Arc::clone(map.entry(c.target).or_default()))
                .collect()
        };
        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }
        guards
    }

    fn record_error(&self, error: &LinkError) {
        self.hub.update(|m| m.state.last_error = Some(error.clone()));
    }
}

/// Build a single-axis move.
pub fn move_joint(joint: Joint, value: f64) -> RobotCommand {
    RobotCommand::Move {
        part: joint.part(),
        targets: vec![(joint.axis(), value)],
    }
}

/// Build a move that sets every listed axis of `part`.
pub fn move_part(
    part: BodyPart,
    targets: impl IntoIterator<Item = (Axis, f64)>,
) -> RobotCommand {
    RobotCommand::Move {
        part,
        targets: targets.into_iter().collect(),
    }
}
