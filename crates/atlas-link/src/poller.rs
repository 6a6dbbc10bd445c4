//! [`Poller`] – periodic telemetry refresh.
//!
//! Each cycle fetches `/status`, `/position`, `/connection` and `/classes`
//! concurrently and merges whatever succeeded into the published state in a
//! single update:
//!
//! * `/status` decides connectivity.  Success means `Connected` and refreshes
//!   status, battery, temperature and `updated_at`; failure means
//!   `Disconnected` and sets `last_error`.
//! * The other three only replace their own sub-field.  A failure there keeps
//!   the last-known value and is logged, nothing more.
//! * Joints and run state claimed by an in-flight command are not touched;
//!   the optimistic value stays until that command resolves.
//!
//! At most one cycle is in flight.  A tick that arrives while a cycle is
//! still fetching is skipped, not queued.  A cycle whose results arrive after
//! the connection config changed, or after the hub closed, is discarded.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use atlas_types::{
    ClassDescriptor, CommandResult, CommandTarget, ConnectivityState, Joint, RobotStatus,
    SubsystemStatus,
};
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config_store::ConfigStore;
use crate::hub::{Mutation, StateHub};
use crate::transport::{Method, Transport};
use crate::wire::{self, StatusReport};

/// What happened to one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Results were merged into the published state.
    Merged,
    /// A previous cycle was still fetching; nothing was requested.
    Skipped,
    /// Results arrived after a config change or teardown and were dropped.
    Discarded,
}

/// Clears the fetching flag however the cycle ends.
struct FetchGuard<'a>(&'a AtomicBool);

impl<'a> FetchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CycleResults {
    status: CommandResult<StatusReport>,
    position: CommandResult<Vec<(Joint, f64)>>,
    connection: CommandResult<BTreeMap<String, SubsystemStatus>>,
    classes: CommandResult<Vec<ClassDescriptor>>,
}

pub struct Poller {
    transport: Arc<dyn Transport>,
    hub: Arc<StateHub>,
    config: Arc<ConfigStore>,
    fetching: AtomicBool,
}

impl Poller {
    pub fn new(
        transport: Arc<dyn Transport>,
        hub: Arc<StateHub>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            transport,
            hub,
            config,
            fetching: AtomicBool::new(false),
        }
    }

    /// `true` while a cycle is waiting on the robot.
    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::Acquire)
    }

    /// Run one poll cycle now.
    pub async fn cycle(&self) -> CycleOutcome {
        let Some(_guard) = FetchGuard::acquire(&self.fetching) else {
            debug!("poll tick skipped: previous cycle still fetching");
            return CycleOutcome::Skipped;
        };
        let generation = self.config.generation();

        let (status, position, connection, classes) = tokio::join!(
            self.get(wire::STATUS),
            self.get(wire::POSITION),
            self.get(wire::CONNECTION),
            self.get(wire::CLASSES),
        );
        let results = CycleResults {
            status: status.and_then(wire::parse_status),
            position: position.and_then(wire::parse_position),
            connection: connection.and_then(wire::parse_connection),
            classes: classes.and_then(wire::parse_classes),
        };

        let config = &self.config;
        let merged = self.hub.update(|m| {
            if config.generation() != generation {
                return false;
            }
            merge_cycle(m, results);
            true
        });
        match merged {
            Some(true) => CycleOutcome::Merged,
            _ => {
                debug!("poll results discarded");
                CycleOutcome::Discarded
            }
        }
    }

    /// Fetch `/status` only and merge it.  Returns the fetch outcome.
    pub async fn probe(&self) -> CommandResult<StatusReport> {
        let generation = self.config.generation();
        let status = self.get(wire::STATUS).await.and_then(wire::parse_status);
        let config = &self.config;
        self.hub.update(|m| {
            if config.generation() == generation {
                merge_status(m, status.clone());
            }
        });
        status
    }

    async fn get(&self, endpoint: &'static str) -> CommandResult<serde_json::Value> {
        self.transport.request(endpoint, Method::Get, None).await
    }

    /// Spawn the interval loop.  Each tick starts a cycle in its own task so a
    /// slow robot never delays the timer; overlapping ticks are skipped by
    /// [`cycle`](Self::cycle).  The loop exits when `shutdown` turns `true`.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "telemetry poller started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let poller = Arc::clone(&self);
                        tokio::spawn(async move {
                            poller.cycle().await;
                        });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("telemetry poller stopped");
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Merge
// ─────────────────────────────────────────────────────────────────────────────

fn merge_cycle(m: &mut Mutation<'_>, results: CycleResults) {
    merge_status(m, results.status);

    match results.position {
        Ok(readings) => {
            for (joint, angle) in readings {
                if !m.is_pending(CommandTarget::Joint(joint)) {
                    m.state.telemetry.position.set(joint, angle);
                }
            }
        }
        Err(e) => debug!(error = %e, "position not refreshed"),
    }

    match results.connection {
        Ok(connection) => m.state.telemetry.connection = connection,
        Err(e) => debug!(error = %e, "connection summary not refreshed"),
    }

    match results.classes {
        Ok(classes) => m.state.telemetry.classes = classes,
        Err(e) => debug!(error = %e, "class list not refreshed"),
    }
}

fn merge_status(m: &mut Mutation<'_>, status: CommandResult<StatusReport>) {
    let previous = m.state.connectivity;
    match status {
        Ok(report) => {
            let run_state_pending = m.is_pending(CommandTarget::RunState);
            m.state.connectivity = ConnectivityState::Connected;
            let telemetry = &mut m.state.telemetry;
            if !run_state_pending {
                if let Some(status) = report.status {
                    telemetry.status = status;
                }
                if let Some(id) = report.active_class {
                    telemetry.active_class = Some(id);
                } else if report.status == Some(RobotStatus::Idle) {
                    telemetry.active_class = None;
                }
            }
            if let Some(battery) = report.battery {
                telemetry.battery = battery;
            }
            if let Some(temperature) = report.temperature {
                telemetry.temperature = temperature;
            }
            if let Some(connection) = report.connection {
                telemetry.connection = connection;
            }
            telemetry.updated_at = Some(Utc::now());
            if previous != ConnectivityState::Connected {
                info!("robot link connected");
            }
        }
        Err(e) => {
            if previous != ConnectivityState::Disconnected {
                warn!(error = %e, "robot link lost");
            }
            m.state.connectivity = ConnectivityState::Disconnected;
            m.state.last_error = Some(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{PendingCommand, TargetValue};
    use crate::test_support::ScriptedTransport;
    use atlas_types::{Axis, BodyPart, LinkError};
    use serde_json::json;
    use uuid::Uuid;

    fn head_x() -> Joint {
        Joint::new(BodyPart::Head, Axis::X).unwrap()
    }

    fn robot() -> Arc<ScriptedTransport> {
        let t = Arc::new(ScriptedTransport::new());
        t.set_response(
            wire::STATUS,
            Ok(json!({ "status": "active", "battery": 80, "temperature": 41.5 })),
        );
        t.set_response(wire::POSITION, Ok(json!({ "head": { "x": 12.0 } })));
        t.set_response(wire::CONNECTION, Ok(json!({ "camera": "connected" })));
        t.set_response(wire::CLASSES, Ok(json!([{ "id": 1, "title": "Robotics" }])));
        t
    }

    fn poller(transport: Arc<ScriptedTransport>) -> (Arc<Poller>, Arc<StateHub>, Arc<ConfigStore>) {
        let hub = Arc::new(StateHub::new());
        let config = Arc::new(ConfigStore::in_memory());
        let poller = Arc::new(Poller::new(transport, Arc::clone(&hub), Arc::clone(&config)));
        (poller, hub, config)
    }

    #[tokio::test]
    async fn cycle_merges_every_endpoint() {
        let (poller, hub, _) = poller(robot());
        assert_eq!(poller.cycle().await, CycleOutcome::Merged);

        let state = hub.snapshot();
        assert_eq!(state.connectivity, ConnectivityState::Connected);
        assert_eq!(state.telemetry.status, RobotStatus::Active);
        assert_eq!(state.telemetry.battery, 80);
        assert_eq!(state.telemetry.temperature, 41.5);
        assert_eq!(state.telemetry.position.get(head_x()), 12.0);
        assert_eq!(state.telemetry.connection["camera"], SubsystemStatus::Connected);
        assert_eq!(state.telemetry.classes.len(), 1);
        assert!(state.telemetry.updated_at.is_some());
    }

    #[tokio::test]
    async fn cycle_only_issues_gets() {
        let transport = robot();
        let (poller, _, _) = poller(Arc::clone(&transport));
        poller.cycle().await;
        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|c| c.method == Method::Get && c.body.is_none()));
    }

    #[tokio::test]
    async fn status_failure_flips_to_disconnected_and_back() {
        let transport = robot();
        let (poller, hub, _) = poller(Arc::clone(&transport));
        poller.cycle().await;
        let connected_at = hub.snapshot().telemetry.updated_at;

        transport.set_response(wire::STATUS, Err(LinkError::NetworkUnreachable("refused".into())));
        poller.cycle().await;
        let state = hub.snapshot();
        assert_eq!(state.connectivity, ConnectivityState::Disconnected);
        assert!(matches!(state.last_error, Some(LinkError::NetworkUnreachable(_))));
        // Last-known telemetry survives.
        assert_eq!(state.telemetry.battery, 80);
        assert_eq!(state.telemetry.updated_at, connected_at);

        transport.set_response(wire::STATUS, Ok(json!({ "status": "idle" })));
        poller.cycle().await;
        assert_eq!(hub.snapshot().connectivity, ConnectivityState::Connected);
    }

    #[tokio::test]
    async fn secondary_failures_do_not_flip_connectivity() {
        let transport = robot();
        transport.set_response(wire::POSITION, Err(LinkError::Timeout));
        transport.set_response(wire::CLASSES, Err(LinkError::HttpStatus(500)));
        let (poller, hub, _) = poller(transport);

        poller.cycle().await;
        let state = hub.snapshot();
        assert_eq!(state.connectivity, ConnectivityState::Connected);
        assert_eq!(state.telemetry.position.get(head_x()), 0.0);
        assert!(state.telemetry.classes.is_empty());
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn out_of_range_position_keeps_last_known_tree() {
        let transport = robot();
        let (poller, hub, _) = poller(Arc::clone(&transport));
        poller.cycle().await;

        transport.set_response(wire::POSITION, Ok(json!({ "head": { "x": 99.0, "y": 5.0 } })));
        poller.cycle().await;
        let state = hub.snapshot();
        assert_eq!(state.telemetry.position.get(head_x()), 12.0);
        assert!(state.telemetry.position.is_within_bounds());
    }

    #[tokio::test]
    async fn tick_during_fetch_is_skipped() {
        let transport = robot();
        transport.hold(wire::STATUS);
        let (poller, _, _) = poller(Arc::clone(&transport));

        let first = {
            let p = Arc::clone(&poller);
            tokio::spawn(async move { p.cycle().await })
        };
        transport.wait_for_calls(wire::STATUS, 1).await;
        assert!(poller.is_fetching());

        assert_eq!(poller.cycle().await, CycleOutcome::Skipped);
        assert_eq!(transport.calls_to(wire::STATUS), 1);

        transport.release(1);
        assert_eq!(first.await.unwrap(), CycleOutcome::Merged);
        assert!(!poller.is_fetching());
    }

    #[tokio::test]
    async fn config_change_mid_cycle_discards_results() {
        let transport = robot();
        transport.hold(wire::STATUS);
        let (poller, hub, config) = poller(Arc::clone(&transport));

        let cycle = {
            let p = Arc::clone(&poller);
            tokio::spawn(async move { p.cycle().await })
        };
        transport.wait_for_calls(wire::STATUS, 1).await;
        config.set("10.0.0.9", "9000").unwrap();
        transport.release(1);

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        assert_eq!(hub.snapshot().connectivity, ConnectivityState::Unknown);
    }

    #[tokio::test]
    async fn results_after_teardown_are_discarded() {
        let transport = robot();
        transport.hold(wire::STATUS);
        let (poller, hub, _) = poller(Arc::clone(&transport));

        let cycle = {
            let p = Arc::clone(&poller);
            tokio::spawn(async move { p.cycle().await })
        };
        transport.wait_for_calls(wire::STATUS, 1).await;
        hub.close();
        transport.release(1);

        assert_eq!(cycle.await.unwrap(), CycleOutcome::Discarded);
        assert_eq!(hub.snapshot().connectivity, ConnectivityState::Unknown);
    }

    #[tokio::test]
    async fn pending_joint_keeps_optimistic_value() {
        let (poller, hub, _) = poller(robot());
        let target = CommandTarget::Joint(head_x());
        hub.update(|m| {
            m.state.telemetry.position.set(head_x(), 30.0);
            m.insert_pending(PendingCommand {
                id: Uuid::new_v4(),
                target,
                previous: TargetValue::Angle(0.0),
                new: TargetValue::Angle(30.0),
            });
        });

        poller.cycle().await;
        assert_eq!(hub.snapshot().telemetry.position.get(head_x()), 30.0);
    }

    #[tokio::test]
    async fn probe_updates_connectivity_only_from_status() {
        let transport = robot();
        let (poller, hub, _) = poller(Arc::clone(&transport));
        let report = poller.probe().await.unwrap();
        assert_eq!(report.battery, Some(80));
        let state = hub.snapshot();
        assert_eq!(state.connectivity, ConnectivityState::Connected);
        assert_eq!(state.telemetry.position.get(head_x()), 0.0);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_polls_until_shutdown() {
        let transport = robot();
        let (poller, _, _) = poller(Arc::clone(&transport));
        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&poller).spawn(Duration::from_secs(3), rx);

        tokio::time::sleep(Duration::from_millis(6_500)).await;
        let polled = transport.calls_to(wire::STATUS);
        assert!(polled >= 3, "expected at least 3 polls, got {polled}");

        tx.send(true).unwrap();
        handle.await.unwrap();
        let after = transport.calls_to(wire::STATUS);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.calls_to(wire::STATUS), after);
    }
}
