//! [`StateHub`] – the single mutation point and read model of the link.
//!
//! The poller and the dispatcher both write through [`StateHub::update`].
//! Each update runs under one mutex: it edits a private copy of the current
//! [`LinkState`], swaps in a fresh `Arc`, and delivers it to subscribers before
//! the lock is released, so readers only ever see whole snapshots and
//! deliveries arrive in publish order.
//!
//! Two read APIs are offered:
//!
//! * **Callbacks** (`subscribe` / `unsubscribe`) – the callback receives the
//!   current state immediately and then every published state.  Once
//!   `unsubscribe` returns, the callback is never invoked again.
//! * **Watch** (`watch`) – a [`tokio::sync::watch::Receiver`] for async
//!   consumers.  Bursts are coalesced to the latest state.
//!
//! Callbacks run while the hub lock is held and must not call back into the
//! hub or the engine.
//!
//! After [`StateHub::close`] every update is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atlas_types::{CommandTarget, LinkState, RobotStatus};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

type Callback = Box<dyn Fn(&LinkState) + Send + Sync>;

/// Handle returned by [`StateHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The value a [`CommandTarget`] holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetValue {
    Angle(f64),
    Run {
        status: RobotStatus,
        active_class: Option<u32>,
    },
}

impl TargetValue {
    /// Read `target` out of `state`.
    pub fn read(state: &LinkState, target: CommandTarget) -> Self {
        match target {
            CommandTarget::Joint(joint) => TargetValue::Angle(state.telemetry.position.get(joint)),
            CommandTarget::RunState => TargetValue::Run {
                status: state.telemetry.status,
                active_class: state.telemetry.active_class,
            },
        }
    }

    /// Write this value into `state` at `target`.  A value of the wrong kind
    /// for the target is ignored.
    pub fn write(self, state: &mut LinkState, target: CommandTarget) {
        match (target, self) {
            (CommandTarget::Joint(joint), TargetValue::Angle(v)) => {
                state.telemetry.position.set(joint, v);
            }
            (CommandTarget::RunState, TargetValue::Run { status, active_class }) => {
                state.telemetry.status = status;
                state.telemetry.active_class = active_class;
            }
            _ => {}
        }
    }
}

/// Record of one optimistic change awaiting the robot's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub id: Uuid,
    pub target: CommandTarget,
    pub previous: TargetValue,
    pub new: TargetValue,
}

/// Editable view handed to [`StateHub::update`] closures.
pub struct Mutation<'a> {
    pub state: LinkState,
    pending: &'a mut HashMap<CommandTarget, PendingCommand>,
}

impl Mutation<'_> {
    pub fn is_pending(&self, target: CommandTarget) -> bool {
        self.pending.contains_key(&target)
    }

    pub fn insert_pending(&mut self, pending: PendingCommand) {
        self.pending.insert(pending.target, pending);
    }

    /// Remove the pending record for `target` if it belongs to command `id`.
    pub fn take_pending(&mut self, target: CommandTarget, id: Uuid) -> Option<PendingCommand> {
        match self.pending.get(&target) {
            Some(p) if p.id == id => self.pending.remove(&target),
            _ => None,
        }
    }
}

struct HubInner {
    state: Arc<LinkState>,
    pending: HashMap<CommandTarget, PendingCommand>,
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
    closed: bool,
}

/// Shared, synchronized holder of the published [`LinkState`].
pub struct StateHub {
    inner: Mutex<HubInner>,
    watch_tx: watch::Sender<Arc<LinkState>>,
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHub {
    pub fn new() -> Self {
        let state = Arc::new(LinkState::default());
        let (watch_tx, _) = watch::channel(Arc::clone(&state));
        Self {
            inner: Mutex::new(HubInner {
                state,
                pending: HashMap::new(),
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
            }),
            watch_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The currently published state.
    pub fn snapshot(&self) -> Arc<LinkState> {
        Arc::clone(&self.lock().state)
    }

    /// Async receiver that always yields the latest published state.
    pub fn watch(&self) -> watch::Receiver<Arc<LinkState>> {
        self.watch_tx.subscribe()
    }

    /// Register `callback`; it is invoked with the current state before this
    /// method returns.
    pub fn subscribe(
        &self,
        callback: impl Fn(&LinkState) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        callback(&inner.state);
        inner.subscribers.push((id, Box::new(callback)));
        debug!(subscription = id.0, "state subscriber added");
        id
    }

    /// Remove a subscriber.  Returns `false` when `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sid, _)| *sid != id);
        before != inner.subscribers.len()
    }

    /// Apply `f` to a copy of the current state and publish the result if it
    /// changed.
    ///
    /// Returns `None` without running `f` once the hub is closed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Mutation<'_>) -> R) -> Option<R> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.closed {
            return None;
        }
        let mut mutation = Mutation {
            state: LinkState::clone(&inner.state),
            pending: &mut inner.pending,
        };
        let out = f(&mut mutation);
        let next = mutation.state;
        if next != *inner.state {
            inner.state = Arc::new(next);
            self.watch_tx.send_replace(Arc::clone(&inner.state));
            for (_, callback) in &inner.subscribers {
                callback(&inner.state);
            }
        }
        Some(out)
    }

    /// Stop accepting updates.  Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.pending.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of commands currently awaiting the robot's answer.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}
