//! `atlas-link` – Robot Link Synchronization Engine
//!
//! Keeps a local, always-consistent picture of a remote teaching robot and
//! sends it operator commands over its HTTP API.
//!
//! # Modules
//!
//! - [`config_store`] – [`ConfigStore`][config_store::ConfigStore]: the robot
//!   API host/port, persisted to `~/.atlas/robot_link.toml`.
//! - [`transport`] – the [`Transport`][transport::Transport] seam and
//!   [`HttpTransport`][transport::HttpTransport], which turns every HTTP
//!   outcome into a [`CommandResult`][atlas_types::CommandResult].
//! - [`sim`] – [`SimTransport`][sim::SimTransport]: an in-process robot for
//!   demo mode and tests.
//! - [`hub`] – [`StateHub`][hub::StateHub]: the single mutation point and the
//!   subscribe/watch read model.
//! - [`poller`] – [`Poller`][poller::Poller]: periodic telemetry refresh and
//!   connectivity detection.
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: optimistic
//!   command delivery with per-field serialization and rollback.
//! - [`verifier`] – pre-flight rules every command passes before it is sent.
//! - [`engine`] – [`RobotLink`][engine::RobotLink]: wires the above together.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console logs
//!   plus optional OTLP span export.

pub mod config_store;
pub mod dispatcher;
pub mod engine;
pub mod hub;
pub mod poller;
pub mod sim;
pub mod telemetry;
pub mod transport;
pub mod verifier;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use config_store::ConfigStore;
pub use dispatcher::DispatchMode;
pub use engine::{ConnectionReport, LinkSettings, RobotLink};
pub use hub::{StateHub, SubscriptionId};
pub use poller::CycleOutcome;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use transport::{HttpTransport, Method, Transport};
