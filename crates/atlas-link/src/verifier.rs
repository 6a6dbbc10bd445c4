//! [`CommandVerifier`] – pre-flight checks for outbound commands.
//!
//! Before a [`RobotCommand`] touches the published state or the transport it
//! is passed through [`CommandVerifier::verify`].  Every registered [`Rule`]
//! is evaluated in order and the first violation is returned unchanged; the
//! command is **not** sent.
//!
//! Built-in rules, in the order [`CommandVerifier::standard`] installs them:
//! - [`WellFormedRule`] – axes belong to the part, names and text are non-empty.
//! - [`JointRangeRule`] – every move target lies inside its joint's range.
//! - [`LinkRequiredRule`] – refuses commands while the robot is known to be
//!   unreachable, unless the dispatch is forced.

use atlas_types::{CommandResult, ConnectivityState, Joint, LinkError, LinkState, RobotCommand};

use crate::dispatcher::DispatchMode;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// Everything a rule may look at besides the command itself.
#[derive(Debug, Clone, Copy)]
pub struct VerifyContext<'a> {
    pub state: &'a LinkState,
    pub mode: DispatchMode,
}

/// A single precondition a command must satisfy.
pub trait Rule: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    fn check(&self, command: &RobotCommand, ctx: &VerifyContext<'_>) -> CommandResult<()>;
}

// ────────────────────────────────────────────────────────────────────────────
// CommandVerifier
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CommandVerifier {
    rules: Vec<Box<dyn Rule>>,
}

impl CommandVerifier {
    /// Create an empty verifier with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The rule set the dispatcher uses.
    pub fn standard() -> Self {
        let mut verifier = Self::new();
        verifier.add_rule(Box::new(WellFormedRule));
        verifier.add_rule(Box::new(JointRangeRule));
        verifier.add_rule(Box::new(LinkRequiredRule));
        verifier
    }

    /// Register a new [`Rule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, command: &RobotCommand, ctx: &VerifyContext<'_>) -> CommandResult<()> {
        for rule in &self.rules {
            if let Err(e) = rule.check(command, ctx) {
                tracing::debug!(
                    rule = rule.name(),
                    command = command.kind(),
                    error = %e,
                    "command rejected"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects commands that cannot be expressed on the wire.
pub struct WellFormedRule;

impl Rule for WellFormedRule {
    fn name(&self) -> &str {
        "well_formed"
    }

    fn check(&self, command: &RobotCommand, _ctx: &VerifyContext<'_>) -> CommandResult<()> {
        match command {
            RobotCommand::Move { part, targets } => {
                if targets.is_empty() {
                    return Err(LinkError::InvalidCommand(format!(
                        "move of {part} has no targets"
                    )));
                }
                if let Some((axis, _)) = targets
                    .iter()
                    .find(|(axis, _)| Joint::new(*part, *axis).is_none())
                {
                    return Err(LinkError::InvalidCommand(format!("{part} has no axis {axis}")));
                }
                Ok(())
            }
            RobotCommand::ExecutePreset(name) if name.trim().is_empty() => {
                Err(LinkError::InvalidCommand("preset name is empty".into()))
            }
            RobotCommand::Speak(text) if text.trim().is_empty() => {
                Err(LinkError::InvalidCommand("nothing to say".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Rejects moves that would leave a joint's safe range.
pub struct JointRangeRule;

impl Rule for JointRangeRule {
    fn name(&self) -> &str {
        "joint_range"
    }

    fn check(&self, command: &RobotCommand, _ctx: &VerifyContext<'_>) -> CommandResult<()> {
        if let RobotCommand::Move { part, targets } = command {
            for &(axis, value) in targets {
                if let Some(joint) = Joint::new(*part, axis) {
                    joint.check(value)?;
                }
            }
        }
        Ok(())
    }
}

/// Rejects commands while the last probe found the robot unreachable.
///
/// `Unknown` connectivity is allowed through so an operator can act before
/// the first poll completes.  [`DispatchMode::Forced`] bypasses the rule.
pub struct LinkRequiredRule;

impl Rule for LinkRequiredRule {
    fn name(&self) -> &str {
        "link_required"
    }

    fn check(&self, _command: &RobotCommand, ctx: &VerifyContext<'_>) -> CommandResult<()> {
        if ctx.mode == DispatchMode::Normal
            && ctx.state.connectivity == ConnectivityState::Disconnected
        {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }
}
