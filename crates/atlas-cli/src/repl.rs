//! REPL – Read-Eval-Print Loop for the Atlas operator shell.
//!
//! Supported slash-commands:
//!   /help                         – show this list
//!   /config [host port]           – show or change the robot endpoint
//!   /reset                        – restore localhost:8080
//!   /test                         – probe the robot once
//!   /status                       – print the current link state
//!   /move <part> <axis> <deg> [!] – move one joint (`!` forces while offline)
//!   /head <x> <y> <z>             – point the head
//!   /presets, /preset <name>      – list / run movement presets
//!   /classes                      – list lessons
//!   /class start <id>, /class stop
//!   /say <text>                   – text to speech
//!   /estop                        – emergency stop
//!   /clear                        – clear the last error
//!   /quit | /exit                 – leave the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use atlas_link::{DispatchMode, RobotLink, dispatcher};
use atlas_types::{BodyPart, CommandResult, ConnectivityState, Joint, LinkState, RobotStatus};
use tokio::runtime::Runtime;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    ShowConfig,
    SetConfig { host: String, port: String },
    Reset,
    Test,
    Status,
    Move { joint: Joint, value: f64, forced: bool },
    Head { x: f64, y: f64, z: f64 },
    Presets,
    Preset(String),
    Classes,
    ClassStart(u32),
    ClassStop,
    Say(String),
    Estop,
    Clear,
    Quit,
}

/// Parse one input line.  `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ReplCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let cmd = match (head, args.as_slice()) {
        ("/help", []) => ReplCommand::Help,
        ("/config", []) => ReplCommand::ShowConfig,
        ("/config", [host, port]) => ReplCommand::SetConfig {
            host: host.to_string(),
            port: port.to_string(),
        },
        ("/reset", []) => ReplCommand::Reset,
        ("/test", []) => ReplCommand::Test,
        ("/status", []) => ReplCommand::Status,
        ("/move", [part, axis, value, flags @ ..]) => {
            let joint = Joint::from_names(part, axis)
                .ok_or_else(|| format!("unknown joint {part}.{axis}"))?;
            let forced = match flags {
                [] => false,
                ["!"] => true,
                _ => return Err("usage: /move <part> <axis> <degrees> [!]".into()),
            };
            ReplCommand::Move {
                joint,
                value: number(value)?,
                forced,
            }
        }
        ("/head", [x, y, z]) => ReplCommand::Head {
            x: number(x)?,
            y: number(y)?,
            z: number(z)?,
        },
        ("/presets", []) => ReplCommand::Presets,
        ("/preset", [_, ..]) => ReplCommand::Preset(rest.to_string()),
        ("/classes", []) => ReplCommand::Classes,
        ("/class", ["start", id]) => ReplCommand::ClassStart(
            id.parse().map_err(|_| format!("'{id}' is not a class id"))?,
        ),
        ("/class", ["stop"]) => ReplCommand::ClassStop,
        ("/say", [_, ..]) => ReplCommand::Say(rest.to_string()),
        ("/estop", []) => ReplCommand::Estop,
        ("/clear", []) => ReplCommand::Clear,
        ("/quit" | "/exit", []) => ReplCommand::Quit,
        _ => return Err(format!("Unknown command: '{line}'")),
    };
    Ok(Some(cmd))
}

fn number(raw: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("'{raw}' is not a number"))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(rt: &Runtime, link: &Arc<RobotLink>, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", prompt(&link.snapshot()));
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match parse(&line) {
            Ok(None) => {}
            Ok(Some(ReplCommand::Quit)) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(Some(cmd)) => execute(rt, link, cmd),
            Err(msg) => println!(
                "{} Type {} for available commands.",
                msg.red(),
                "/help".bold()
            ),
        }
    }
}

fn prompt(state: &LinkState) -> colored::ColoredString {
    match state.connectivity {
        ConnectivityState::Connected => "atlas>".bold().green(),
        ConnectivityState::Disconnected => "atlas>".bold().red(),
        ConnectivityState::Unknown => "atlas>".bold().cyan(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(rt: &Runtime, link: &RobotLink, cmd: ReplCommand) {
    match cmd {
        ReplCommand::Help => cmd_help(),
        ReplCommand::ShowConfig => {
            let cfg = link.get_config();
            println!("  Robot API : {}", cfg.base_url().bold());
        }
        ReplCommand::SetConfig { host, port } => match link.set_config(&host, &port) {
            Ok(cfg) => println!(
                "  {} Robot API set to {}",
                "✓".green().bold(),
                cfg.base_url().bold()
            ),
            Err(e) => println!("  {}: {}", "Config error".red(), e),
        },
        ReplCommand::Reset => {
            let cfg = link.reset_config();
            println!("  {} Robot API reset to {}", "✓".green().bold(), cfg.base_url().bold());
        }
        ReplCommand::Test => {
            let report = rt.block_on(link.test_connection());
            if report.success {
                println!("  {} {}", "online".green(), report.message);
            } else {
                println!(
                    "  {} {} ({})",
                    "offline".red(),
                    report.message,
                    report.config.base_url().dimmed()
                );
            }
        }
        ReplCommand::Status => print_status(&link.snapshot()),
        ReplCommand::Move { joint, value, forced } => {
            let mode = if forced { DispatchMode::Forced } else { DispatchMode::Normal };
            report(rt.block_on(link.dispatch(dispatcher::move_joint(joint, value), mode)));
        }
        ReplCommand::Head { x, y, z } => report(rt.block_on(link.move_head(x, y, z))),
        ReplCommand::Presets => match rt.block_on(link.refresh_presets()) {
            Ok(presets) if presets.is_empty() => println!("  {}", "No presets available.".dimmed()),
            Ok(presets) => {
                for p in presets {
                    match p.description {
                        Some(d) => println!("    • {} {}", p.name.bold(), d.dimmed()),
                        None => println!("    • {}", p.name.bold()),
                    }
                }
            }
            Err(e) => println!("  {}: {}", "Failed".red(), e),
        },
        ReplCommand::Preset(name) => report(rt.block_on(link.execute_preset(&name))),
        ReplCommand::Classes => {
            let state = link.snapshot();
            if state.telemetry.classes.is_empty() {
                println!("  {}", "No classes received yet.".dimmed());
            }
            for c in &state.telemetry.classes {
                let marker = if state.telemetry.active_class == Some(c.id) {
                    "▶".green()
                } else {
                    " ".normal()
                };
                println!(
                    "  {} {:>3}  {}  {}",
                    marker,
                    c.id,
                    c.title.bold(),
                    c.duration.as_deref().unwrap_or("").dimmed()
                );
            }
        }
        ReplCommand::ClassStart(id) => report(rt.block_on(link.start_class(id))),
        ReplCommand::ClassStop => report(rt.block_on(link.stop_class())),
        ReplCommand::Say(text) => report(rt.block_on(link.speak(&text))),
        ReplCommand::Estop => report(rt.block_on(link.emergency_stop(DispatchMode::Forced))),
        ReplCommand::Clear => link.clear_last_error(),
        ReplCommand::Quit => {}
    }
}

fn report<T>(result: CommandResult<T>) {
    match result {
        Ok(_) => println!("  {}", "✓ done".green()),
        Err(e) => println!("  {} {}", "✗".red().bold(), e),
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Atlas Commands".bold().underline());
    println!("  {}  – show or change the robot endpoint", "/config [host port]".bold().cyan());
    println!("  {}               – restore localhost:8080", "/reset".bold().cyan());
    println!("  {}                – probe the robot once", "/test".bold().cyan());
    println!("  {}              – print the link state", "/status".bold().cyan());
    println!(
        "  {}  – move one joint; `!` forces while offline",
        "/move <part> <axis> <deg> [!]".bold().cyan()
    );
    println!("  {}      – point the head", "/head <x> <y> <z>".bold().cyan());
    println!("  {}  – list / run movement presets", "/presets  /preset <name>".bold().cyan());
    println!("  {}             – list lessons", "/classes".bold().cyan());
    println!("  {}  – run or stop a lesson", "/class start <id>  /class stop".bold().cyan());
    println!("  {}         – text to speech", "/say <text>".bold().cyan());
    println!("  {}               – emergency stop", "/estop".bold().cyan());
    println!("  {}               – clear the last error", "/clear".bold().cyan());
    println!("  {}        – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn print_status(state: &LinkState) {
    let t = &state.telemetry;
    let link = match state.connectivity {
        ConnectivityState::Connected => "connected".green(),
        ConnectivityState::Disconnected => "disconnected".red(),
        ConnectivityState::Unknown => "unknown".yellow(),
    };
    let status = match t.status {
        RobotStatus::Idle => "idle".normal(),
        RobotStatus::Active => "active".green(),
        RobotStatus::Error => "error".red(),
    };
    println!();
    println!("  Link        : {link}");
    println!("  Status      : {status}");
    println!("  Battery     : {}%", t.battery);
    println!("  Temperature : {:.1} °C", t.temperature);
    if let Some(id) = t.active_class {
        println!("  Class       : {id}");
    }
    match t.updated_at {
        Some(at) => println!(
            "  Updated     : {}",
            at.with_timezone(&chrono::Local).format("%H:%M:%S")
        ),
        None => println!("  Updated     : {}", "never".dimmed()),
    }
    for part in BodyPart::ALL {
        let axes: Vec<String> = t
            .position
            .part(part)
            .map(|(axis, v)| format!("{axis}={v:.0}"))
            .collect();
        println!("  {:<11} : {}", part.to_string(), axes.join(" ").dimmed());
    }
    for (name, s) in &t.connection {
        println!("  {:<11} : {:?}", name, s);
    }
    if let Some(e) = &state.last_error {
        println!("  Last error  : {}", e.to_string().red());
    }
    println!();
}
