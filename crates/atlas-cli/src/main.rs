//! `atlas-cli` – Atlas robot operator shell
//!
//! This binary is the operator's console for a remote Atlas teaching robot.
//! It:
//!
//! 1. Loads the robot endpoint from `~/.atlas/robot_link.toml`
//!    (`ATLAS_ROBOT_HOST` / `ATLAS_ROBOT_PORT` override it).
//! 2. Starts the [`RobotLink`] engine, which polls telemetry in the
//!    background.  `ATLAS_DEMO=1` swaps the robot for an in-process simulator.
//! 3. Drops the user into an **interactive REPL** with slash-commands.
//! 4. Intercepts **Ctrl-C** to send an emergency stop and exit safely.

mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use atlas_link::{ConfigStore, DispatchMode, LinkSettings, RobotLink};

fn main() {
    // Logs go through tracing; user-facing output stays on println!.
    let _telemetry = atlas_link::init_tracing("atlas");

    print_banner();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let settings = LinkSettings::from_env();
    let store = Arc::new(ConfigStore::open_default());
    if let Some(path) = store.path() {
        println!("  Config     : {}", path.display().to_string().bold());
    }
    println!("  Robot API  : {}", store.base_url().bold());
    if settings.demo_mode {
        println!("  {}", "Demo mode – talking to the simulated robot.".yellow());
    }

    let link = Arc::new(RobotLink::new(settings, store));
    {
        let _ctx = rt.enter();
        link.start();
    }

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let link_ctrlc = Arc::clone(&link);
    let handle = rt.handle().clone();
    let shutdown_ctrlc = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – sending emergency stop …".yellow().bold());
        match handle.block_on(link_ctrlc.emergency_stop(DispatchMode::Forced)) {
            Ok(_) => println!("{}", "  ✓ Emergency stop acknowledged by the robot.".green()),
            Err(e) => println!("  {} Emergency stop failed: {}", "✗".red().bold(), e),
        }
        link_ctrlc.shutdown();
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        println!("{}", "  ✓ Exiting Atlas.".green());
        std::process::exit(130);
    }) {
        warn!(
            error = %e,
            "Failed to install Ctrl-C handler; emergency stop on Ctrl-C will not be available"
        );
    }

    // ── Initial probe ─────────────────────────────────────────────────────
    print!("\n  Probing robot … ");
    let report = rt.block_on(link.test_connection());
    if report.success {
        println!("{}", "online".green());
    } else {
        println!("{} ({})", "offline".yellow(), report.message.dimmed());
        println!(
            "  {}  Use `{}` to point at the robot.",
            "Robot not reachable.".dimmed(),
            "/config <host> <port>".bold()
        );
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&rt, &link, shutdown);
    link.shutdown();
}

fn print_banner() {
    println!();
    println!("{}", r#"    ___   __  __            "#.bold().cyan());
    println!("{}", r#"   /   | / /_/ /___ ______  "#.bold().cyan());
    println!("{}", r#"  / /| |/ __/ / __ `/ ___/  "#.bold().cyan());
    println!("{}", r#" / ___ / /_/ / /_/ (__  )   "#.bold().cyan());
    println!("{}", r#"/_/  |_\__/_/\__,_/____/    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Atlas".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Teaching robot remote control");
    println!();
}
