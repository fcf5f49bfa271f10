//! `krishi-cli` – KrishiNetra Command Line Interface
//!
//! This binary is the ignition switch for the field robot.  It:
//!
//! 1. Loads `~/.krishinetra/config.toml`, writing the defaults on first run.
//! 2. Installs `tracing` logging (optionally exporting spans over OTLP).
//! 3. Connects both microcontroller endpoints, or boots the in-process
//!    simulator with `--simulate`, and opens the detection store.
//! 4. Starts the sensor poller, the control loop and the cockpit server.
//! 5. Drops the operator into an **interactive REPL**.
//!
//! Ctrl-C engages the emergency stop; a second Ctrl-C exits.

mod config;
mod repl;

use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use krishi_cockpit::CockpitServer;
use krishi_hal::{Camera, CommandCamera, Detector, DirectoryArchive, HttpDetector, ImageArchive, ScriptedDetector, SimRobot};
use krishi_kernel::{CommandGate, EmergencyLatch, StateVerifier};
use krishi_link::{EndpointLink, EventBus, FrameTransport, Link, connect};
use krishi_memory::{DetectionSink, SqliteDetectionStore};
use krishi_runtime::{Collaborators, CommandHandle, MissionController, Runner, SensorPoller, init_tracing};
use krishi_types::{Endpoint, KrishiError};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;

/// Everything started at boot.
struct System {
    handle: CommandHandle,
    store: Arc<SqliteDetectionStore>,
    tasks: Vec<JoinHandle<()>>,
}

fn main() {
    let simulate = std::env::args().skip(1).any(|a| a == "--simulate");
    let cfg = load_config();
    let _tracing = init_tracing("krishinetra", cfg.log_format);

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start the async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let system = match runtime.block_on(boot(&cfg, simulate)) {
        Ok(system) => system,
        Err(e) => {
            error!(error = %e, "boot failed");
            eprintln!("{}: {}", "Boot failed".red().bold(), e);
            std::process::exit(1);
        }
    };

    install_ctrlc(system.handle.clone());

    let cockpit = CockpitServer::new(system.handle.clone())
        .with_port(cfg.cockpit_port)
        .with_password(cfg.cockpit_key());
    let keyed = cockpit.requires_key();
    runtime.spawn(async move {
        if let Err(e) = cockpit.run().await {
            error!(error = %e, "cockpit stopped");
        }
    });
    println!(
        "  Cockpit on {}{}",
        format!("http://localhost:{}", cfg.cockpit_port).bold(),
        if keyed { " (key required)".dimmed().to_string() } else { String::new() }
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&repl::Shell {
        runtime: &runtime,
        handle: system.handle.clone(),
        store: &system.store,
        config: &cfg,
    });

    for task in &system.tasks {
        task.abort();
    }
    runtime.shutdown_timeout(Duration::from_secs(1));
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Boot
// ─────────────────────────────────────────────────────────────────────────────

async fn boot(cfg: &Config, simulate: bool) -> Result<System, KrishiError> {
    let mission = cfg.mission.clone();
    let policy = mission.link.retry_policy();

    let store = SqliteDetectionStore::open(&cfg.database)
        .map_err(|e| KrishiError::Persistence(format!("{}: {e}", cfg.database.display())))?;
    let store = match mission.inference.healthy_classes.first() {
        Some(class) => store.with_healthy_class(class.clone()),
        None => store,
    };
    let store = Arc::new(store);
    info!(path = %cfg.database.display(), "detection store open");

    let (motion, sensing, camera, detector): (
        Box<dyn FrameTransport>,
        Box<dyn FrameTransport>,
        Box<dyn Camera>,
        Arc<dyn Detector>,
    ) = if simulate {
        println!("  {}", "Simulated robot: no hardware will move.".yellow());
        let robot = SimRobot::new();
        (
            robot.motion_transport(),
            robot.sensing_transport(),
            Box::new(robot.camera()),
            Arc::new(ScriptedDetector::new(Vec::new())),
        )
    } else {
        let motion = connect(Endpoint::Motion, &cfg.motion_port).await?;
        let sensing = connect(Endpoint::Sensing, &cfg.sensing_port).await?;
        let camera = CommandCamera::new(cfg.camera.id.clone(), cfg.camera.program.clone(), cfg.camera.args.clone())
            .with_timeout(Duration::from_millis(cfg.camera.timeout_ms));
        let detector = HttpDetector::new(
            mission.inference.url.clone(),
            Duration::from_millis(mission.inference.timeout_ms),
        )?;
        (motion, sensing, Box::new(camera), Arc::new(detector))
    };
    info!(motion = %cfg.motion_port, sensing = %cfg.sensing_port, simulate, "endpoints open");

    let archive: Option<Arc<dyn ImageArchive>> = match DirectoryArchive::open(&mission.telemetry.image_dir) {
        Ok(archive) => Some(Arc::new(archive)),
        Err(e) => {
            warn!(error = %e, "image archive unavailable; frames will not be kept");
            None
        }
    };

    let link = Arc::new(Link::new(
        EndpointLink::new(Endpoint::Motion, motion, policy),
        EndpointLink::new(Endpoint::Sensing, sensing, policy),
    ));
    let bus = EventBus::default();
    let (sensors, poller) = SensorPoller::new(link.clone(), &mission.link)
        .with_bus(bus.clone())
        .spawn();
    let gate = Arc::new(CommandGate::new(
        link,
        StateVerifier::standard(mission.treatment.tanks(), mission.treatment.max_dispense_ms()),
        EmergencyLatch::new(),
    ));

    let sink: Arc<dyn DetectionSink> = store.clone();
    let devices = Collaborators {
        camera,
        detector,
        archive,
        sink: Some(sink),
    };
    let controller = MissionController::new(mission, gate, sensors, devices, bus);
    let (runner, handle) = Runner::new(controller);
    let runner = runner.spawn();

    Ok(System {
        handle,
        store,
        tasks: vec![poller, runner],
    })
}

/// Ctrl-C engages the emergency latch; pressing it again with the latch
/// already engaged exits.
fn install_ctrlc(handle: CommandHandle) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        if handle.trigger_emergency() {
            println!("{}", "⚠  Ctrl-C – EMERGENCY STOP engaged. Ctrl-C again to exit.".red().bold());
        } else {
            println!("{}", "  ✓ Robot is stopped. Exiting KrishiNetra.".green());
            std::process::exit(130);
        }
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /estop to stop the robot");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ __      _      __    _ _   __     __"#.bold().green());
    println!("{}", r#"  / //_/_____(_)____/ /_  (_) | / /__  / /__________ _"#.bold().green());
    println!("{}", r#" / ,<  / ___/ / ___/ __ \/ /  |/ / _ \/ __/ ___/ __ `/"#.bold().green());
    println!("{}", r#"/_/|_|/_/  /_/____/_/ /_/_/_/|_/\___/\__/_/   \__,_/"#.bold().green());
    println!();
    println!(
        "  {} {}",
        "KrishiNetra".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Autonomous plant inspection and treatment");
    println!();
}
