//! REPL – Read-Eval-Print Loop for the KrishiNetra operator shell.
//!
//! Mission control:
//!   /wizard /plan <json> /row <plants> <spacing_cm> /scan <step_cm> [length_cm]
//!   /start /stop /pause /resume /estop /reset
//! Manual control:
//!   /manual /move <direction> [speed] /servo <pan|tilt|pipe> <angle>
//!   /pump <tank> <on|off>
//! Inspection:
//!   /status /analytics [mission_id] /overview /warnings /config
//! Other:
//!   /help /quit /exit
//!
//! Ctrl-C at the prompt is an emergency stop.

use colored::Colorize;
use krishi_memory::SqliteDetectionStore;
use krishi_runtime::CommandHandle;
use krishi_types::{
    ContinuousRow, IndividualRow, MissionPlan, MoveDirection, OperatorCommand, PlanPayload, ServoName,
    StatusSnapshot,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;

use crate::config::Config;

/// How many plants `/status` lists.
const STATUS_PLANTS: usize = 5;

/// One parsed REPL line.
#[derive(Debug, PartialEq)]
pub enum Action {
    Command(OperatorCommand),
    Status,
    Analytics(Option<String>),
    Overview,
    Warnings,
    ShowConfig,
    Help,
    Quit,
}

/// Everything the shell drives.
pub struct Shell<'a> {
    pub runtime: &'a Runtime,
    pub handle: CommandHandle,
    pub store: &'a SqliteDetectionStore,
    pub config: &'a Config,
}

/// Entry point for the interactive REPL.  Returns when the operator quits
/// or stdin closes.
pub fn run(shell: &Shell<'_>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Cannot open the terminal".red(), e);
            return;
        }
    };

    loop {
        let prompt = format!("{} ", "krishi>".bold().green());
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – EMERGENCY STOP".red().bold());
                shell.dispatch(OperatorCommand::EmergencyStop);
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match parse(line) {
            Ok(Action::Quit) => {
                shell.shutdown();
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(action) => shell.perform(action),
            Err(e) => println!("{} {}. Type {} for available commands.", "✗".red(), e, "/help".bold()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

pub fn parse(line: &str) -> Result<Action, String> {
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();
    let command = |c: OperatorCommand| -> Result<Action, String> { Ok(Action::Command(c)) };

    match head {
        "/help" => Ok(Action::Help),
        "/quit" | "/exit" => Ok(Action::Quit),
        "/status" => Ok(Action::Status),
        "/analytics" => Ok(Action::Analytics(args.first().map(|s| s.to_string()))),
        "/overview" => Ok(Action::Overview),
        "/warnings" => Ok(Action::Warnings),
        "/config" => Ok(Action::ShowConfig),

        "/wizard" => command(OperatorCommand::GoToWizard),
        "/start" => command(OperatorCommand::StartMission),
        "/stop" => command(OperatorCommand::StopMission),
        "/pause" => command(OperatorCommand::Pause),
        "/resume" => command(OperatorCommand::Resume),
        "/estop" => command(OperatorCommand::EmergencyStop),
        "/manual" => command(OperatorCommand::SetManualMode),
        "/reset" => command(OperatorCommand::Reset),

        "/plan" => {
            let plan: PlanPayload = serde_json::from_str(rest).map_err(|e| format!("bad plan JSON: {e}"))?;
            command(OperatorCommand::SaveMission { plan })
        }
        "/row" => {
            let [plants, spacing] = args[..] else {
                return Err("usage: /row <plants> <spacing_cm>".into());
            };
            let row = IndividualRow {
                plant_count: number(plants, "plant count")?,
                spacing_cm: number(spacing, "spacing")?,
            };
            command(OperatorCommand::SaveMission {
                plan: PlanPayload::Typed(MissionPlan::SingleRowIndividual { row }),
            })
        }
        "/scan" => {
            let (step, length) = match args[..] {
                [step] => (step, None),
                [step, length] => (step, Some(length)),
                _ => return Err("usage: /scan <step_cm> [length_cm]".into()),
            };
            let row = ContinuousRow {
                scan_step_cm: number(step, "scan step")?,
                row_length_cm: length.map(|l| number(l, "row length")).transpose()?,
            };
            command(OperatorCommand::SaveMission {
                plan: PlanPayload::Typed(MissionPlan::SingleRowContinuous { row }),
            })
        }

        "/move" => {
            let (direction, speed) = match args[..] {
                [direction] => (direction, None),
                [direction, speed] => (direction, Some(number(speed, "speed")?)),
                _ => return Err("usage: /move <forward|backward|left|right|stop> [speed]".into()),
            };
            let direction = match direction {
                "forward" | "f" => MoveDirection::Forward,
                "backward" | "b" => MoveDirection::Backward,
                "left" | "l" => MoveDirection::Left,
                "right" | "r" => MoveDirection::Right,
                "stop" | "s" => MoveDirection::Stop,
                other => return Err(format!("unknown direction '{other}'")),
            };
            command(OperatorCommand::Move { direction, speed })
        }
        "/servo" => {
            let [servo, angle] = args[..] else {
                return Err("usage: /servo <pan|tilt|pipe> <angle>".into());
            };
            let servo = match servo {
                "pan" => ServoName::Pan,
                "tilt" => ServoName::Tilt,
                "pipe" => ServoName::Pipe,
                other => return Err(format!("unknown servo '{other}'")),
            };
            command(OperatorCommand::Servo {
                servo,
                angle: number(angle, "angle")?,
            })
        }
        "/pump" => {
            let [tank, state] = args[..] else {
                return Err("usage: /pump <tank> <on|off>".into());
            };
            let on = match state {
                "on" => true,
                "off" => false,
                other => return Err(format!("pump state must be on or off, not '{other}'")),
            };
            command(OperatorCommand::Pump {
                tank: number(tank, "tank")?,
                on,
            })
        }

        other => Err(format!("Unknown command '{other}'")),
    }
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse().map_err(|_| format!("'{raw}' is not a valid {what}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

impl Shell<'_> {
    fn perform(&self, action: Action) {
        match action {
            Action::Command(command) => self.dispatch(command),
            Action::Status => print_status(&self.handle.status()),
            Action::Analytics(mission) => self.analytics(mission),
            Action::Overview => self.overview(),
            Action::Warnings => self.warnings(),
            Action::ShowConfig => println!("{:#?}", self.config),
            Action::Help => print_help(),
            Action::Quit => {}
        }
    }

    fn dispatch(&self, command: OperatorCommand) {
        let name = command.name();
        match self.runtime.block_on(self.handle.execute(command)) {
            Ok(()) => {
                let status = self.handle.status();
                println!(
                    "{} {} → {} {}",
                    "✓".green(),
                    name.bold(),
                    status.robot_status.to_string().cyan(),
                    status.mission_message.dimmed()
                );
            }
            Err(e) => println!("{} {}: {}", "✗".red(), name.bold(), e),
        }
    }

    /// Leave the robot stopped before exiting.
    fn shutdown(&self) {
        let status = self.handle.status();
        if status.robot_status.is_running() || status.mission_id.is_some() {
            self.dispatch(OperatorCommand::StopMission);
        }
    }

    fn analytics(&self, mission: Option<String>) {
        let mission = match mission {
            Some(id) => id,
            None => match self.store.latest_mission_id(None) {
                Ok(Some(id)) => id,
                Ok(None) => {
                    println!("  No missions on record yet.");
                    return;
                }
                Err(e) => {
                    println!("{}: {}", "Store error".red(), e);
                    return;
                }
            },
        };
        match self.store.mission_analytics(&mission) {
            Ok(a) => {
                println!("{}", format!("Mission {}", a.mission_id).bold().underline());
                if let (Some(start), Some(end)) = (a.started_at, a.ended_at) {
                    println!("  {} → {}", start.format("%Y-%m-%d %H:%M:%S"), end.format("%H:%M:%S"));
                }
                println!(
                    "  Plants scanned : {}   diseased: {}   health index: {}",
                    a.plants_scanned,
                    a.diseased_plants,
                    format!("{:.1}%", a.health_index).green()
                );
                for c in &a.class_counts {
                    println!("    {:<24} {}", c.class_name, c.count);
                }
            }
            Err(e) => println!("{}: {}", "Store error".red(), e),
        }
    }

    fn overview(&self) {
        match self.store.overall_analytics() {
            Ok(o) => {
                println!("{}", "Field overview".bold().underline());
                println!(
                    "  Missions: {}   plants: {}   detections: {}",
                    o.total_missions, o.total_plants_scanned, o.total_detections
                );
                println!(
                    "  Health index: {}   most frequent: {}",
                    format!("{:.1}%", o.health_index).green(),
                    o.most_frequent_disease.yellow()
                );
                for s in &o.sessions {
                    println!(
                        "    {} {}  healthy {:>3}  diseased {:>3}",
                        s.date.dimmed(),
                        s.mission_id,
                        s.healthy_plants,
                        s.diseased_plants
                    );
                }
            }
            Err(e) => println!("{}: {}", "Store error".red(), e),
        }
    }

    fn warnings(&self) {
        match self.store.warnings() {
            Ok(warnings) if warnings.is_empty() => println!("  No persistence warnings."),
            Ok(warnings) => {
                for w in &warnings {
                    println!(
                        "  {} {} {}",
                        w.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                        w.mission_id.as_deref().unwrap_or("-"),
                        w.message.yellow()
                    );
                }
            }
            Err(e) => println!("{}: {}", "Store error".red(), e),
        }
    }
}

fn print_status(s: &StatusSnapshot) {
    println!("{}", "Robot status".bold().underline());
    println!(
        "  State   : {}{}",
        s.robot_status.to_string().cyan().bold(),
        s.paused_from
            .map(|from| format!(" (from {from})"))
            .unwrap_or_default()
    );
    println!(
        "  Link    : motion {:?}, sensing {:?}",
        s.server_status.motion, s.server_status.sensing
    );
    if let Some(id) = &s.mission_id {
        println!("  Mission : {}", id.bold());
    }
    if let Some(p) = &s.mission_progress {
        println!(
            "  Progress: row {} at {:.0} cm, {} stops{}",
            p.row_index + 1,
            p.distance_in_row_cm,
            p.stops_in_row,
            if p.blocked { ", BLOCKED".red().to_string() } else { String::new() }
        );
    }
    if let Some(phase) = s.capture_phase {
        println!("  Capture : {phase:?}");
    }
    let env = &s.sensors;
    println!(
        "  Sensors : front {} cm, side {} cm, {} °C, {} % RH",
        reading(env.front_cm),
        reading(env.side_cm),
        reading(env.temperature_c),
        reading(env.humidity_pct)
    );
    println!("  Message : {}", s.mission_message.dimmed());
    for plant in s.plant_log.iter().take(STATUS_PLANTS) {
        let findings: Vec<String> = plant
            .merged
            .iter()
            .map(|(class, confidence)| format!("{class} {:.0}%", confidence * 100.0))
            .collect();
        println!(
            "    #{:<4} row {}  {:<40} {}",
            plant.plant_number,
            plant.row_index + 1,
            if findings.is_empty() { "healthy".to_string() } else { findings.join(", ") },
            plant.outcome.label().yellow()
        );
    }
}

fn reading(value: Option<f32>) -> String {
    value.map(|v| format!("{v:.1}")).unwrap_or_else(|| "?".to_string())
}

fn print_help() {
    println!();
    println!("{}", "Mission".bold().underline());
    println!("  {}  – open the planning wizard", "/wizard".bold().cyan());
    println!("  {}  – save a plan (typed or wizard JSON)", "/plan <json>".bold().cyan());
    println!("  {}  – single row of individual plants", "/row <plants> <spacing_cm>".bold().cyan());
    println!("  {}  – single continuous row", "/scan <step_cm> [length_cm]".bold().cyan());
    println!("  {}  – run, stop, pause or resume the mission", "/start /stop /pause /resume".bold().cyan());
    println!("  {}  – emergency stop (also Ctrl-C)", "/estop".bold().red());
    println!("  {}  – leave emergency stop or manual control", "/reset".bold().cyan());
    println!("{}", "Manual".bold().underline());
    println!("  {}  – toggle manual control", "/manual".bold().cyan());
    println!("  {}  – drive", "/move <forward|backward|left|right|stop> [speed]".bold().cyan());
    println!("  {}  – position a servo", "/servo <pan|tilt|pipe> <angle>".bold().cyan());
    println!("  {}  – switch a tank pump", "/pump <tank> <on|off>".bold().cyan());
    println!("{}", "Inspection".bold().underline());
    println!("  {}  – current status snapshot", "/status".bold().cyan());
    println!("  {}  – analytics for one mission (latest by default)", "/analytics [id]".bold().cyan());
    println!("  {}  – analytics across all missions", "/overview".bold().cyan());
    println!("  {}  – persistence warnings", "/warnings".bold().cyan());
    println!("  {}  – effective configuration", "/config".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_commands_map_to_operator_commands() {
        assert_eq!(parse("/estop"), Ok(Action::Command(OperatorCommand::EmergencyStop)));
        assert_eq!(parse("/pause"), Ok(Action::Command(OperatorCommand::Pause)));
        assert_eq!(parse("/reset"), Ok(Action::Command(OperatorCommand::Reset)));
        assert_eq!(parse("/exit"), Ok(Action::Quit));
    }

    #[test]
    fn row_shortcut_builds_individual_plan() {
        let Ok(Action::Command(OperatorCommand::SaveMission { plan })) = parse("/row 12 45.5") else {
            panic!("expected save_mission");
        };
        assert_eq!(
            plan,
            PlanPayload::Typed(MissionPlan::SingleRowIndividual {
                row: IndividualRow {
                    plant_count: 12,
                    spacing_cm: 45.5
                }
            })
        );
    }

    #[test]
    fn scan_length_is_optional() {
        let Ok(Action::Command(OperatorCommand::SaveMission { plan })) = parse("/scan 30") else {
            panic!("expected save_mission");
        };
        assert_eq!(
            plan,
            PlanPayload::Typed(MissionPlan::SingleRowContinuous {
                row: ContinuousRow {
                    scan_step_cm: 30.0,
                    row_length_cm: None
                }
            })
        );
        assert!(parse("/scan").is_err());
        assert!(parse("/scan ten").is_err());
    }

    #[test]
    fn plan_accepts_json() {
        let action = parse(r#"/plan {"kind":"single_row_individual","row":{"plant_count":3,"spacing_cm":50}}"#);
        assert!(matches!(action, Ok(Action::Command(OperatorCommand::SaveMission { .. }))));
        assert!(parse("/plan {not json").is_err());
    }

    #[test]
    fn manual_primitives_parse() {
        assert_eq!(
            parse("/move left 150"),
            Ok(Action::Command(OperatorCommand::Move {
                direction: MoveDirection::Left,
                speed: Some(150)
            }))
        );
        assert_eq!(
            parse("/servo tilt 120"),
            Ok(Action::Command(OperatorCommand::Servo {
                servo: ServoName::Tilt,
                angle: 120
            }))
        );
        assert_eq!(
            parse("/pump 2 on"),
            Ok(Action::Command(OperatorCommand::Pump { tank: 2, on: true }))
        );
        assert!(parse("/move sideways").is_err());
        assert!(parse("/servo pan 400").is_err());
        assert!(parse("/pump 1 maybe").is_err());
    }

    #[test]
    fn analytics_takes_optional_mission() {
        assert_eq!(parse("/analytics"), Ok(Action::Analytics(None)));
        assert_eq!(
            parse("/analytics KR-MSN-2026-05-01-36000"),
            Ok(Action::Analytics(Some("KR-MSN-2026-05-01-36000".to_string())))
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse("/fly").unwrap_err().contains("/fly"));
    }
}
