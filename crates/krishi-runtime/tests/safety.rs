//! Emergency stop, retry escalation and mission aborts.

mod common;

use std::time::{Duration, Instant};

use common::{Rig, WAIT, individual};
use krishi_hal::SimRobot;
use krishi_link::Command;
use krishi_memory::SessionEnd;
use krishi_types::{Endpoint, KrishiError, MissionState, OperatorCommand};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn motion_timeouts_escalate_to_emergency_stop() -> Result<(), Box<dyn std::error::Error>> {
    let robot = SimRobot::new();
    let rig = Rig::new(robot.clone(), vec![]);
    rig.ready().await;
    robot.update(|w| w.motion_silent = true);
    let id = rig.launch(individual(3, 50.0)).await;

    let status = rig.wait_state(MissionState::EmergencyStopped).await;
    assert!(status.mission_message.contains("unresponsive"), "{}", status.mission_message);
    assert_eq!(rig.count(Endpoint::Motion, "<RESET_ENCODER>"), 3);

    // Nothing that moves the robot gets out any more.
    let moves = rig.count(Endpoint::Motion, "<MOVE");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.count(Endpoint::Motion, "<MOVE"), moves);
    let attempt = rig
        .handle
        .gate()
        .send(Endpoint::Motion, Command::Move { left: 100, right: 100 })
        .await;
    assert!(matches!(attempt, Err(KrishiError::Interlocked(_))));

    let summary = rig.summary(&id).await;
    assert_eq!(summary.end, SessionEnd::EmergencyStop);
    assert_eq!(summary.plants_scanned, 1);
    Ok(())
}

#[tokio::test]
async fn emergency_stop_preempts_travel() -> Result<(), Box<dyn std::error::Error>> {
    // Wheels turn but the encoder never advances, so the step would only
    // end at the step timeout.
    let rig = Rig::new(SimRobot::new().with_edges_per_poll(0), vec![]);
    let id = rig.launch(individual(2, 50.0)).await;

    timeout(WAIT, async {
        while rig.count(Endpoint::Motion, "<MOVE") == 0 {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await?;
    assert_eq!(rig.handle.status().robot_status, MissionState::ExecutingRow);

    let started = Instant::now();
    rig.handle.execute(OperatorCommand::EmergencyStop).await?;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rig.handle.status().robot_status, MissionState::EmergencyStopped);

    let motion = rig.frames(Endpoint::Motion);
    let last_move = motion.iter().rposition(|f| f.starts_with("<MOVE")).ok_or("no MOVE")?;
    let last_stop = motion.iter().rposition(|f| f == "<STOP>").ok_or("no STOP")?;
    assert!(last_stop > last_move);

    let moves = rig.count(Endpoint::Motion, "<MOVE");
    sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.count(Endpoint::Motion, "<MOVE"), moves);
    assert_eq!(rig.summary(&id).await.end, SessionEnd::EmergencyStop);

    // Only an explicit reset leaves the stop.
    assert!(rig.handle.execute(OperatorCommand::StartMission).await.is_err());
    rig.handle.execute(OperatorCommand::Reset).await?;
    assert_eq!(rig.handle.status().robot_status, MissionState::Idle);
    assert!(!rig.handle.gate().latch().is_engaged());
    Ok(())
}

#[tokio::test]
async fn latch_from_signal_handler_stops_mission() -> Result<(), Box<dyn std::error::Error>> {
    let rig = Rig::new(SimRobot::new().with_edges_per_poll(0), vec![]);
    rig.launch(individual(2, 50.0)).await;
    rig.wait_state(MissionState::ExecutingRow).await;

    assert!(rig.handle.trigger_emergency());
    let status = rig.wait_state(MissionState::EmergencyStopped).await;
    assert!(status.mission_id.is_none());
    Ok(())
}

#[tokio::test]
async fn stop_mission_flushes_partial_session() -> Result<(), Box<dyn std::error::Error>> {
    let rig = Rig::new(SimRobot::new().with_edges_per_poll(10), vec![]);
    let id = rig.launch(individual(40, 50.0)).await;
    rig.wait_for("two plants", |s| s.plant_log.len() >= 2).await;

    rig.handle.execute(OperatorCommand::StopMission).await?;
    let status = rig.handle.status();
    assert_eq!(status.robot_status, MissionState::Idle);
    assert!(status.mission_id.is_none());
    // The session's log stays visible until the next mission begins.
    assert!(status.plant_log.len() >= 2);

    let summary = rig.summary(&id).await;
    assert_eq!(summary.end, SessionEnd::Stopped);
    assert!(summary.plants_scanned >= 2);
    assert!(summary.plants_scanned < 40);
    Ok(())
}

#[tokio::test]
async fn manual_mode_aborts_running_mission() -> Result<(), Box<dyn std::error::Error>> {
    let rig = Rig::new(SimRobot::new().with_edges_per_poll(10), vec![]);
    let id = rig.launch(individual(40, 50.0)).await;
    rig.wait_for("first plant", |s| !s.plant_log.is_empty()).await;

    rig.handle.execute(OperatorCommand::SetManualMode).await?;
    assert_eq!(rig.handle.status().robot_status, MissionState::ManualControl);
    assert_eq!(rig.summary(&id).await.end, SessionEnd::ManualOverride);

    rig.handle.execute(OperatorCommand::SetManualMode).await?;
    assert_eq!(rig.handle.status().robot_status, MissionState::Idle);
    Ok(())
}
