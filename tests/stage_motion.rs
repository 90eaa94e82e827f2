//! Stage controller driving a scripted console through the real client.

use std::sync::Arc;
use std::time::Duration;

use sem_remcon::hardware::mock_serial::{self, spawn_console, ScriptedExchange};
use sem_remcon::remcon::{ClientConfig, RemconClient};
use sem_remcon::stage::{
    ForbiddenArc, InsertPosition, MotionRequest, MotionSettings, MotionState, StageAxis,
    StageController,
};
use sem_remcon::SemError;

fn settings() -> MotionSettings {
    MotionSettings {
        poll_interval: Duration::from_millis(1),
        move_timeout: Duration::from_secs(2),
        insert_timeout: Duration::from_secs(2),
    }
}

fn pose(x: f64, y: f64, z: f64, rot: f64, moving: u8) -> String {
    format!("{x:.1} {y:.1} {z:.1} 0.0 {rot:.1} 0.0 {moving}")
}

fn controller(
    script: Vec<ScriptedExchange>,
) -> (
    StageController<RemconClient>,
    tokio::task::JoinHandle<mock_serial::MockDeviceHarness>,
) {
    let (port, harness) = mock_serial::new();
    let console = spawn_console(harness, script);
    let client = Arc::new(RemconClient::from_stream(port, ClientConfig::default()));
    (StageController::new(client, settings()), console)
}

#[tokio::test]
async fn test_step_sequence_on_the_wire() {
    let (ctl, console) = controller(vec![
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 30.0, 90.0, 0)),
        ScriptedExchange::ok("scm 0", ""),
        ScriptedExchange::ok(
            "c95 10.010000 20.000000 30.000000 0.000000 90.000000 0.0",
            "",
        ),
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 30.0, 90.0, 1)),
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 30.0, 90.0, 1)),
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 30.0, 90.0, 1)),
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 30.0, 90.0, 0)),
        // Monitor back on only after the stage reports stopped
        ScriptedExchange::ok("scm 1", ""),
    ]);

    let settled = ctl.step(StageAxis::X, 0.010).await.unwrap();
    assert!(!settled.is_moving());
    assert_eq!(ctl.state(), MotionState::Idle);
    console.await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_move_keeps_interlock_off() {
    let (ctl, console) = controller(vec![
        ScriptedExchange::ok("scm 0", ""),
        ScriptedExchange::error(
            "c95 500.000000 0.000000 0.000000 0.000000 0.000000 0.0",
            603,
        ),
    ]);

    let err = ctl
        .set_absolute(500.0, 0.0, 0.0, 0.0, 0.0)
        .await
        .unwrap_err();
    assert_eq!(err.remcon_code(), Some(603));

    // Nothing after the rejected move, in particular no `scm 1`
    let mut harness = console.await.unwrap();
    assert!(harness.take_writes().await.is_empty());
}

#[tokio::test]
async fn test_insert_sequence_with_split_rotation() {
    let insert = InsertPosition::default();
    let (ctl, console) = controller(vec![
        // Above insert height; the short way from 340 to 275 crosses 300..320
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 45.0, 340.0, 0)),
        // Monitor off for the whole sequence, then lower z alone
        ScriptedExchange::ok("scm 0", ""),
        ScriptedExchange::ok(
            "c95 10.000000 20.000000 40.000000 0.000000 340.000000 0.0",
            "",
        ),
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 40.0, 340.0, 0)),
        // Resolve targets
        ScriptedExchange::ok("c95?", &pose(10.0, 20.0, 40.0, 340.0, 0)),
        // Leg 1: the long way round
        ScriptedExchange::ok(
            "c95 90.000000 65.000000 40.000000 0.000000 127.500000 0.0",
            "",
        ),
        ScriptedExchange::ok("c95?", &pose(90.0, 65.0, 40.0, 127.5, 0)),
        // Leg 2
        ScriptedExchange::ok(
            "c95 90.000000 65.000000 40.000000 0.000000 275.000000 0.0",
            "",
        ),
        ScriptedExchange::ok("c95?", &pose(90.0, 65.0, 40.0, 275.0, 0)),
        ScriptedExchange::ok("scm 1", ""),
    ]);
    let ctl = ctl.with_rotation_policy(ForbiddenArc::new(300.0, 320.0));

    let settled = ctl.move_to_insert_position(&insert).await.unwrap();
    assert_eq!(settled.rotation, 275.0);
    assert_eq!(ctl.last_pose(), Some(settled));
    console.await.unwrap();
}

#[tokio::test]
async fn test_motion_timeout_carries_final_pose() {
    // Enough replies for the loop and the final poll
    let script = (0..2000)
        .map(|_| ScriptedExchange::ok("c95?", &pose(0.0, 0.0, 0.0, 0.0, 1)))
        .collect();
    let (ctl, console) = controller(script);

    let err = ctl
        .wait_until_settled(Duration::from_millis(30))
        .await
        .unwrap_err();
    match err {
        SemError::MotionTimeout { elapsed, pose } => {
            assert!(elapsed >= Duration::from_millis(30));
            assert!(pose.is_moving());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ctl.state(), MotionState::TimedOut);
    console.abort();
}

#[tokio::test]
async fn test_sparse_absolute_move() {
    let (ctl, console) = controller(vec![
        ScriptedExchange::ok("c95?", &pose(1.0, 2.0, 3.0, 4.0, 0)),
        ScriptedExchange::ok("scm 0", ""),
        ScriptedExchange::ok(
            "c95 1.000000 7.500000 3.000000 0.000000 4.000000 0.0",
            "",
        ),
        ScriptedExchange::ok("scm 1", ""),
    ]);
    ctl.set_absolute_request(&MotionRequest::new().y(7.5))
        .await
        .unwrap();
    assert_eq!(ctl.state(), MotionState::MoveIssued);
    console.await.unwrap();
}

#[tokio::test]
async fn test_step_timeout_never_restores_interlock() {
    let mut script = vec![
        ScriptedExchange::ok("c95?", &pose(0.0, 0.0, 0.0, 0.0, 0)),
        ScriptedExchange::ok("scm 0", ""),
        ScriptedExchange::ok("c95 0.000000 0.000000 1.000000 0.000000 0.000000 0.0", ""),
    ];
    script.extend((0..2000).map(|_| ScriptedExchange::ok("c95?", &pose(0.0, 0.0, 1.0, 0.0, 1))));
    let (port, harness) = mock_serial::new();
    let console = spawn_console(harness, script);
    let client = Arc::new(RemconClient::from_stream(port, ClientConfig::default()));
    let ctl = StageController::new(
        client,
        MotionSettings {
            move_timeout: Duration::from_millis(30),
            ..settings()
        },
    );

    let err = ctl.step(StageAxis::Z, 1.0).await.unwrap_err();
    assert!(matches!(err, SemError::MotionTimeout { .. }));
    // An `scm 1` anywhere in the sequence would have broken the script
    console.abort();
}
