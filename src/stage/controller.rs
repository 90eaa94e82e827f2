//! Stage motion sequencing.
//!
//! The console has no completion notification, so every move is followed by a
//! bounded poll of `c95?` until the moving flag clears:
//!
//! ```text
//! Idle -> MoveIssued -> Polling -> Idle      (settled)
//!                               -> TimedOut  (gave up waiting; stage may still move)
//! ```
//!
//! Moves run with the specimen current monitor off, so touch detection is not
//! confused by the motion. Operations that wait for the stage (`step`,
//! `move_to_target`, `move_to_insert_position`) switch it back on only after the
//! last leg has settled; a rejected move, a failed poll or a timeout leaves it
//! off. The fire-and-forget moves (`set_relative`, `set_absolute*`) switch it
//! back on once the console has accepted the move command.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{SemError, SemResult};
use crate::remcon::command::StageTarget;
use crate::stage::link::StageLink;
use crate::stage::motion::MotionRequest;
use crate::stage::pose::{StageAxis, StagePose};
use crate::stage::rotation::{DirectRotation, RotationPolicy};

/// Where the controller is in a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    /// No move outstanding.
    #[default]
    Idle,
    /// Move command accepted, not yet polling.
    MoveIssued,
    /// Waiting for the moving flag to clear.
    Polling,
    /// The last wait gave up.
    TimedOut,
}

/// Observable controller status.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionStatus {
    /// Current state.
    pub state: MotionState,
    /// Most recent polled pose.
    pub last_pose: Option<StagePose>,
}

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionSettings {
    /// Sleep between pose polls.
    pub poll_interval: Duration,
    /// Wait bound for ordinary moves and steps.
    pub move_timeout: Duration,
    /// Wait bound for each leg of the insert sequence.
    pub insert_timeout: Duration,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            move_timeout: Duration::from_secs(5),
            insert_timeout: Duration::from_secs(30),
        }
    }
}

/// Specimen exchange position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertPosition {
    /// X.
    pub x: f64,
    /// Y.
    pub y: f64,
    /// Z. The stage is lowered to this height before travelling.
    pub z: f64,
    /// Rotation in degrees.
    #[serde(alias = "rot")]
    pub rotation: f64,
}

impl Default for InsertPosition {
    fn default() -> Self {
        Self {
            x: 90.0,
            y: 65.0,
            z: 40.0,
            rotation: 275.0,
        }
    }
}

/// Drives stage moves over a [`StageLink`].
pub struct StageController<L: StageLink> {
    link: Arc<L>,
    settings: MotionSettings,
    rotation: Box<dyn RotationPolicy>,
    status: watch::Sender<MotionStatus>,
}

impl<L: StageLink> std::fmt::Debug for StageController<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageController")
            .field("settings", &self.settings)
            .field("rotation", &self.rotation)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl<L: StageLink> StageController<L> {
    /// Controller with direct rotation.
    pub fn new(link: Arc<L>, settings: MotionSettings) -> Self {
        let (status, _) = watch::channel(MotionStatus::default());
        Self {
            link,
            settings,
            rotation: Box::new(DirectRotation),
            status,
        }
    }

    /// Replace the rotation policy.
    pub fn with_rotation_policy(mut self, policy: impl RotationPolicy + 'static) -> Self {
        self.rotation = Box::new(policy);
        self
    }

    /// Poll timing in use.
    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    /// The link the controller drives.
    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Current state.
    pub fn state(&self) -> MotionState {
        self.status.borrow().state
    }

    /// Pose from the most recent poll.
    pub fn last_pose(&self) -> Option<StagePose> {
        self.status.borrow().last_pose
    }

    /// Receive status changes.
    pub fn subscribe(&self) -> watch::Receiver<MotionStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: MotionState) {
        self.status.send_modify(|s| s.state = state);
    }

    async fn poll_pose(&self) -> SemResult<StagePose> {
        let pose = self.link.stage_pose().await?;
        self.status.send_modify(|s| s.last_pose = Some(pose));
        Ok(pose)
    }

    /// One absolute move. The interlock must already be off.
    async fn move_leg(&self, target: StageTarget) -> SemResult<Option<String>> {
        debug!(?target, "Issuing stage move");
        match self.link.move_absolute(target).await {
            Ok(reply) => {
                self.set_state(MotionState::MoveIssued);
                Ok(reply)
            }
            Err(err) => {
                warn!(%err, "Stage move rejected; interlock left off");
                self.set_state(MotionState::Idle);
                Err(err)
            }
        }
    }

    /// Interlock off, one absolute move, interlock back on if the move succeeded.
    async fn issue(&self, target: StageTarget) -> SemResult<Option<String>> {
        self.link.set_interlock(false).await?;
        let reply = self.move_leg(target).await?;
        self.link.set_interlock(true).await?;
        Ok(reply)
    }

    /// Move by the given deltas. Unset axes stay put. An empty request sends
    /// nothing.
    ///
    /// The console has no relative move, so the current pose is read and one
    /// absolute move is sent.
    #[instrument(level = "debug", skip(self))]
    pub async fn set_relative(&self, request: &MotionRequest) -> SemResult<Option<String>> {
        if request.is_empty() {
            return Ok(None);
        }
        let pose = self.poll_pose().await?;
        self.issue(request.resolve_relative(&pose)).await
    }

    /// Move to an absolute five-axis position. Range checks are left to the
    /// console (code 603).
    pub async fn set_absolute(
        &self,
        x: f64,
        y: f64,
        z: f64,
        tilt: f64,
        rotation: f64,
    ) -> SemResult<Option<String>> {
        self.issue(StageTarget {
            x,
            y,
            z,
            tilt,
            rotation,
        })
        .await
    }

    /// Move the set axes to absolute positions; unset axes keep the polled pose.
    #[instrument(level = "debug", skip(self))]
    pub async fn set_absolute_request(&self, request: &MotionRequest) -> SemResult<Option<String>> {
        if request.is_empty() {
            return Ok(None);
        }
        let pose = self.poll_pose().await?;
        self.issue(request.resolve_absolute(&pose)).await
    }

    /// Poll until the moving flag clears or `timeout` passes.
    ///
    /// Each round polls, checks the flag, sleeps one poll interval and checks
    /// the elapsed time. After giving up, one last poll refreshes the pose; if
    /// that poll shows the stage stopped the wait still succeeds, otherwise
    /// [`SemError::MotionTimeout`] carries it.
    ///
    /// A stage that settles inside the loop gets no extra poll, so a
    /// moving, moving, moving, stopped sequence costs exactly four polls. Only the
    /// timeout path re-reads after the loop; on settle the stopped pose from the
    /// loop is the final reading.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn wait_until_settled(&self, timeout: Duration) -> SemResult<StagePose> {
        self.set_state(MotionState::Polling);
        let started = Instant::now();
        let mut polls = 0u32;

        match self.poll_until_stopped(started, timeout, &mut polls).await {
            Ok(Some(pose)) => {
                debug!(polls, elapsed = ?started.elapsed(), "Stage settled");
                self.set_state(MotionState::Idle);
                Ok(pose)
            }
            Ok(None) => {
                let pose = self.poll_pose().await;
                let elapsed = started.elapsed();
                match pose {
                    Ok(pose) if !pose.is_moving() => {
                        self.set_state(MotionState::Idle);
                        Ok(pose)
                    }
                    Ok(pose) => {
                        warn!(?elapsed, %pose, "Stage did not settle");
                        self.set_state(MotionState::TimedOut);
                        Err(SemError::MotionTimeout { elapsed, pose })
                    }
                    Err(err) => {
                        self.set_state(MotionState::TimedOut);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.set_state(MotionState::Idle);
                Err(err)
            }
        }
    }

    /// `Some(pose)` once stopped, `None` when `timeout` passed first.
    async fn poll_until_stopped(
        &self,
        started: Instant,
        timeout: Duration,
        polls: &mut u32,
    ) -> SemResult<Option<StagePose>> {
        loop {
            let pose = self.poll_pose().await?;
            *polls += 1;
            if !pose.is_moving() {
                return Ok(Some(pose));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
            if started.elapsed() > timeout {
                return Ok(None);
            }
        }
    }

    /// Move to `request` (absolute; unset axes stay), routing the rotation
    /// through the policy's waypoints. Each leg is awaited before the next;
    /// any error stops the sequence with the interlock still off. An empty
    /// request only reads the pose.
    #[instrument(level = "debug", skip(self))]
    pub async fn move_to_target(
        &self,
        request: &MotionRequest,
        current_rotation: f64,
    ) -> SemResult<StagePose> {
        if request.is_empty() {
            return self.poll_pose().await;
        }
        self.link.set_interlock(false).await?;
        let settled = self
            .visit_waypoints(request, current_rotation, self.settings.move_timeout)
            .await?;
        self.link.set_interlock(true).await?;
        Ok(settled)
    }

    /// Legs of one move, interlock handling left to the caller.
    async fn visit_waypoints(
        &self,
        request: &MotionRequest,
        current_rotation: f64,
        timeout: Duration,
    ) -> SemResult<StagePose> {
        let pose = self.poll_pose().await?;
        let target = request.resolve_absolute(&pose);
        let rotations = match request.rotation {
            Some(rotation) => self.rotation.waypoints(current_rotation, rotation),
            None => vec![target.rotation],
        };
        if rotations.len() > 1 {
            info!(current_rotation, ?rotations, "Splitting rotation to avoid fault sector");
        }

        let mut settled = pose;
        for rotation in rotations {
            self.move_leg(StageTarget { rotation, ..target }).await?;
            settled = self.wait_until_settled(timeout).await?;
        }
        Ok(settled)
    }

    /// Jog one axis by `delta` and wait for it to settle. The interlock comes
    /// back on after the settled poll.
    #[instrument(level = "debug", skip(self))]
    pub async fn step(&self, axis: StageAxis, delta: f64) -> SemResult<StagePose> {
        let pose = self.poll_pose().await?;
        let target = MotionRequest::new().axis(axis, delta).resolve_relative(&pose);

        self.link.set_interlock(false).await?;
        self.move_leg(target).await?;
        let settled = self.wait_until_settled(self.settings.move_timeout).await?;
        self.link.set_interlock(true).await?;
        Ok(settled)
    }

    /// Travel to the specimen exchange position.
    ///
    /// If the stage is above the insert height it is lowered first, alone.
    /// The remaining axes then move via the rotation policy. The interlock
    /// stays off for the whole sequence.
    #[instrument(level = "info", skip(self))]
    pub async fn move_to_insert_position(&self, insert: &InsertPosition) -> SemResult<StagePose> {
        let pose = self.poll_pose().await?;
        let timeout = self.settings.insert_timeout;

        self.link.set_interlock(false).await?;
        if pose.z > insert.z {
            info!(from = pose.z, to = insert.z, "Lowering stage before insert move");
            self.move_leg(StageTarget {
                z: insert.z,
                ..pose.target()
            })
            .await?;
            self.wait_until_settled(timeout).await?;
        }

        let current_rotation = self.last_pose().map_or(pose.rotation, |p| p.rotation);
        let request = MotionRequest::new()
            .x(insert.x)
            .y(insert.y)
            .z(insert.z)
            .rotation(insert.rotation);
        let settled = self
            .visit_waypoints(&request, current_rotation, timeout)
            .await?;
        self.link.set_interlock(true).await?;
        info!(%settled, "At insert position");
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remcon::codes::PARAMETER_OUT_OF_RANGE;
    use crate::stage::rotation::ForbiddenArc;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays poses and records every call.
    #[derive(Default)]
    struct ScriptedStage {
        poses: Mutex<VecDeque<StagePose>>,
        fallback: Mutex<StagePose>,
        calls: Mutex<Vec<String>>,
        reject_moves: bool,
    }

    impl ScriptedStage {
        fn with_flags(base: StagePose, flags: &[f64]) -> Self {
            let poses = flags
                .iter()
                .map(|f| StagePose {
                    moving_flag: *f,
                    ..base
                })
                .collect();
            Self {
                poses: Mutex::new(poses),
                fallback: Mutex::new(StagePose {
                    moving_flag: *flags.last().unwrap_or(&0.0),
                    ..base
                }),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn polls(&self) -> usize {
            self.calls().iter().filter(|c| *c == "pose").count()
        }
    }

    #[async_trait]
    impl StageLink for ScriptedStage {
        async fn stage_pose(&self) -> SemResult<StagePose> {
            self.calls.lock().unwrap().push("pose".into());
            let next = self.poses.lock().unwrap().pop_front();
            Ok(next.unwrap_or(*self.fallback.lock().unwrap()))
        }

        async fn move_absolute(&self, t: StageTarget) -> SemResult<Option<String>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("move {} {} {} {} {}", t.x, t.y, t.z, t.tilt, t.rotation));
            if self.reject_moves {
                return Err(SemError::Remcon {
                    code: PARAMETER_OUT_OF_RANGE,
                    message: "Parameter out of range",
                });
            }
            let mut fallback = self.fallback.lock().unwrap();
            *fallback = StagePose {
                x: t.x,
                y: t.y,
                z: t.z,
                tilt: t.tilt,
                rotation: t.rotation,
                ..*fallback
            };
            Ok(Some("0".into()))
        }

        async fn set_interlock(&self, on: bool) -> SemResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("scm {}", u8::from(on)));
            Ok(())
        }
    }

    fn fast() -> MotionSettings {
        MotionSettings {
            poll_interval: Duration::from_millis(1),
            move_timeout: Duration::from_secs(2),
            insert_timeout: Duration::from_secs(2),
        }
    }

    fn base() -> StagePose {
        StagePose {
            x: 10.0,
            y: 20.0,
            z: 45.0,
            tilt: 0.0,
            rotation: 340.0,
            m: 0.0,
            moving_flag: 0.0,
        }
    }

    #[tokio::test]
    async fn test_settles_after_four_polls() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[1.0, 1.0, 1.0, 0.0]));
        let ctl = StageController::new(link.clone(), fast());
        let pose = ctl.wait_until_settled(Duration::from_secs(1)).await.unwrap();
        assert!(!pose.is_moving());
        assert_eq!(link.polls(), 4);
        assert_eq!(ctl.state(), MotionState::Idle);
        assert_eq!(ctl.last_pose(), Some(pose));
    }

    #[tokio::test]
    async fn test_timeout_then_one_final_poll() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[1.0]));
        let ctl = StageController::new(link.clone(), fast());
        let timeout = Duration::from_millis(30);
        let started = std::time::Instant::now();
        let err = ctl.wait_until_settled(timeout).await.unwrap_err();

        match err {
            SemError::MotionTimeout { elapsed, pose } => {
                assert!(elapsed >= timeout);
                assert!(pose.is_moving());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() >= timeout);
        assert_eq!(ctl.state(), MotionState::TimedOut);

        // Loop polls happen before each sleep; the final one follows the loop
        let polls = link.polls();
        assert!(polls >= 2, "polls = {polls}");
    }

    #[tokio::test]
    async fn test_final_poll_follows_loop_exit() {
        // Moving throughout the loop, stopped by the final poll
        let link = Arc::new(ScriptedStage::with_flags(base(), &[1.0]));
        let ctl = StageController::new(
            link.clone(),
            MotionSettings {
                poll_interval: Duration::from_millis(40),
                ..fast()
            },
        );
        *link.fallback.lock().unwrap() = StagePose {
            moving_flag: 0.0,
            ..base()
        };
        // One poll, one sleep past the 10 ms bound, then the final poll
        let pose = ctl.wait_until_settled(Duration::from_millis(10)).await.unwrap();
        assert!(!pose.is_moving());
        assert_eq!(link.polls(), 2);
    }

    #[tokio::test]
    async fn test_relative_move_restores_interlock() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0]));
        let ctl = StageController::new(link.clone(), fast());
        ctl.set_relative(&MotionRequest::new().x(1.5)).await.unwrap();
        assert_eq!(
            link.calls(),
            vec!["pose", "scm 0", "move 11.5 20 45 0 340", "scm 1"]
        );
        assert_eq!(ctl.state(), MotionState::MoveIssued);
    }

    #[tokio::test]
    async fn test_failed_move_leaves_interlock_off() {
        let link = Arc::new(ScriptedStage {
            reject_moves: true,
            ..ScriptedStage::with_flags(base(), &[0.0])
        });
        let ctl = StageController::new(link.clone(), fast());
        let err = ctl
            .set_absolute(500.0, 0.0, 0.0, 0.0, 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.remcon_code(), Some(603));
        assert_eq!(link.calls(), vec!["scm 0", "move 500 0 0 0 0"]);
        assert_eq!(ctl.state(), MotionState::Idle);
    }

    #[tokio::test]
    async fn test_empty_relative_is_noop() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0]));
        let ctl = StageController::new(link.clone(), fast());
        assert_eq!(ctl.set_relative(&MotionRequest::new()).await.unwrap(), None);
        assert!(link.calls().is_empty());
    }

    #[tokio::test]
    async fn test_split_rotation_visits_waypoints_in_order() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0]));
        let ctl = StageController::new(link.clone(), fast())
            .with_rotation_policy(ForbiddenArc::new(350.0, 10.0));
        ctl.move_to_target(&MotionRequest::new().rotation(20.0), 340.0)
            .await
            .unwrap();
        let moves: Vec<String> = link
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("move"))
            .collect();
        assert_eq!(moves, vec!["move 10 20 45 0 180", "move 10 20 45 0 20"]);
    }

    #[tokio::test]
    async fn test_first_leg_failure_aborts_sequence() {
        let link = Arc::new(ScriptedStage {
            reject_moves: true,
            ..ScriptedStage::with_flags(base(), &[0.0])
        });
        let ctl = StageController::new(link.clone(), fast())
            .with_rotation_policy(ForbiddenArc::new(350.0, 10.0));
        assert!(ctl
            .move_to_target(&MotionRequest::new().rotation(20.0), 340.0)
            .await
            .is_err());
        let moves = link.calls().iter().filter(|c| c.starts_with("move")).count();
        assert_eq!(moves, 1);
        assert!(!link.calls().contains(&"scm 1".to_string()));
    }

    #[tokio::test]
    async fn test_empty_target_only_reads_pose() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0]));
        let ctl = StageController::new(link.clone(), fast());
        let pose = ctl.move_to_target(&MotionRequest::new(), 340.0).await.unwrap();
        assert_eq!(pose, base());
        assert_eq!(link.calls(), vec!["pose"]);
    }

    #[tokio::test]
    async fn test_insert_lowers_z_first() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0]));
        let ctl = StageController::new(link.clone(), fast());
        let pose = ctl
            .move_to_insert_position(&InsertPosition::default())
            .await
            .unwrap();
        let moves: Vec<String> = link
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("move"))
            .collect();
        assert_eq!(moves, vec!["move 10 20 40 0 340", "move 90 65 40 0 275"]);
        assert_eq!((pose.x, pose.y, pose.z, pose.rotation), (90.0, 65.0, 40.0, 275.0));
        assert_eq!(
            link.calls(),
            vec![
                "pose",
                "scm 0",
                "move 10 20 40 0 340",
                "pose",
                "pose",
                "move 90 65 40 0 275",
                "pose",
                "scm 1",
            ]
        );
    }

    #[tokio::test]
    async fn test_insert_skips_z_when_low() {
        let low = StagePose { z: 30.0, ..base() };
        let link = Arc::new(ScriptedStage::with_flags(low, &[0.0]));
        let ctl = StageController::new(link.clone(), fast());
        ctl.move_to_insert_position(&InsertPosition::default())
            .await
            .unwrap();
        let moves = link.calls().iter().filter(|c| c.starts_with("move")).count();
        assert_eq!(moves, 1);
    }

    #[tokio::test]
    async fn test_step_waits_for_settle() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0, 1.0, 0.0]));
        let ctl = StageController::new(link.clone(), fast());
        let pose = ctl.step(StageAxis::Rotation, -10.0).await.unwrap();
        assert!(!pose.is_moving());
        assert_eq!(link.polls(), 3);
        // Interlock back on only once the settled pose has been read
        assert_eq!(
            link.calls(),
            vec!["pose", "scm 0", "move 10 20 45 0 330", "pose", "pose", "scm 1"]
        );
    }

    #[tokio::test]
    async fn test_step_timeout_leaves_interlock_off() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0, 1.0]));
        let ctl = StageController::new(
            link.clone(),
            MotionSettings {
                move_timeout: Duration::from_millis(20),
                ..fast()
            },
        );
        let err = ctl.step(StageAxis::X, 0.5).await.unwrap_err();
        assert!(matches!(err, SemError::MotionTimeout { .. }));
        assert_eq!(ctl.state(), MotionState::TimedOut);
        let calls = link.calls();
        assert!(calls.contains(&"scm 0".to_string()));
        assert!(!calls.contains(&"scm 1".to_string()));
    }

    #[tokio::test]
    async fn test_status_subscribers_see_settle() {
        let link = Arc::new(ScriptedStage::with_flags(base(), &[0.0, 1.0, 0.0]));
        let ctl = StageController::new(link.clone(), fast());
        let mut status = ctl.subscribe();
        let settled = ctl.step(StageAxis::Y, 1.0).await.unwrap();
        assert!(status.has_changed().unwrap());
        let seen = *status.borrow_and_update();
        assert_eq!(seen.state, MotionState::Idle);
        assert_eq!(seen.last_pose, Some(settled));
    }
}
