//! The console operations the stage controller depends on.

use async_trait::async_trait;

use crate::error::SemResult;
use crate::remcon::client::RemconClient;
use crate::remcon::command::StageTarget;
use crate::stage::pose::StagePose;

/// Stage access used by [`super::StageController`].
///
/// Implemented by [`RemconClient`]; tests drive the controller with scripted
/// implementations.
#[async_trait]
pub trait StageLink: Send + Sync {
    /// Poll the current pose.
    async fn stage_pose(&self) -> SemResult<StagePose>;

    /// Issue one absolute five-axis move. Returns the console's reply payload.
    async fn move_absolute(&self, target: StageTarget) -> SemResult<Option<String>>;

    /// Enable or disable the specimen current monitor interlock.
    async fn set_interlock(&self, on: bool) -> SemResult<()>;
}

#[async_trait]
impl StageLink for RemconClient {
    async fn stage_pose(&self) -> SemResult<StagePose> {
        self.get_stage_pose().await
    }

    async fn move_absolute(&self, target: StageTarget) -> SemResult<Option<String>> {
        self.move_stage_absolute(target).await
    }

    async fn set_interlock(&self, on: bool) -> SemResult<()> {
        self.set_scm_state(on).await
    }
}
