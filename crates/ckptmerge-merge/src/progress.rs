//! Progress reporting hooks for the two merge stages.

use std::fmt;

/// One pass of the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStage {
    /// Stage 1: interpolate keys shared by both checkpoints.
    Interpolate,
    /// Stage 2: adopt donor-only model keys.
    Adopt,
}

impl MergeStage {
    /// Short label used for progress bars.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Interpolate => "Stage 1/2",
            Self::Adopt => "Stage 2/2",
        }
    }
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Observer notified as the merger walks each stage.
///
/// `advance` is called once per key visited, so `total` passed to
/// `stage_started` is the number of `advance` calls that follow.
pub trait MergeProgress {
    /// A stage is about to visit `total` keys.
    fn stage_started(&self, stage: MergeStage, total: usize);

    /// One key of `stage` has been handled.
    fn advance(&self, stage: MergeStage);

    /// Every key of `stage` has been handled.
    fn stage_finished(&self, stage: MergeStage);
}

/// Progress observer that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl MergeProgress for NoProgress {
    fn stage_started(&self, _stage: MergeStage, _total: usize) {}

    fn advance(&self, _stage: MergeStage) {}

    fn stage_finished(&self, _stage: MergeStage) {}
}
