// Lifecycle of a single flash, backup or restore job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobState {
    Idle,
    DetectingSize,
    Erasing,
    Writing,
    Reading,
    Succeeded,
    Failed { code: i32 },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed { .. })
    }
}

/// Which release the user asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseKind {
    Latest,
    Beta,
    /// Index into the catalog in feed order.
    Selected(usize),
}
