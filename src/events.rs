use tokio::time::Instant;

use crate::display::{RotationChange, RotationTiming, RotationView};

/// Parameter changes sent to a running rotator.
#[derive(Debug, Clone)]
pub enum RotatorCommand {
    SetSources(Vec<String>),
    SetTiming(RotationTiming),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotatorReason {
    Started,
    Rotated(RotationChange),
    FadeFinished,
    /// A frame switched to the placeholder after its load failed.
    LoadFailed(String),
    SourcesChanged,
    TimingChanged,
}

/// Emitted by a rotator after every state change it makes.
#[derive(Debug, Clone)]
pub struct RotatorEvent {
    pub at: Instant,
    pub reason: RotatorReason,
    pub view: RotationView,
}
