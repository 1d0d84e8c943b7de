//! # Mode Classifier
//!
//! Tracks whether smoothed non-streaming usage is above the configured
//! threshold. Only edges are reported; the first observation seeds the
//! state silently.

/// Current demand state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemandState {
    /// No observation yet.
    #[default]
    Unknown,
    BelowThreshold,
    AboveThreshold,
}

/// Edge emitted when the state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandTransition {
    EnteredHighDemand,
    LeftHighDemand,
}

/// Hysteresis flag for high-demand mode.
#[derive(Debug, Clone, Default)]
pub struct DemandClassifier {
    state: DemandState,
}

impl DemandClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DemandState {
        self.state
    }

    /// Whether the last observation was strictly above the threshold.
    pub fn is_high_demand(&self) -> bool {
        self.state == DemandState::AboveThreshold
    }

    /// Feed one smoothed observation. Returns the transition, if any.
    pub fn update(&mut self, smoothed_usage: f64, threshold: f64) -> Option<DemandTransition> {
        let next = if smoothed_usage > threshold {
            DemandState::AboveThreshold
        } else {
            DemandState::BelowThreshold
        };
        let prev = std::mem::replace(&mut self.state, next);

        match (prev, next) {
            (DemandState::BelowThreshold, DemandState::AboveThreshold) => {
                Some(DemandTransition::EnteredHighDemand)
            }
            (DemandState::AboveThreshold, DemandState::BelowThreshold) => {
                Some(DemandTransition::LeftHighDemand)
            }
            _ => None,
        }
    }
}
