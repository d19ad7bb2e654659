use crate::models::Label;

pub const DEFAULT_THRESHOLD: f32 = 0.58;

/// Turns a model score into a label. Scores strictly above the threshold are
/// `Cancer`; NaN compares false and falls through to `NonCancer`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    threshold: f32,
}

impl DecisionPolicy {
    pub fn new(threshold: f32) -> Self {
        DecisionPolicy { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn classify(&self, score: f32) -> (Label, &'static str) {
        let label = if score > self.threshold {
            Label::Cancer
        } else {
            Label::NonCancer
        };
        (label, label.suggestion())
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        DecisionPolicy::new(DEFAULT_THRESHOLD)
    }
}
