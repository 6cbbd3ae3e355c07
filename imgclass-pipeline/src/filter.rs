//! Filter stage: labeled scores → accept/reject decision
//!
//! Rejection is not a silent drop. The orchestrator turns a rejected decision
//! into a `ConfidenceBelowThreshold` failure of the whole item run.

use crate::types::{FilterDecision, LabeledScores};
use imgclass_common::{Error, Result};

/// Confidence threshold used when none is configured
pub const DEFAULT_THRESHOLD: f64 = 0.93;

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceFilter {
    threshold: f64,
}

impl ConfidenceFilter {
    /// Threshold must lie in `[0, 1]`
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "Confidence threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self { threshold })
    }

    /// Accept iff the top score is at least the threshold
    pub fn decide(&self, task_id: &str, scores: &LabeledScores) -> FilterDecision {
        let (top_label, top_score) = scores
            .top()
            .map(|t| (t.label.clone(), t.score))
            .unwrap_or_else(|| (String::new(), 0.0));

        let accepted = !scores.is_empty() && top_score >= self.threshold;
        let reason = (!accepted).then(|| rejection_reason(top_score, self.threshold));

        FilterDecision {
            task_id: task_id.to_string(),
            accepted,
            top_label,
            top_score,
            threshold: self.threshold,
            reason,
        }
    }
}

impl Default for ConfidenceFilter {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// `"<score> < <threshold>"`, two decimals each
///
/// When two decimals would render both values the same (0.899 against 0.9),
/// precision grows until they differ.
pub fn rejection_reason(top_score: f64, threshold: f64) -> String {
    let mut precision = 2;
    loop {
        let score = format!("{:.*}", precision, top_score);
        let limit = format!("{:.*}", precision, threshold);
        if score != limit || precision >= MAX_REASON_PRECISION {
            return format!("{} < {}", score, limit);
        }
        precision += 1;
    }
}

const MAX_REASON_PRECISION: usize = 17;
