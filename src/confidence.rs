use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Score-derived action level. Both HIGH's and MEDIUM's lower bounds
/// are closed (`>=`), not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

fn level_for(score: f64) -> ConfidenceLevel {
    if score >= 0.9 {
        ConfidenceLevel::High
    } else if score >= 0.7 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Inputs to pre-execution mode: each flag is a pass/fail check,
/// individually weighted below.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PreExecutionChecks {
    pub no_duplicate: bool,
    pub architecture_verified: bool,
    pub official_docs: bool,
    pub oss_reference: bool,
    pub root_cause: bool,
}

/// Inputs to signal mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalChecks {
    pub signal_strength: f64,
    pub signal_consistency: f64,
    pub market_condition: String,
    pub risk_ok: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceResult {
    pub score: f64,
    pub level: ConfidenceLevel,
}

/// Side-effect-free, deterministic aggregator for the two confidence
/// modes. Recognized market conditions are fixed at construction so
/// callers can't silently widen the set at call sites.
pub struct ConfidenceChecker {
    recognized_market_conditions: HashSet<String>,
}

impl ConfidenceChecker {
    pub fn new(recognized_market_conditions: impl IntoIterator<Item = String>) -> Self {
        Self {
            recognized_market_conditions: recognized_market_conditions.into_iter().collect(),
        }
    }

    pub fn default_conditions() -> Self {
        Self::new(
            ["TRENDING", "RANGING", "VOLATILE", "QUIET"]
                .iter()
                .map(|s| s.to_string()),
        )
    }

    pub fn pre_execution(&self, checks: &PreExecutionChecks) -> ConfidenceResult {
        let mut score = 0.0;
        if checks.no_duplicate {
            score += 0.25;
        }
        if checks.architecture_verified {
            score += 0.25;
        }
        if checks.official_docs {
            score += 0.20;
        }
        if checks.oss_reference {
            score += 0.15;
        }
        if checks.root_cause {
            score += 0.15;
        }
        ConfidenceResult {
            score,
            level: level_for(score),
        }
    }

    pub fn signal(&self, checks: &SignalChecks) -> ConfidenceResult {
        let mut score = 0.0;
        if checks.signal_strength >= 0.5 {
            score += 0.30;
        }
        if checks.signal_consistency >= 0.6 {
            score += 0.25;
        }
        if self.recognized_market_conditions.contains(&checks.market_condition) {
            score += 0.25;
        }
        if checks.risk_ok {
            score += 0.20;
        }
        ConfidenceResult {
            score,
            level: level_for(score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_scores_classify_high_and_medium() {
        assert_eq!(level_for(0.9), ConfidenceLevel::High);
        assert_eq!(level_for(0.89999), ConfidenceLevel::Medium);
        assert_eq!(level_for(0.7), ConfidenceLevel::Medium);
        assert_eq!(level_for(0.69999), ConfidenceLevel::Low);
    }

    #[test]
    fn pre_execution_all_checks_passing_is_high() {
        let checker = ConfidenceChecker::default_conditions();
        let result = checker.pre_execution(&PreExecutionChecks {
            no_duplicate: true,
            architecture_verified: true,
            official_docs: true,
            oss_reference: true,
            root_cause: true,
        });
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(result.level, ConfidenceLevel::High);
    }

    #[test]
    fn signal_mode_unrecognized_condition_drops_score() {
        let checker = ConfidenceChecker::default_conditions();
        let result = checker.signal(&SignalChecks {
            signal_strength: 0.6,
            signal_consistency: 0.7,
            market_condition: "UNKNOWN".to_string(),
            risk_ok: true,
        });
        assert!((result.score - 0.75).abs() < 1e-9);
        assert_eq!(result.level, ConfidenceLevel::Medium);
    }
}
