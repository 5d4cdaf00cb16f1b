//! Convergence Evaluator.
//!
//! A pure function of the policy and the session's progress. Checks run in a
//! fixed order: Converged, Exhausted, Stalled, otherwise Retrying.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits a session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergencePolicy {
    /// Target coverage percentage, 0-100.
    pub desired_coverage: f64,
    pub max_iterations: u32,
    pub max_wall_clock: Duration,
    /// Consecutive no-gain iterations that stop the session early.
    pub stall_threshold: Option<u32>,
}

/// Where the session stands after an iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Coverage of the test file as it currently stands.
    pub coverage: f64,
    /// Non-baseline iterations consumed.
    pub iterations_used: u32,
    pub elapsed: Duration,
    /// Iterations since the covered-line count last rose.
    pub consecutive_no_gain: u32,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Converged,
    Retrying,
    Exhausted,
    Stalled,
}

pub fn evaluate(policy: &ConvergencePolicy, progress: &Progress) -> Verdict {
    if progress.coverage >= policy.desired_coverage {
        return Verdict::Converged;
    }
    if progress.iterations_used >= policy.max_iterations || progress.elapsed >= policy.max_wall_clock
    {
        return Verdict::Exhausted;
    }
    if policy
        .stall_threshold
        .is_some_and(|threshold| threshold > 0 && progress.consecutive_no_gain >= threshold)
    {
        return Verdict::Stalled;
    }
    Verdict::Retrying
}
