//! Risk scoring
//!
//! A contract's risk score is the mean severity weight of its findings
//! (critical=9, high=7, medium=5, low=3), rounded half-up to one decimal.
//! An empty finding set scores exactly 0.

use crate::model::{NewFinding, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Score a set of severities.
///
/// Rounding is done in integer tenths so that halves always round up,
/// independent of binary floating point representation.
pub fn score<I>(severities: I) -> f64
where
    I: IntoIterator<Item = Severity>,
{
    let (sum, count) = severities
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), s| (sum + s.weight() as u64, count + 1));

    if count == 0 {
        return 0.0;
    }

    // round(sum * 10 / count) with halves rounding up
    let tenths = (sum * 20 + count) / (count * 2);
    tenths as f64 / 10.0
}

/// Score submitted findings
pub fn score_findings(findings: &[NewFinding]) -> f64 {
    score(findings.iter().map(|f| f.severity))
}

/// Round a non-negative mean to one decimal, halves up
pub fn round_tenths(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 10.0).round() / 10.0
}

/// Coarse classification of a risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Moderate,
    Elevated,
    High,
}

impl RiskBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 7.0 {
            RiskBand::High
        } else if score >= 5.0 {
            RiskBand::Elevated
        } else if score >= 3.0 {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskBand::Low => "low",
            RiskBand::Moderate => "moderate",
            RiskBand::Elevated => "elevated",
            RiskBand::High => "high",
        };
        f.pad(label)
    }
}
