use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicator::Decision;
use crate::role::Capability;

/// Text contributed by one role, in the order roles contributed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NarrativeFragment {
    pub role: String,
    pub text: String,
}

/// How a role execution ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoleOutcome {
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

/// Metadata about one role execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleReport {
    pub role: String,
    pub capability: Capability,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub outcome: RoleOutcome,
}

impl RoleReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RoleOutcome::Succeeded
    }
}

/// Final per-ticker recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub ticker: String,
    pub decision: Decision,
    pub rationale: String,
    pub narrative: String,
    pub summary_line: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub roles: Vec<RoleReport>,
}

impl Report {
    /// Plain-text rendering. The narrative is omitted when it was already
    /// streamed to the reader.
    pub fn render(&self, include_narrative: bool) -> String {
        let mut out = String::new();
        out.push_str(&format!("## {} - Decision: {}\n\n", self.ticker, self.decision));
        out.push_str(&format!("{}\n\n", self.rationale));
        if include_narrative && !self.narrative.is_empty() {
            out.push_str(&self.narrative);
            out.push_str("\n\n");
        }
        out.push_str(&self.summary_line);
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report {
            ticker: "AAPL".to_string(),
            decision: Decision::Hold,
            rationale: "No clear momentum signal.".to_string(),
            narrative: "Apple is showing hesitation.".to_string(),
            summary_line: "Summary as of October 8, 2025 – AAPL: Hold. No clear momentum signal."
                .to_string(),
            generated_at: Utc::now(),
            roles: vec![RoleReport {
                role: "technical".to_string(),
                capability: Capability::IndicatorAnalysis,
                attempts: 1,
                elapsed_ms: 3,
                outcome: RoleOutcome::Succeeded,
            }],
        }
    }

    #[test]
    fn render_with_and_without_narrative() {
        let report = sample();
        let full = report.render(true);
        assert!(full.starts_with("## AAPL - Decision: Hold\n\n"));
        assert!(full.contains("showing hesitation"));
        assert!(full.trim_end().ends_with("No clear momentum signal."));

        let streamed = report.render(false);
        assert!(!streamed.contains("showing hesitation"));
        assert!(streamed.contains("Summary as of October 8, 2025"));
    }

    #[test]
    fn outcome_is_tagged() {
        let json = serde_json::to_value(RoleOutcome::Failed {
            reason: "timeout".to_string(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "timeout");
    }

    #[test]
    fn roundtrip_report() {
        let report = sample();
        let json = serde_json::to_string(&report).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(report, parsed);
        assert!(parsed.roles[0].succeeded());
    }
}
