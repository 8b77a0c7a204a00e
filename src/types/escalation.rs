//! Escalation record and its transition history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::verdict::{RiskBand, RiskVerdict};

/// Escalation workflow state. `Normal` is implicit: no record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    Flagged,
    UnderReview,
    Escalated,
    Closed,
    Dismissed,
}

impl EscalationState {
    /// States that no automatic verdict may leave
    pub fn rejects_automatic_transitions(&self) -> bool {
        matches!(
            self,
            EscalationState::Escalated | EscalationState::Closed | EscalationState::Dismissed
        )
    }

    /// States nothing may leave, human or automatic
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscalationState::Closed | EscalationState::Dismissed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationState::Flagged => "flagged",
            EscalationState::UnderReview => "under_review",
            EscalationState::Escalated => "escalated",
            EscalationState::Closed => "closed",
            EscalationState::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for EscalationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionCause {
    /// An automatically produced verdict
    Verdict { fingerprint: String },
    /// An external reviewer action
    Review { reviewer: String, note: Option<String> },
}

/// One entry in the transition history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Option<EscalationState>,
    pub to: EscalationState,
    pub at: DateTime<Utc>,
    /// Score of the verdict that was current when the transition happened
    pub score: f64,
    pub band: RiskBand,
    pub cause: TransitionCause,
}

/// State and history of one transaction's escalation.
///
/// Only the escalation state machine constructs or mutates records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub case_id: String,
    pub transaction_id: String,
    pub state: EscalationState,
    /// Verdict that triggered the current state
    pub verdict: RiskVerdict,
    /// Monotonically increasing; starts at 1 on creation
    pub version: u64,
    pub history: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub(crate) fn open(verdict: RiskVerdict, now: DateTime<Utc>) -> Self {
        let case_id = format!(
            "FA-{}-{}",
            now.format("%Y%m%d"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let transition = Transition {
            from: None,
            to: EscalationState::Flagged,
            at: now,
            score: verdict.score,
            band: verdict.band,
            cause: TransitionCause::Verdict {
                fingerprint: verdict.fingerprint.clone(),
            },
        };
        Self {
            case_id,
            transaction_id: verdict.transaction_id.clone(),
            state: EscalationState::Flagged,
            verdict,
            version: 1,
            history: vec![transition],
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a verdict with this fingerprint has already been applied
    pub fn has_applied(&self, fingerprint: &str) -> bool {
        self.history.iter().any(|t| {
            matches!(&t.cause, TransitionCause::Verdict { fingerprint: f } if f == fingerprint)
        })
    }

    pub(crate) fn advance(
        &mut self,
        to: EscalationState,
        cause: TransitionCause,
        verdict: Option<RiskVerdict>,
        now: DateTime<Utc>,
    ) {
        if let Some(verdict) = verdict {
            self.verdict = verdict;
        }
        self.history.push(Transition {
            from: Some(self.state),
            to,
            at: now,
            score: self.verdict.score,
            band: self.verdict.band,
            cause,
        });
        self.state = to;
        self.version += 1;
        self.updated_at = now;
    }
}
