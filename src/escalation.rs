//! Escalation state machine.
//!
//! ```text
//!  (no record) --High/Critical--> Flagged --Critical--> Escalated
//!                                    |  \                  |
//!                      reviewer      |   --Low/Medium--> Dismissed
//!                                    v                     ^
//!                               UnderReview --Critical--> Escalated
//!                                    |                     |
//!                                    +-----reviewer------> Closed
//! ```
//!
//! Automatic transitions go through [`transition`]. `Escalated`, `Closed`
//! and `Dismissed` reject them; only a reviewer action moves a record out of
//! `Escalated`. Re-applying a verdict whose fingerprint is already in the
//! record's history is a no-op that returns the record unchanged.

use crate::error::EscalationError;
use crate::types::escalation::{EscalationRecord, EscalationState, TransitionCause};
use crate::types::verdict::{RiskBand, RiskVerdict};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

/// Result of applying a verdict
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Below the escalation threshold and no record exists: implicit `Normal`
    NoRecord,
    /// Replay of a verdict already applied
    Unchanged(EscalationRecord),
    /// A new or changed record, version bumped
    Applied(EscalationRecord),
}

impl TransitionOutcome {
    pub fn record(&self) -> Option<&EscalationRecord> {
        match self {
            TransitionOutcome::NoRecord => None,
            TransitionOutcome::Unchanged(r) | TransitionOutcome::Applied(r) => Some(r),
        }
    }

    pub fn into_record(self) -> Option<EscalationRecord> {
        match self {
            TransitionOutcome::NoRecord => None,
            TransitionOutcome::Unchanged(r) | TransitionOutcome::Applied(r) => Some(r),
        }
    }
}

/// Apply an automatically produced verdict to the current record.
///
/// Pure: the input record is never mutated.
pub fn transition(
    current: Option<&EscalationRecord>,
    verdict: &RiskVerdict,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EscalationError> {
    let record = match current {
        None if verdict.band.warrants_escalation() => {
            return Ok(TransitionOutcome::Applied(EscalationRecord::open(
                verdict.clone(),
                now,
            )))
        }
        None => return Ok(TransitionOutcome::NoRecord),
        Some(record) => record,
    };

    if record.transaction_id != verdict.transaction_id {
        return Err(EscalationError::Store(format!(
            "verdict for {} applied to record of {}",
            verdict.transaction_id, record.transaction_id
        )));
    }

    if record.has_applied(&verdict.fingerprint) {
        return Ok(TransitionOutcome::Unchanged(record.clone()));
    }

    if record.state.rejects_automatic_transitions() {
        return Err(EscalationError::TerminalStateViolation {
            transaction_id: record.transaction_id.clone(),
            state: record.state,
        });
    }

    let to = match verdict.band {
        RiskBand::Critical => EscalationState::Escalated,
        RiskBand::Low | RiskBand::Medium => EscalationState::Dismissed,
        // Still high: stay put, but record the newer verdict
        RiskBand::High => record.state,
    };

    let mut next = record.clone();
    next.advance(
        to,
        TransitionCause::Verdict {
            fingerprint: verdict.fingerprint.clone(),
        },
        Some(verdict.clone()),
        now,
    );
    Ok(TransitionOutcome::Applied(next))
}

/// Human reviewer actions, issued from outside the automatic path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    BeginReview,
    Close,
    Dismiss,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::BeginReview => "begin_review",
            ReviewAction::Close => "close",
            ReviewAction::Dismiss => "dismiss",
        }
    }

    /// Target state, if the action is allowed from `from`
    pub fn target(&self, from: EscalationState) -> Option<EscalationState> {
        use EscalationState::*;
        if from.is_terminal() {
            return None;
        }
        match (self, from) {
            (ReviewAction::BeginReview, Flagged) => Some(UnderReview),
            (ReviewAction::Close, UnderReview | Escalated) => Some(Closed),
            (ReviewAction::Dismiss, Flagged | UnderReview | Escalated) => Some(Dismissed),
            _ => None,
        }
    }
}

/// Durable keyed storage for escalation records
#[async_trait]
pub trait EscalationStore: Send + Sync {
    async fn load(&self, transaction_id: &str) -> Result<Option<EscalationRecord>, EscalationError>;

    /// Persist `record` only if the stored version equals `expected_version`
    /// (`None`: no record may exist yet).
    async fn save(
        &self,
        record: &EscalationRecord,
        expected_version: Option<u64>,
    ) -> Result<(), EscalationError>;
}

/// Process-local escalation store
#[derive(Default)]
pub struct InMemoryEscalationStore {
    records: RwLock<HashMap<String, EscalationRecord>>,
}

impl InMemoryEscalationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EscalationStore for InMemoryEscalationStore {
    async fn load(&self, transaction_id: &str) -> Result<Option<EscalationRecord>, EscalationError> {
        let records = self
            .records
            .read()
            .map_err(|e| EscalationError::Store(format!("lock poisoned: {}", e)))?;
        Ok(records.get(transaction_id).cloned())
    }

    async fn save(
        &self,
        record: &EscalationRecord,
        expected_version: Option<u64>,
    ) -> Result<(), EscalationError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| EscalationError::Store(format!("lock poisoned: {}", e)))?;
        let found = records.get(&record.transaction_id).map(|r| r.version);
        if found != expected_version {
            return Err(EscalationError::StaleVersionConflict {
                transaction_id: record.transaction_id.clone(),
                expected: expected_version,
                found,
            });
        }
        records.insert(record.transaction_id.clone(), record.clone());
        Ok(())
    }
}

/// Serializes transitions per transaction and persists them through the store
pub struct EscalationStateMachine {
    store: Arc<dyn EscalationStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EscalationStateMachine {
    pub fn new(store: Arc<dyn EscalationStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a verdict under the transaction's lock
    pub async fn apply_verdict(
        &self,
        verdict: &RiskVerdict,
    ) -> Result<TransitionOutcome, EscalationError> {
        let key = verdict.transaction_id.as_str();
        let lock = self.key_lock(key)?;
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(verdict).await
        };
        self.release(key, lock);

        match &result {
            Ok(TransitionOutcome::Applied(record)) => info!(
                transaction_id = %record.transaction_id,
                case_id = %record.case_id,
                state = %record.state,
                version = record.version,
                risk_score = verdict.score,
                "Escalation transition applied"
            ),
            Err(e) => warn!(
                transaction_id = %verdict.transaction_id,
                error = %e,
                "Escalation transition rejected"
            ),
            _ => {}
        }
        result
    }

    async fn apply_locked(&self, verdict: &RiskVerdict) -> Result<TransitionOutcome, EscalationError> {
        let current = self.store.load(&verdict.transaction_id).await?;
        let outcome = transition(current.as_ref(), verdict, Utc::now())?;
        if let TransitionOutcome::Applied(record) = &outcome {
            self.store
                .save(record, current.as_ref().map(|r| r.version))
                .await?;
        }
        Ok(outcome)
    }

    /// Apply a reviewer action against the version the reviewer saw
    pub async fn apply_review_action(
        &self,
        transaction_id: &str,
        action: ReviewAction,
        reviewer: &str,
        note: Option<String>,
        expected_version: u64,
    ) -> Result<EscalationRecord, EscalationError> {
        let lock = self.key_lock(transaction_id)?;
        let result = {
            let _guard = lock.lock().await;
            self.review_locked(transaction_id, action, reviewer, note, expected_version)
                .await
        };
        self.release(transaction_id, lock);

        if let Ok(record) = &result {
            info!(
                transaction_id = %transaction_id,
                reviewer = %reviewer,
                action = action.as_str(),
                state = %record.state,
                version = record.version,
                "Review action applied"
            );
        }
        result
    }

    async fn review_locked(
        &self,
        transaction_id: &str,
        action: ReviewAction,
        reviewer: &str,
        note: Option<String>,
        expected_version: u64,
    ) -> Result<EscalationRecord, EscalationError> {
        let current = self
            .store
            .load(transaction_id)
            .await?
            .ok_or_else(|| EscalationError::NotFound {
                transaction_id: transaction_id.to_string(),
            })?;

        if current.version != expected_version {
            return Err(EscalationError::StaleVersionConflict {
                transaction_id: transaction_id.to_string(),
                expected: Some(expected_version),
                found: Some(current.version),
            });
        }

        let to = action
            .target(current.state)
            .ok_or_else(|| EscalationError::InvalidReviewAction {
                transaction_id: transaction_id.to_string(),
                state: current.state,
                action: action.as_str().to_string(),
            })?;

        let mut next = current.clone();
        next.advance(
            to,
            TransitionCause::Review {
                reviewer: reviewer.to_string(),
                note,
            },
            None,
            Utc::now(),
        );
        self.store.save(&next, Some(current.version)).await?;
        Ok(next)
    }

    /// Current record for a transaction, if one was ever created
    pub async fn replay(&self, transaction_id: &str) -> Result<Option<EscalationRecord>, EscalationError> {
        self.store.load(transaction_id).await
    }

    fn key_lock(&self, key: &str) -> Result<Arc<tokio::sync::Mutex<()>>, EscalationError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| EscalationError::Store(format!("lock table poisoned: {}", e)))?;
        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    /// Drop the per-key lock once no other caller holds it
    fn release(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // One reference in the table, one here
            if Arc::strong_count(&lock) <= 2 {
                locks.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::agent::{AgentId, AgentResult};
    use crate::types::verdict::FusionMethod;

    fn verdict(tx: &str, score: f64, band: RiskBand) -> RiskVerdict {
        let mut verdict = RiskVerdict {
            transaction_id: tx.to_string(),
            score,
            base_score: score,
            penalty_factor: 1.0,
            band,
            method: FusionMethod::ConfidenceWeighted,
            agents: vec![AgentResult::skipped(AgentId::DeepfakeDetection, "no media")],
            attributions: vec![],
            vocabulary_version: "fv-2".to_string(),
            fingerprint: String::new(),
        };
        verdict.fingerprint = verdict.compute_fingerprint();
        verdict
    }

    fn machine() -> EscalationStateMachine {
        EscalationStateMachine::new(Arc::new(InMemoryEscalationStore::new()))
    }

    #[test]
    fn test_low_band_creates_no_record() {
        let outcome = transition(None, &verdict("tx", 0.2, RiskBand::Low), Utc::now()).unwrap();
        assert_eq!(outcome, TransitionOutcome::NoRecord);
        let outcome = transition(None, &verdict("tx", 0.6, RiskBand::Medium), Utc::now()).unwrap();
        assert!(outcome.record().is_none());
    }

    #[test]
    fn test_transition_table() {
        let now = Utc::now();
        let flagged = transition(None, &verdict("tx", 0.75, RiskBand::High), now)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(flagged.state, EscalationState::Flagged);
        assert_eq!(flagged.version, 1);
        assert!(flagged.case_id.starts_with("FA-"));

        let still_high = transition(Some(&flagged), &verdict("tx", 0.78, RiskBand::High), now)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(still_high.state, EscalationState::Flagged);
        assert_eq!(still_high.version, 2);
        assert_eq!(still_high.verdict.score, 0.78);

        let escalated = transition(Some(&flagged), &verdict("tx", 0.9, RiskBand::Critical), now)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(escalated.state, EscalationState::Escalated);
        assert_eq!(escalated.history.len(), 2);
        assert_eq!(escalated.history[1].from, Some(EscalationState::Flagged));

        let dismissed = transition(Some(&flagged), &verdict("tx", 0.3, RiskBand::Low), now)
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(dismissed.state, EscalationState::Dismissed);
        assert_eq!(dismissed.history.last().unwrap().score, 0.3);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let now = Utc::now();
        let high = verdict("tx", 0.75, RiskBand::High);
        let flagged = transition(None, &high, now).unwrap().into_record().unwrap();

        let replayed = transition(Some(&flagged), &high, now).unwrap();
        assert_eq!(replayed, TransitionOutcome::Unchanged(flagged.clone()));
        assert_eq!(replayed.record().unwrap().version, flagged.version);
    }

    #[test]
    fn test_escalated_rejects_automatic_transitions() {
        let now = Utc::now();
        let flagged = transition(None, &verdict("tx", 0.75, RiskBand::High), now)
            .unwrap()
            .into_record()
            .unwrap();
        let critical = verdict("tx", 0.95, RiskBand::Critical);
        let escalated = transition(Some(&flagged), &critical, now)
            .unwrap()
            .into_record()
            .unwrap();

        let before = escalated.clone();
        for v in [
            verdict("tx", 0.1, RiskBand::Low),
            verdict("tx", 0.99, RiskBand::Critical),
        ] {
            let err = transition(Some(&escalated), &v, now).unwrap_err();
            assert!(matches!(
                err,
                EscalationError::TerminalStateViolation {
                    state: EscalationState::Escalated,
                    ..
                }
            ));
        }
        assert_eq!(escalated, before);

        // The verdict that escalated it is still a harmless replay
        assert!(matches!(
            transition(Some(&escalated), &critical, now).unwrap(),
            TransitionOutcome::Unchanged(_)
        ));
    }

    #[test]
    fn test_review_action_targets() {
        use EscalationState::*;
        assert_eq!(ReviewAction::BeginReview.target(Flagged), Some(UnderReview));
        assert_eq!(ReviewAction::Close.target(Escalated), Some(Closed));
        assert_eq!(ReviewAction::Dismiss.target(Escalated), Some(Dismissed));
        assert_eq!(ReviewAction::Close.target(Flagged), None);
        assert_eq!(ReviewAction::Dismiss.target(Closed), None);
        for action in [ReviewAction::BeginReview, ReviewAction::Close, ReviewAction::Dismiss] {
            assert_eq!(action.target(Dismissed), None);
            assert_eq!(action.target(Closed), None);
        }
        assert!(Closed.is_terminal() && Dismissed.is_terminal());
        assert!(!Escalated.is_terminal());
    }

    #[tokio::test]
    async fn test_store_rejects_stale_version() {
        let store = InMemoryEscalationStore::new();
        let record = EscalationRecord::open(verdict("tx", 0.8, RiskBand::High), Utc::now());
        store.save(&record, None).await.unwrap();

        let err = store.save(&record, None).await.unwrap_err();
        assert_eq!(
            err,
            EscalationError::StaleVersionConflict {
                transaction_id: "tx".to_string(),
                expected: None,
                found: Some(1),
            }
        );
    }

    #[tokio::test]
    async fn test_machine_persists_and_replays() {
        let machine = machine();
        let high = verdict("tx_m", 0.8, RiskBand::High);

        let first = machine.apply_verdict(&high).await.unwrap();
        let second = machine.apply_verdict(&high).await.unwrap();
        assert!(matches!(first, TransitionOutcome::Applied(_)));
        assert!(matches!(second, TransitionOutcome::Unchanged(_)));
        assert_eq!(first.record().unwrap().version, second.record().unwrap().version);

        let stored = machine.replay("tx_m").await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert!(machine.replay("tx_unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_review_actions_use_optimistic_versions() {
        let machine = machine();
        machine
            .apply_verdict(&verdict("tx_r", 0.8, RiskBand::High))
            .await
            .unwrap();

        let stale = machine
            .apply_review_action("tx_r", ReviewAction::BeginReview, "analyst", None, 7)
            .await
            .unwrap_err();
        assert!(matches!(stale, EscalationError::StaleVersionConflict { .. }));

        let reviewing = machine
            .apply_review_action("tx_r", ReviewAction::BeginReview, "analyst", None, 1)
            .await
            .unwrap();
        assert_eq!(reviewing.state, EscalationState::UnderReview);
        assert_eq!(reviewing.version, 2);

        let escalated = machine
            .apply_verdict(&verdict("tx_r", 0.95, RiskBand::Critical))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(escalated.state, EscalationState::Escalated);

        let closed = machine
            .apply_review_action(
                "tx_r",
                ReviewAction::Close,
                "analyst",
                Some("confirmed fraud".to_string()),
                escalated.version,
            )
            .await
            .unwrap();
        assert_eq!(closed.state, EscalationState::Closed);

        let invalid = machine
            .apply_review_action("tx_r", ReviewAction::Dismiss, "analyst", None, closed.version)
            .await
            .unwrap_err();
        assert!(matches!(invalid, EscalationError::InvalidReviewAction { .. }));

        let missing = machine
            .apply_review_action("tx_none", ReviewAction::Close, "analyst", None, 1)
            .await
            .unwrap_err();
        assert!(matches!(missing, EscalationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_are_serialized() {
        let machine = Arc::new(machine());
        let mut handles = Vec::new();
        for i in 0..16 {
            let machine = machine.clone();
            handles.push(tokio::spawn(async move {
                let v = verdict("tx_c", 0.86 + i as f64 * 0.001, RiskBand::Critical);
                machine.apply_verdict(&v).await
            }));
        }

        let mut applied = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(TransitionOutcome::Applied(_)) => applied += 1,
                Err(EscalationError::TerminalStateViolation { .. }) => rejected += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        // One creation (Flagged), one promotion (Escalated), the rest rejected
        assert_eq!(applied, 2);
        assert_eq!(rejected, 14);
        let record = machine.replay("tx_c").await.unwrap().unwrap();
        assert_eq!(record.state, EscalationState::Escalated);
        assert_eq!(record.version, 2);
        assert!(machine.locks.lock().unwrap().is_empty());
    }
}
