//! Learning engine
//!
//! Converts repeated user overrides into calibrated, user-confirmed
//! threshold relaxations. Adjustments are two-phase: the engine proposes a
//! new threshold when the override pattern warrants one, and commits it into
//! the user's learned preferences only on explicit acceptance before the
//! proposal's TTL elapses. Expiry is an explicit outcome, never implicit
//! acceptance.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use vigil_common::time;
use vigil_common::types::{
    AdjustmentNotification, FilterCategory, LearnedPreference, OverrideRecord, OverrideType,
    PendingAdjustment, TriggerRecord, LEARNED_THRESHOLD_MAX, LEARNED_THRESHOLD_MIN,
};

/// Minimum overrides in the adjustment window before proposing
const MIN_OVERRIDES_FOR_ADJUSTMENT: usize = 3;
/// Minimum override rate (overrides / triggered filters) before proposing
const MIN_OVERRIDE_RATE: f64 = 0.7;
/// Base threshold step per committed adjustment
const ADJUSTMENT_STEP: f64 = 0.15;
/// Step multiplier when the window contains a reveal_always override
const REVEAL_ALWAYS_BOOST: f64 = 1.5;
/// Starting threshold assumed before the first committed adjustment
const DEFAULT_LEARNED_BASE: f64 = 0.5;
/// How long a proposal stays answerable (ms)
const PROPOSAL_TTL_MS: u64 = 5 * 60 * 1_000;
/// Sliding retention for override records (ms)
const OVERRIDE_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1_000;
/// Window over which override statistics are computed (ms)
const ADJUSTMENT_WINDOW_MS: u64 = 24 * 60 * 60 * 1_000;

/// A proposed threshold adjustment, returned to the caller and held pending
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentProposal {
    pub notification: AdjustmentNotification,
    pub expires_at_ms: u64,
}

/// Result of a user's response to a pending adjustment
#[derive(Debug, Clone, PartialEq)]
pub enum AdjustmentOutcome {
    /// Proposal accepted in time; the learned preference was upserted
    Committed(LearnedPreference),
    /// Proposal declined; nothing changed
    Rejected,
    /// Proposal had already expired; nothing changed (stale suggestions are
    /// never retroactively applied)
    Expired,
    /// No proposal exists for the key
    NoProposal,
}

/// Per-key learning progress for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStatus {
    pub category: FilterCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub state: LearningState,
    pub confidence: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningState {
    /// Overrides are accumulating but no adjustment is committed yet
    Learning,
    /// A committed learned preference is in force
    Adjusted,
}

#[derive(Default)]
struct UserLearningState {
    overrides: Vec<OverrideRecord>,
    triggers: Vec<TriggerRecord>,
    learned: Vec<LearnedPreference>,
    pending: Vec<PendingAdjustment>,
}

/// Per-user learning state, mutated only through engine methods
///
/// Readers (the decision path) observe the latest committed preferences;
/// in-flight proposals are invisible to them.
pub struct LearningEngine {
    states: RwLock<HashMap<String, UserLearningState>>,
}

impl Default for LearningEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LearningEngine {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Log one emitted filter instruction for a user
    ///
    /// The 24h trigger count is the denominator of the override rate.
    pub async fn record_trigger(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
    ) {
        self.record_trigger_at(user_id, category, subcategory, time::now_ms())
            .await;
    }

    /// Record a user override and prune records past retention
    pub async fn record_override(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        override_type: OverrideType,
        session_id: &str,
    ) {
        self.record_override_at(
            user_id,
            category,
            subcategory,
            override_type,
            session_id,
            time::now_ms(),
        )
        .await;
    }

    /// Propose a threshold adjustment if the override pattern warrants one
    ///
    /// Requires at least 3 overrides for the key in the trailing 24h and an
    /// override rate of at least 70% of triggered filters. The proposal is
    /// held pending (replacing any prior proposal for the key) and returned;
    /// learned preferences are not touched until it is accepted.
    pub async fn check_for_adjustment(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
    ) -> Option<AdjustmentProposal> {
        self.check_for_adjustment_at(user_id, category, subcategory, time::now_ms())
            .await
    }

    /// Resolve a pending adjustment with the user's answer
    pub async fn process_adjustment_response(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        accepted: bool,
    ) -> AdjustmentOutcome {
        self.process_adjustment_response_at(user_id, category, subcategory, accepted, time::now_ms())
            .await
    }

    /// Latest committed preferences for a user
    pub async fn learned_preferences(&self, user_id: &str) -> Vec<LearnedPreference> {
        let states = self.states.read().await;
        states
            .get(user_id)
            .map(|s| s.learned.clone())
            .unwrap_or_default()
    }

    /// Live and expired proposals currently held for a user
    pub async fn pending_adjustments(&self, user_id: &str) -> Vec<PendingAdjustment> {
        let states = self.states.read().await;
        states
            .get(user_id)
            .map(|s| s.pending.clone())
            .unwrap_or_default()
    }

    /// Per-key learning progress for display
    pub async fn learning_status(&self, user_id: &str) -> Vec<LearningStatus> {
        let states = self.states.read().await;
        let Some(state) = states.get(user_id) else {
            return Vec::new();
        };

        let mut status: Vec<LearningStatus> = state
            .learned
            .iter()
            .map(|pref| LearningStatus {
                category: pref.category,
                subcategory: pref.subcategory.clone(),
                state: LearningState::Adjusted,
                confidence: pref.confidence,
                description: format!(
                    "Threshold {:.2} ({:.0}% confident)",
                    pref.learned_threshold,
                    pref.confidence * 100.0
                ),
            })
            .collect();

        let mut counts: HashMap<(FilterCategory, Option<String>), usize> = HashMap::new();
        for record in &state.overrides {
            *counts
                .entry((record.category, record.subcategory.clone()))
                .or_insert(0) += 1;
        }

        for ((category, subcategory), count) in counts {
            let already_adjusted = state
                .learned
                .iter()
                .any(|pref| pref.category == category && pref.subcategory == subcategory);
            if already_adjusted || count < 2 {
                continue;
            }
            status.push(LearningStatus {
                category,
                subcategory,
                state: LearningState::Learning,
                confidence: count as f64 / MIN_OVERRIDES_FOR_ADJUSTMENT as f64,
                description: format!("Learning from {} overrides", count),
            });
        }

        status
    }

    /// Clear learning state for a user
    ///
    /// With a category, clears that category's (optionally that
    /// subcategory's) preferences, overrides, triggers, and pending
    /// proposals; without one, clears everything the user has learned.
    pub async fn reset_learning(
        &self,
        user_id: &str,
        category: Option<FilterCategory>,
        subcategory: Option<&str>,
    ) {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(user_id) else {
            return;
        };

        match category {
            Some(category) => {
                let matches = |c: FilterCategory, s: Option<&str>| {
                    c == category && (subcategory.is_none() || s == subcategory)
                };
                state
                    .learned
                    .retain(|p| !matches(p.category, p.subcategory.as_deref()));
                state
                    .overrides
                    .retain(|o| !matches(o.category, o.subcategory.as_deref()));
                state
                    .triggers
                    .retain(|t| !matches(t.category, t.subcategory.as_deref()));
                state
                    .pending
                    .retain(|p| !matches(p.category, p.subcategory.as_deref()));
            }
            None => *state = UserLearningState::default(),
        }
        info!(user = user_id, ?category, "learning state reset");
    }

    async fn record_trigger_at(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        now_ms: u64,
    ) {
        let mut states = self.states.write().await;
        let state = states.entry(user_id.to_string()).or_default();
        state.triggers.push(TriggerRecord {
            category,
            subcategory: subcategory.map(String::from),
            timestamp_ms: now_ms,
        });
        let cutoff = now_ms.saturating_sub(ADJUSTMENT_WINDOW_MS);
        state.triggers.retain(|t| t.timestamp_ms > cutoff);
    }

    async fn record_override_at(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        override_type: OverrideType,
        session_id: &str,
        now_ms: u64,
    ) {
        let mut states = self.states.write().await;
        let state = states.entry(user_id.to_string()).or_default();
        state.overrides.push(OverrideRecord {
            category,
            subcategory: subcategory.map(String::from),
            override_type,
            timestamp_ms: now_ms,
            session_id: session_id.to_string(),
        });
        let cutoff = now_ms.saturating_sub(OVERRIDE_RETENTION_MS);
        state.overrides.retain(|o| o.timestamp_ms > cutoff);
        debug!(
            user = user_id,
            category = %category,
            ?override_type,
            "override recorded"
        );
    }

    async fn check_for_adjustment_at(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        now_ms: u64,
    ) -> Option<AdjustmentProposal> {
        let mut states = self.states.write().await;
        let state = states.entry(user_id.to_string()).or_default();

        let window_start = now_ms.saturating_sub(ADJUSTMENT_WINDOW_MS);
        let key_match = |c: FilterCategory, s: Option<&str>| {
            c == category && (subcategory.is_none() || s == subcategory)
        };

        let recent: Vec<&OverrideRecord> = state
            .overrides
            .iter()
            .filter(|o| {
                key_match(o.category, o.subcategory.as_deref()) && o.timestamp_ms > window_start
            })
            .collect();
        let count = recent.len();
        if count < MIN_OVERRIDES_FOR_ADJUSTMENT {
            return None;
        }

        let trigger_count = state
            .triggers
            .iter()
            .filter(|t| {
                key_match(t.category, t.subcategory.as_deref()) && t.timestamp_ms > window_start
            })
            .count();
        let rate = count as f64 / trigger_count.max(1) as f64;
        if rate < MIN_OVERRIDE_RATE {
            return None;
        }

        let reveal_always = recent
            .iter()
            .any(|o| o.override_type == OverrideType::RevealAlways);

        let old_threshold = state
            .learned
            .iter()
            .find(|p| p.category == category && p.subcategory.as_deref() == subcategory)
            .map(|p| p.learned_threshold)
            .unwrap_or(DEFAULT_LEARNED_BASE);

        let step = ADJUSTMENT_STEP * if reveal_always { REVEAL_ALWAYS_BOOST } else { 1.0 };
        let suggested_threshold = (old_threshold + step).min(LEARNED_THRESHOLD_MAX);
        let confidence = (0.5 + (count as f64 / 10.0) * 0.3 + rate * 0.2).min(0.95);

        let expires_at_ms = now_ms + PROPOSAL_TTL_MS;
        state.pending.retain(|p| {
            !(p.category == category && p.subcategory.as_deref() == subcategory)
        });
        state.pending.push(PendingAdjustment {
            category,
            subcategory: subcategory.map(String::from),
            suggested_threshold,
            confidence,
            expires_at_ms,
        });

        let key = match subcategory {
            Some(sub) => format!("{} ({})", category, sub),
            None => category.to_string(),
        };
        let reason = format!(
            "{} overrides of {} in the last 24h ({:.0}% of triggered filters)",
            count,
            key,
            rate.min(1.0) * 100.0
        );
        info!(user = user_id, %category, suggested_threshold, "adjustment proposed");

        Some(AdjustmentProposal {
            notification: AdjustmentNotification {
                category,
                subcategory: subcategory.map(String::from),
                old_threshold,
                new_threshold: suggested_threshold,
                confidence,
                reason,
            },
            expires_at_ms,
        })
    }

    async fn process_adjustment_response_at(
        &self,
        user_id: &str,
        category: FilterCategory,
        subcategory: Option<&str>,
        accepted: bool,
        now_ms: u64,
    ) -> AdjustmentOutcome {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(user_id) else {
            return AdjustmentOutcome::NoProposal;
        };

        let position = state
            .pending
            .iter()
            .position(|p| p.category == category && p.subcategory.as_deref() == subcategory);
        let Some(position) = position else {
            return AdjustmentOutcome::NoProposal;
        };

        // The pending entry is discarded whichever way this resolves
        let pending = state.pending.remove(position);
        if pending.is_expired(now_ms) {
            debug!(user = user_id, %category, "response to expired proposal ignored");
            return AdjustmentOutcome::Expired;
        }
        if !accepted {
            return AdjustmentOutcome::Rejected;
        }

        let override_count = state
            .overrides
            .iter()
            .filter(|o| o.category == category && o.subcategory.as_deref() == subcategory)
            .count() as u32;

        let preference = LearnedPreference {
            user_id: user_id.to_string(),
            category,
            subcategory: subcategory.map(String::from),
            learned_threshold: pending
                .suggested_threshold
                .clamp(LEARNED_THRESHOLD_MIN, LEARNED_THRESHOLD_MAX),
            confidence: pending.confidence,
            override_count_at_commit: override_count,
            updated_at: time::now(),
        };

        match state
            .learned
            .iter_mut()
            .find(|p| p.category == category && p.subcategory.as_deref() == subcategory)
        {
            Some(existing) => *existing = preference.clone(),
            None => state.learned.push(preference.clone()),
        }

        info!(
            user = user_id,
            %category,
            threshold = preference.learned_threshold,
            "adjustment committed"
        );
        AdjustmentOutcome::Committed(preference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: u64 = 60 * 60 * 1_000;
    const NOW: u64 = 100 * 24 * HOUR_MS;

    async fn seed(
        engine: &LearningEngine,
        overrides: usize,
        reveal_always: usize,
        triggers: usize,
        now_ms: u64,
    ) {
        for i in 0..triggers {
            engine
                .record_trigger_at("user-1", FilterCategory::Profanity, None, now_ms - i as u64)
                .await;
        }
        for i in 0..overrides {
            let override_type = if i < reveal_always {
                OverrideType::RevealAlways
            } else {
                OverrideType::RevealOnce
            };
            engine
                .record_override_at(
                    "user-1",
                    FilterCategory::Profanity,
                    None,
                    override_type,
                    "session-1",
                    now_ms - i as u64,
                )
                .await;
        }
    }

    #[tokio::test]
    async fn test_proposal_requires_three_overrides() {
        let engine = LearningEngine::new();
        // 2 overrides out of 2 triggers: 100% rate but below the count gate
        seed(&engine, 2, 0, 2, NOW).await;
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_proposal_requires_override_rate() {
        let engine = LearningEngine::new();
        // 3 overrides out of 10 triggers: 30% rate
        seed(&engine, 3, 0, 10, NOW).await;
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_proposal_values_with_reveal_always() {
        let engine = LearningEngine::new();
        // 4 overrides (1 reveal_always) against 5 triggers: rate 80%
        seed(&engine, 4, 1, 5, NOW).await;
        let proposal = engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");

        // 0.5 + 0.15 * 1.5 = 0.725
        assert!((proposal.notification.new_threshold - 0.725).abs() < 1e-9);
        assert!((proposal.notification.old_threshold - 0.5).abs() < 1e-9);
        // 0.5 + (4/10)*0.3 + 0.8*0.2 = 0.78
        assert!((proposal.notification.confidence - 0.78).abs() < 1e-9);
        assert_eq!(proposal.expires_at_ms, NOW + PROPOSAL_TTL_MS);
    }

    #[tokio::test]
    async fn test_proposal_without_reveal_always_uses_base_step() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        let proposal = engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");
        assert!((proposal.notification.new_threshold - 0.65).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_overrides_outside_window_ignored() {
        let engine = LearningEngine::new();
        // All overrides sit 25h in the past
        seed(&engine, 4, 0, 5, NOW - 25 * HOUR_MS).await;
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_proposal_does_not_mutate_preferences() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");
        assert!(engine.learned_preferences("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_accept_commits_preference() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 1, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");

        let outcome = engine
            .process_adjustment_response_at("user-1", FilterCategory::Profanity, None, true, NOW + 1)
            .await;
        let AdjustmentOutcome::Committed(pref) = outcome else {
            panic!("expected commit, got {:?}", outcome);
        };
        assert!((pref.learned_threshold - 0.725).abs() < 1e-9);
        assert_eq!(pref.override_count_at_commit, 4);

        let prefs = engine.learned_preferences("user-1").await;
        assert_eq!(prefs.len(), 1);
        // Pending entry consumed: answering again is a no-op
        assert_eq!(
            engine
                .process_adjustment_response_at(
                    "user-1",
                    FilterCategory::Profanity,
                    None,
                    true,
                    NOW + 2
                )
                .await,
            AdjustmentOutcome::NoProposal
        );
    }

    #[tokio::test]
    async fn test_reject_discards_proposal() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");

        assert_eq!(
            engine
                .process_adjustment_response_at(
                    "user-1",
                    FilterCategory::Profanity,
                    None,
                    false,
                    NOW + 1
                )
                .await,
            AdjustmentOutcome::Rejected
        );
        assert!(engine.learned_preferences("user-1").await.is_empty());
        assert!(engine.pending_adjustments("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_proposal_is_never_applied() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");

        let outcome = engine
            .process_adjustment_response_at(
                "user-1",
                FilterCategory::Profanity,
                None,
                true,
                NOW + PROPOSAL_TTL_MS,
            )
            .await;
        assert_eq!(outcome, AdjustmentOutcome::Expired);
        assert!(engine.learned_preferences("user-1").await.is_empty());
        // The stale entry was discarded as well
        assert!(engine.pending_adjustments("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_response_without_proposal_is_noop() {
        let engine = LearningEngine::new();
        assert_eq!(
            engine
                .process_adjustment_response_at("user-1", FilterCategory::Violence, None, true, NOW)
                .await,
            AdjustmentOutcome::NoProposal
        );
    }

    #[tokio::test]
    async fn test_new_proposal_replaces_prior() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("first proposal");
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW + 1_000)
            .await
            .expect("second proposal");

        let pending = engine.pending_adjustments("user-1").await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].expires_at_ms, NOW + 1_000 + PROPOSAL_TTL_MS);
    }

    #[tokio::test]
    async fn test_commit_builds_on_prior_learned_threshold() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");
        engine
            .process_adjustment_response_at("user-1", FilterCategory::Profanity, None, true, NOW + 1)
            .await;

        // Second round starts from the committed 0.65
        let proposal = engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW + 2)
            .await
            .expect("second proposal");
        assert!((proposal.notification.old_threshold - 0.65).abs() < 1e-9);
        assert!((proposal.notification.new_threshold - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_suggested_threshold_capped() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 1, 5, NOW).await;
        // Drive the learned threshold to the cap through repeated commits
        for round in 0..4 {
            let at = NOW + round * 10;
            if engine
                .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, at)
                .await
                .is_some()
            {
                engine
                    .process_adjustment_response_at(
                        "user-1",
                        FilterCategory::Profanity,
                        None,
                        true,
                        at + 1,
                    )
                    .await;
            }
        }
        let prefs = engine.learned_preferences("user-1").await;
        assert!(prefs[0].learned_threshold <= LEARNED_THRESHOLD_MAX + 1e-9);
    }

    #[tokio::test]
    async fn test_reset_learning_category() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .record_override_at(
                "user-1",
                FilterCategory::Violence,
                None,
                OverrideType::RevealOnce,
                "session-1",
                NOW,
            )
            .await;

        engine
            .reset_learning("user-1", Some(FilterCategory::Profanity), None)
            .await;

        // History for the reset category is gone
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .is_none());
        // Other categories keep their records
        let status = engine.learning_status("user-1").await;
        assert!(status.is_empty() || status.iter().all(|s| s.category == FilterCategory::Violence));
    }

    #[tokio::test]
    async fn test_reset_learning_all() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");
        engine
            .process_adjustment_response_at("user-1", FilterCategory::Profanity, None, true, NOW + 1)
            .await;

        engine.reset_learning("user-1", None, None).await;
        assert!(engine.learned_preferences("user-1").await.is_empty());
        assert!(engine.pending_adjustments("user-1").await.is_empty());
        assert!(engine.learning_status("user-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_subcategory_keys_are_independent() {
        let engine = LearningEngine::new();
        for i in 0..4u64 {
            engine
                .record_trigger_at("user-1", FilterCategory::Profanity, Some("slurs"), NOW - i)
                .await;
            engine
                .record_override_at(
                    "user-1",
                    FilterCategory::Profanity,
                    Some("slurs"),
                    OverrideType::RevealOnce,
                    "session-1",
                    NOW - i,
                )
                .await;
        }

        // Subcategory-scoped check sees only its own records
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, Some("mild"), NOW)
            .await
            .is_none());
        assert!(engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, Some("slurs"), NOW)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_learning_status_states() {
        let engine = LearningEngine::new();
        seed(&engine, 4, 0, 5, NOW).await;
        let status = engine.learning_status("user-1").await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, LearningState::Learning);

        engine
            .check_for_adjustment_at("user-1", FilterCategory::Profanity, None, NOW)
            .await
            .expect("proposal");
        engine
            .process_adjustment_response_at("user-1", FilterCategory::Profanity, None, true, NOW + 1)
            .await;

        let status = engine.learning_status("user-1").await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, LearningState::Adjusted);
    }
}
