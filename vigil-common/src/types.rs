//! Core domain types for the Vigil filtering pipeline
//!
//! Shared between the decision engine, scheduler, learning engine and the
//! HTTP boundary. All wire-facing types serialize with snake_case names.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Content categories a detection can be classified into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCategory {
    Profanity,
    Violence,
    Sexual,
    Jumpscares,
    Flashing,
    Spoilers,
    LoudAudio,
    HateSpeech,
}

impl FilterCategory {
    /// All categories, in display order
    pub const ALL: [FilterCategory; 8] = [
        FilterCategory::Profanity,
        FilterCategory::Violence,
        FilterCategory::Sexual,
        FilterCategory::Jumpscares,
        FilterCategory::Flashing,
        FilterCategory::Spoilers,
        FilterCategory::LoudAudio,
        FilterCategory::HateSpeech,
    ];

    /// Wire name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCategory::Profanity => "profanity",
            FilterCategory::Violence => "violence",
            FilterCategory::Sexual => "sexual",
            FilterCategory::Jumpscares => "jumpscares",
            FilterCategory::Flashing => "flashing",
            FilterCategory::Spoilers => "spoilers",
            FilterCategory::LoudAudio => "loud_audio",
            FilterCategory::HateSpeech => "hate_speech",
        }
    }
}

impl std::str::FromStr for FilterCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FilterCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown filter category: {}", s)))
    }
}

impl std::fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggressiveness level of a filter category
///
/// The level drives the default detection threshold and the intensity of the
/// emitted suppression instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLevel {
    Off,
    Low,
    Medium,
    High,
    Maximum,
}

impl FilterLevel {
    /// Ordinal index (off = 0 .. maximum = 4)
    pub fn index(&self) -> u8 {
        match self {
            FilterLevel::Off => 0,
            FilterLevel::Low => 1,
            FilterLevel::Medium => 2,
            FilterLevel::High => 3,
            FilterLevel::Maximum => 4,
        }
    }

    /// Default confidence threshold for this level
    ///
    /// Lower threshold means more aggressive suppression; `Off` can never
    /// trigger regardless of the value here.
    pub fn default_threshold(&self) -> f64 {
        match self {
            FilterLevel::Off => 1.0,
            FilterLevel::Low => 0.9,
            FilterLevel::Medium => 0.7,
            FilterLevel::High => 0.5,
            FilterLevel::Maximum => 0.3,
        }
    }
}

/// Media modality of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Visual,
    Audio,
}

/// Concrete suppression action carried by a filter instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    // Visual actions
    Blur,
    BlackBox,
    Pixelate,
    Dim,
    // Audio actions
    Bleep,
    Silence,
    Muffle,
    Normalize,
}

/// Spatial region of a visual detection, in source pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A single classified occurrence in the analyzed media
///
/// Immutable once created; produced by the detection source and consumed by
/// the decision engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: Uuid,
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Classifier confidence, 0.0 - 1.0
    pub confidence: f64,
    /// Position of the occurrence on the stream timeline (ms)
    pub origin_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    pub modality: Modality,
}

impl Detection {
    /// Validate invariants before the detection enters the pipeline
    ///
    /// A malformed detection is dropped and logged by the caller; it never
    /// halts the stream.
    pub fn validate(&self) -> Result<()> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::InvalidInput(format!(
                "detection {} has confidence {} outside [0,1]",
                self.id, self.confidence
            )));
        }
        if let Some(region) = &self.region {
            if region.width <= 0.0 || region.height <= 0.0 {
                return Err(Error::InvalidInput(format!(
                    "detection {} has an empty region",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Per-subcategory override inside a filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryRule {
    pub enabled: bool,
    pub threshold: f64,
}

/// User-facing configuration of one filter category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub category: FilterCategory,
    pub level: FilterLevel,
    /// Base confidence threshold, 0.0 - 1.0
    pub threshold: f64,
    pub visual_action: FilterAction,
    pub audio_action: FilterAction,
    /// Optional per-subcategory overrides, keyed by subcategory name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subcategories: BTreeMap<String, SubcategoryRule>,
}

impl FilterConfig {
    /// Category default: given level, level-default threshold, and the
    /// category's customary actions
    pub fn for_category(category: FilterCategory, level: FilterLevel) -> Self {
        let (visual_action, audio_action) = match category {
            FilterCategory::Flashing => (FilterAction::Dim, FilterAction::Silence),
            FilterCategory::Jumpscares => (FilterAction::Dim, FilterAction::Muffle),
            FilterCategory::LoudAudio => (FilterAction::Dim, FilterAction::Normalize),
            _ => (FilterAction::Blur, FilterAction::Bleep),
        };
        Self {
            category,
            level,
            threshold: level.default_threshold(),
            visual_action,
            audio_action,
            subcategories: BTreeMap::new(),
        }
    }
}

/// Built-in filter profile presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePreset {
    Gaming,
    FamilyFriendly,
    MaximumSafety,
}

impl ProfilePreset {
    /// Per-category level assignments of this preset
    pub fn filters(&self) -> Vec<FilterConfig> {
        use FilterCategory::*;
        use FilterLevel::*;
        let level_for = |category: FilterCategory| match self {
            ProfilePreset::Gaming => match category {
                Profanity | Sexual | LoudAudio => Medium,
                Violence => Low,
                Jumpscares | Flashing | HateSpeech => High,
                Spoilers => Off,
            },
            ProfilePreset::FamilyFriendly => match category {
                Profanity | Violence | Sexual | HateSpeech => Maximum,
                Jumpscares => High,
                Flashing | LoudAudio => Medium,
                Spoilers => Off,
            },
            ProfilePreset::MaximumSafety => Maximum,
        };
        FilterCategory::ALL
            .into_iter()
            .map(|c| FilterConfig::for_category(c, level_for(c)))
            .collect()
    }
}

/// Default filter set for a user with no stored profile: medium everywhere
pub fn default_filters() -> Vec<FilterConfig> {
    FilterCategory::ALL
        .into_iter()
        .map(|c| FilterConfig::for_category(c, FilterLevel::Medium))
        .collect()
}

/// A named, per-user set of filter configurations
///
/// Exactly one profile is active per user at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: String,
    pub profile_name: String,
    pub is_default: bool,
    pub filters: Vec<FilterConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// New profile with the default filter set
    pub fn new(user_id: impl Into<String>, profile_name: impl Into<String>) -> Self {
        let now = crate::time::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            profile_name: profile_name.into(),
            is_default: true,
            filters: default_filters(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lower bound for a committed learned threshold
pub const LEARNED_THRESHOLD_MIN: f64 = 0.1;
/// Upper bound for a committed learned threshold
pub const LEARNED_THRESHOLD_MAX: f64 = 0.95;

/// A committed, per-user threshold adjustment derived from override history
///
/// Keyed by (user, category, subcategory); mutated only when a pending
/// adjustment is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPreference {
    pub user_id: String,
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    /// Effective threshold, clamped to [0.1, 0.95]
    pub learned_threshold: f64,
    pub confidence: f64,
    /// Override count observed for the key at commit time
    pub override_count_at_commit: u32,
    pub updated_at: DateTime<Utc>,
}

/// A proposed but unconfirmed threshold change awaiting user response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAdjustment {
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub suggested_threshold: f64,
    pub confidence: f64,
    pub expires_at_ms: u64,
}

impl PendingAdjustment {
    /// Whether the proposal's TTL has elapsed at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Kind of user override on a suppressed (or about-to-be-suppressed) item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    RevealOnce,
    RevealAlways,
    RevealHold,
}

/// One recorded user override, retained on a 7-day sliding window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub override_type: OverrideType,
    pub timestamp_ms: u64,
    pub session_id: String,
}

/// One emitted filter instruction, logged per user
///
/// The 24h count of these is the denominator of the override rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub timestamp_ms: u64,
}

/// Directive to suppress content for a bounded time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInstruction {
    pub detection_id: Uuid,
    pub action: FilterAction,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    /// Suppression intensity, 0.0 - 1.0 (level index / 4)
    pub intensity: f64,
}

/// Notification of a proposed or committed threshold change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentNotification {
    pub category: FilterCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub old_threshold: f64,
    pub new_threshold: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Whitelisted value a streamer has approved for display
///
/// Values are stored hashed; Vigil never persists the cleartext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub id: Uuid,
    pub user_id: String,
    pub label: String,
    pub value_hash: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Coarse risk classification of a detection window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}
