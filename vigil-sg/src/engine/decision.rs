//! Filter decision engine
//!
//! Pure mapping from one detection, the user's active filter configuration,
//! and the user's learned preferences to zero-or-one suppression
//! instruction. Deterministic, no side effects; all state is passed in.

use vigil_common::types::{
    Detection, FilterCategory, FilterConfig, FilterInstruction, FilterLevel, LearnedPreference,
    Modality,
};

/// Suppression window applied when the detection carries no duration (ms)
const DEFAULT_WINDOW_MS: u64 = 1_000;

/// Tension level below which no bias is applied
const TENSION_FLOOR: f64 = 0.5;
/// Lowest threshold the tension bias may push a category to
const TENSION_THRESHOLD_MIN: f64 = 0.2;

/// Decide whether a detection triggers suppression
///
/// Emits an instruction iff the detection's confidence is at or above the
/// effective threshold for its category; equality counts as a pass. A
/// category configured `off` never triggers.
pub fn decide(
    detection: &Detection,
    configs: &[FilterConfig],
    learned: &[LearnedPreference],
) -> Option<FilterInstruction> {
    let config = configs.iter().find(|c| c.category == detection.category)?;
    if config.level == FilterLevel::Off {
        return None;
    }

    let threshold = effective_threshold(config, detection, learned);
    if detection.confidence < threshold {
        return None;
    }

    let action = match detection.modality {
        Modality::Visual => config.visual_action,
        Modality::Audio => config.audio_action,
    };

    Some(FilterInstruction {
        detection_id: detection.id,
        action,
        start_ms: detection.origin_ms,
        end_ms: detection.origin_ms + detection.duration_ms.unwrap_or(DEFAULT_WINDOW_MS),
        region: detection.region,
        intensity: f64::from(config.level.index()) / 4.0,
    })
}

/// Effective threshold for a detection under a category configuration
///
/// Starts from the configured threshold; a matching learned preference
/// overrides it; an enabled subcategory rule matching the detection's
/// subcategory tightens it to the lower of the two.
pub fn effective_threshold(
    config: &FilterConfig,
    detection: &Detection,
    learned: &[LearnedPreference],
) -> f64 {
    let mut threshold = config.threshold;

    if let Some(pref) = learned.iter().find(|lp| {
        lp.category == detection.category
            && (detection.subcategory.is_none() || lp.subcategory == detection.subcategory)
    }) {
        threshold = pref.learned_threshold;
    }

    if let Some(sub) = &detection.subcategory {
        if let Some(rule) = config.subcategories.get(sub) {
            if rule.enabled {
                threshold = threshold.min(rule.threshold);
            }
        }
    }

    threshold
}

/// Bias volatile categories while carried-over audio tension is high
///
/// Profanity and hate-speech thresholds are lowered (more aggressive) in
/// proportion to the tension level; other categories are untouched. Below
/// the tension floor the configuration passes through unchanged.
pub fn adjust_for_tension(configs: &mut [FilterConfig], tension: f64) {
    if tension < TENSION_FLOOR {
        return;
    }
    let adjustment = 1.0 + tension * 0.3;
    for config in configs.iter_mut() {
        if matches!(
            config.category,
            FilterCategory::Profanity | FilterCategory::HateSpeech
        ) {
            config.threshold = (config.threshold / adjustment).max(TENSION_THRESHOLD_MIN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use vigil_common::types::{FilterAction, Region, SubcategoryRule};

    fn detection(category: FilterCategory, confidence: f64) -> Detection {
        Detection {
            id: Uuid::new_v4(),
            category,
            subcategory: None,
            confidence,
            origin_ms: 10_000,
            duration_ms: Some(2_000),
            region: None,
            modality: Modality::Visual,
        }
    }

    fn config(category: FilterCategory, level: FilterLevel, threshold: f64) -> FilterConfig {
        let mut config = FilterConfig::for_category(category, level);
        config.threshold = threshold;
        config
    }

    fn learned(
        category: FilterCategory,
        subcategory: Option<&str>,
        threshold: f64,
    ) -> LearnedPreference {
        LearnedPreference {
            user_id: "user-1".to_string(),
            category,
            subcategory: subcategory.map(String::from),
            learned_threshold: threshold,
            confidence: 0.8,
            override_count_at_commit: 4,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_confidence_above_threshold_triggers() {
        let configs = vec![config(FilterCategory::Violence, FilterLevel::Medium, 0.7)];
        let instruction = decide(&detection(FilterCategory::Violence, 0.75), &configs, &[]);
        assert!(instruction.is_some());
    }

    #[test]
    fn test_confidence_below_threshold_drops() {
        let configs = vec![config(FilterCategory::Violence, FilterLevel::Medium, 0.7)];
        assert!(decide(&detection(FilterCategory::Violence, 0.65), &configs, &[]).is_none());
    }

    #[test]
    fn test_equality_counts_as_pass() {
        let configs = vec![config(FilterCategory::Violence, FilterLevel::Medium, 0.7)];
        assert!(decide(&detection(FilterCategory::Violence, 0.7), &configs, &[]).is_some());
    }

    #[test]
    fn test_level_off_never_triggers() {
        let configs = vec![config(FilterCategory::Spoilers, FilterLevel::Off, 0.1)];
        assert!(decide(&detection(FilterCategory::Spoilers, 1.0), &configs, &[]).is_none());
    }

    #[test]
    fn test_unconfigured_category_drops() {
        let configs = vec![config(FilterCategory::Violence, FilterLevel::Medium, 0.7)];
        assert!(decide(&detection(FilterCategory::Profanity, 1.0), &configs, &[]).is_none());
    }

    #[test]
    fn test_learned_preference_overrides_threshold() {
        let configs = vec![config(FilterCategory::Profanity, FilterLevel::Medium, 0.7)];
        let prefs = vec![learned(FilterCategory::Profanity, None, 0.9)];

        // 0.75 passes the configured 0.7 but not the learned 0.9
        let d = detection(FilterCategory::Profanity, 0.75);
        assert!(decide(&d, &configs, &[]).is_some());
        assert!(decide(&d, &configs, &prefs).is_none());
    }

    #[test]
    fn test_learned_preference_requires_subcategory_match() {
        let configs = vec![config(FilterCategory::Profanity, FilterLevel::Medium, 0.7)];
        let prefs = vec![learned(FilterCategory::Profanity, Some("mild"), 0.9)];

        let mut d = detection(FilterCategory::Profanity, 0.75);
        d.subcategory = Some("severe".to_string());
        // Learned preference for a different subcategory does not apply
        assert_eq!(effective_threshold(&configs[0], &d, &prefs), 0.7);

        d.subcategory = Some("mild".to_string());
        assert_eq!(effective_threshold(&configs[0], &d, &prefs), 0.9);
    }

    #[test]
    fn test_subcategory_rule_tightens_threshold() {
        let mut cfg = config(FilterCategory::Violence, FilterLevel::Medium, 0.7);
        cfg.subcategories.insert(
            "gore".to_string(),
            SubcategoryRule {
                enabled: true,
                threshold: 0.4,
            },
        );

        let mut d = detection(FilterCategory::Violence, 0.5);
        d.subcategory = Some("gore".to_string());
        assert!(decide(&d, &[cfg.clone()], &[]).is_some());

        // Disabled rule leaves the base threshold in force
        cfg.subcategories.get_mut("gore").unwrap().enabled = false;
        assert!(decide(&d, &[cfg], &[]).is_none());
    }

    #[test]
    fn test_subcategory_rule_never_loosens() {
        let mut cfg = config(FilterCategory::Violence, FilterLevel::High, 0.5);
        cfg.subcategories.insert(
            "cartoon".to_string(),
            SubcategoryRule {
                enabled: true,
                threshold: 0.8,
            },
        );

        let mut d = detection(FilterCategory::Violence, 0.6);
        d.subcategory = Some("cartoon".to_string());
        // min(0.5, 0.8) keeps the tighter base threshold
        assert_eq!(effective_threshold(&cfg, &d, &[]), 0.5);
    }

    #[test]
    fn test_instruction_fields() {
        let mut cfg = config(FilterCategory::Sexual, FilterLevel::High, 0.5);
        cfg.visual_action = FilterAction::Pixelate;
        cfg.audio_action = FilterAction::Silence;

        let mut d = detection(FilterCategory::Sexual, 0.9);
        d.region = Some(Region {
            x: 10.0,
            y: 20.0,
            width: 100.0,
            height: 50.0,
        });

        let instruction = decide(&d, &[cfg.clone()], &[]).unwrap();
        assert_eq!(instruction.detection_id, d.id);
        assert_eq!(instruction.action, FilterAction::Pixelate);
        assert_eq!(instruction.start_ms, 10_000);
        assert_eq!(instruction.end_ms, 12_000);
        assert_eq!(instruction.region, d.region);
        // high = index 3 of 4
        assert!((instruction.intensity - 0.75).abs() < 1e-9);

        d.modality = Modality::Audio;
        let instruction = decide(&d, &[cfg], &[]).unwrap();
        assert_eq!(instruction.action, FilterAction::Silence);
    }

    #[test]
    fn test_tension_bias_tightens_volatile_categories() {
        let mut configs = vec![
            config(FilterCategory::Profanity, FilterLevel::Medium, 0.7),
            config(FilterCategory::Violence, FilterLevel::Medium, 0.7),
        ];

        // Below the floor: untouched
        adjust_for_tension(&mut configs, 0.4);
        assert_eq!(configs[0].threshold, 0.7);

        adjust_for_tension(&mut configs, 0.8);
        // 0.7 / (1 + 0.8 * 0.3) ≈ 0.5645
        assert!((configs[0].threshold - 0.7 / 1.24).abs() < 1e-9);
        // Non-volatile categories are untouched
        assert_eq!(configs[1].threshold, 0.7);
    }

    #[test]
    fn test_tension_bias_has_a_floor() {
        let mut configs = vec![config(FilterCategory::HateSpeech, FilterLevel::Maximum, 0.21)];
        adjust_for_tension(&mut configs, 1.0);
        assert_eq!(configs[0].threshold, 0.2);
    }

    #[test]
    fn test_default_window_applied_without_duration() {
        let configs = vec![config(FilterCategory::Violence, FilterLevel::Medium, 0.7)];
        let mut d = detection(FilterCategory::Violence, 0.8);
        d.duration_ms = None;
        let instruction = decide(&d, &configs, &[]).unwrap();
        assert_eq!(instruction.end_ms - instruction.start_ms, 1_000);
    }
}
