//! Score aggregation and success criteria.
//!
//! Evaluators produce raw 0..1 scores; this module folds them into a
//! [`ScoreCard`], a weighted 0..10 total, and a boolean success verdict.
//! Weights come from a base table that scenarios may override per metric;
//! a weight at or below zero removes the metric from both the numerator
//! and the denominator, so disabled metrics never dilute the total.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::scenario::ScenarioConfig;

/// Every ScoreCard carries exactly these evaluators (plus any extras a
/// scenario defines). Missing evaluators score 0.
pub const EVALUATOR_KEYS: [&str; 5] = [
    "install_success",
    "tests_nonregression",
    "dependency_targets",
    "llm_judge",
    "heuristic_checks",
];

/// Minimum success metric for a run to count as successful.
pub const SUCCESS_THRESHOLD: f64 = 0.7;

/// Default weight for an evaluator. The code-based gates carry no weight
/// by default: they act through the success verdict, not the score.
pub fn base_weight(key: &str) -> f64 {
    match key {
        "llm_judge" => 6.0,
        "heuristic_checks" => 4.0,
        _ => 0.0,
    }
}

/// Evaluator name → 0..1 score, with the full key set always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreCard(BTreeMap<String, f64>);

impl ScoreCard {
    /// Builds a card from raw evaluator output. Every known key is filled
    /// (missing ones as 0) and scores are clamped to 0..1.
    pub fn from_scores(scores: &HashMap<String, f64>) -> Self {
        let mut card = BTreeMap::new();
        for key in EVALUATOR_KEYS {
            card.insert(key.to_string(), 0.0);
        }
        for (key, score) in scores {
            card.insert(key.clone(), score.clamp(0.0, 1.0));
        }
        Self(card)
    }

    pub fn empty() -> Self {
        Self::from_scores(&HashMap::new())
    }

    /// Score for one evaluator; unknown names read as 0.
    pub fn get(&self, key: &str) -> f64 {
        self.0.get(key).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Weighted 0..10 total for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedTotals {
    pub weighted: f64,
    pub max: f64,
}

/// One validation or install command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandLogEntry {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandLogEntry {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Success verdict plus the metric it was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessReport {
    pub is_successful: bool,
    pub success_metric: f64,
}

/// Folds a score card into a weighted 0..10 total.
///
/// Scenario weight overrides take priority over [`base_weight`]. Metrics
/// weighted at or below zero are skipped entirely; if nothing carries a
/// positive weight the total is 0.
pub fn compute_weighted_totals(card: &ScoreCard, config: &ScenarioConfig) -> WeightedTotals {
    let mut achieved = 0.0;
    let mut total_weight = 0.0;

    for (key, score) in card.iter() {
        let weight = config
            .weights
            .get(key)
            .copied()
            .unwrap_or_else(|| base_weight(key));
        if weight <= 0.0 {
            continue;
        }
        achieved += score * weight;
        total_weight += weight;
    }

    let weighted = if total_weight > 0.0 {
        round4((achieved / total_weight) * 10.0).min(10.0)
    } else {
        0.0
    };

    WeightedTotals {
        weighted,
        max: 10.0,
    }
}

/// Decides whether a run succeeded.
///
/// Both conditions must hold: every install command in the log exited
/// zero, and the success metric reaches [`SUCCESS_THRESHOLD`]. The metric
/// averages the judge and heuristic scores when both are nonzero and
/// takes whichever is present otherwise; scenarios rarely configure both.
pub fn calculate_success(log: &[CommandLogEntry], card: &ScoreCard) -> SuccessReport {
    let install_ok = log
        .iter()
        .filter(|entry| is_install_command(&entry.command))
        .all(CommandLogEntry::succeeded);

    let judge = card.get("llm_judge");
    let heuristic = card.get("heuristic_checks");
    let success_metric = if judge > 0.0 && heuristic > 0.0 {
        round4((judge + heuristic) / 2.0)
    } else if judge > 0.0 {
        judge
    } else {
        heuristic
    };

    SuccessReport {
        is_successful: install_ok && success_metric >= SUCCESS_THRESHOLD,
        success_metric,
    }
}

/// The install command is the minimal critical-command set: a workspace
/// whose dependencies do not install cannot be meaningfully evaluated.
fn is_install_command(command: &str) -> bool {
    command.contains("install")
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(entries: &[(&str, f64)]) -> ScoreCard {
        let scores: HashMap<String, f64> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        ScoreCard::from_scores(&scores)
    }

    fn log_entry(command: &str, exit_code: i32) -> CommandLogEntry {
        CommandLogEntry {
            command: command.to_string(),
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 10,
        }
    }

    #[test]
    fn test_card_always_has_full_key_set() {
        let card = card(&[("llm_judge", 0.9)]);
        for key in EVALUATOR_KEYS {
            assert!(card.iter().any(|(k, _)| k == key), "missing {}", key);
        }
        assert_eq!(card.get("llm_judge"), 0.9);
        assert_eq!(card.get("heuristic_checks"), 0.0);
    }

    #[test]
    fn test_card_clamps_out_of_range_scores() {
        let card = card(&[("llm_judge", 1.7), ("heuristic_checks", -0.2)]);
        assert_eq!(card.get("llm_judge"), 1.0);
        assert_eq!(card.get("heuristic_checks"), 0.0);
    }

    #[test]
    fn test_weighted_total_with_default_weights() {
        let card = card(&[("llm_judge", 0.8), ("heuristic_checks", 0.5)]);
        let totals = compute_weighted_totals(&card, &ScenarioConfig::default());
        // (0.8 * 6 + 0.5 * 4) / 10 * 10
        assert_eq!(totals.weighted, 6.8);
        assert_eq!(totals.max, 10.0);
    }

    #[test]
    fn test_scenario_override_excludes_zero_weight_from_denominator() {
        let card = card(&[("llm_judge", 0.9), ("heuristic_checks", 0.5)]);
        let mut config = ScenarioConfig::default();
        config.weights.insert("llm_judge".to_string(), 0.0);
        config.weights.insert("heuristic_checks".to_string(), 2.0);

        let totals = compute_weighted_totals(&card, &config);
        // Judge is disabled entirely; only heuristics count.
        assert_eq!(totals.weighted, 5.0);
    }

    #[test]
    fn test_no_positive_weight_scores_zero() {
        let card = card(&[("llm_judge", 1.0)]);
        let mut config = ScenarioConfig::default();
        for key in EVALUATOR_KEYS {
            config.weights.insert(key.to_string(), 0.0);
        }
        assert_eq!(compute_weighted_totals(&card, &config).weighted, 0.0);
    }

    #[test]
    fn test_weighted_total_rounds_to_four_decimals() {
        let card = card(&[("llm_judge", 1.0), ("heuristic_checks", 0.5)]);
        let mut config = ScenarioConfig::default();
        config.weights.insert("llm_judge".to_string(), 1.0);
        config.weights.insert("heuristic_checks".to_string(), 2.0);

        // (1.0 + 1.0) / 3 * 10 = 6.666...
        let totals = compute_weighted_totals(&card, &config);
        assert_eq!(totals.weighted, 6.6667);
    }

    #[test]
    fn test_success_requires_install_exit_zero() {
        let card = card(&[("llm_judge", 1.0)]);
        let log = vec![
            log_entry("npm install", 1),
            log_entry("npm test", 0),
        ];
        let report = calculate_success(&log, &card);
        assert!(!report.is_successful);
        assert_eq!(report.success_metric, 1.0);
    }

    #[test]
    fn test_success_metric_averages_both_signals() {
        let card = card(&[("llm_judge", 0.8), ("heuristic_checks", 0.6)]);
        let report = calculate_success(&[], &card);
        assert_eq!(report.success_metric, 0.7);
        assert!(report.is_successful);
    }

    #[test]
    fn test_success_metric_uses_single_present_signal() {
        let judge_only = calculate_success(&[], &card(&[("llm_judge", 0.9)]));
        assert_eq!(judge_only.success_metric, 0.9);

        let heuristic_only = calculate_success(&[], &card(&[("heuristic_checks", 0.4)]));
        assert_eq!(heuristic_only.success_metric, 0.4);
        assert!(!heuristic_only.is_successful);

        let neither = calculate_success(&[], &ScoreCard::empty());
        assert_eq!(neither.success_metric, 0.0);
        assert!(!neither.is_successful);
    }

    #[test]
    fn test_non_install_failures_do_not_gate_success() {
        let card = card(&[("llm_judge", 0.8)]);
        let log = vec![
            log_entry("npm install", 0),
            log_entry("npm run lint", 2),
        ];
        assert!(calculate_success(&log, &card).is_successful);
    }
}
