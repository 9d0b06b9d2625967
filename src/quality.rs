//! Per-file quality resolution.
//!
//! Every run has a default quality per output format. [`QualityRule`]s
//! override it for files matching their criteria:
//!
//! | Criterion | Matched against |
//! |---|---|
//! | `pattern` | file name, as a [globset](https://docs.rs/globset) glob |
//! | `directory` | directory relative to the input root, by path prefix |
//! | `min_width` | probed pixel width, inclusive lower bound |
//! | `max_width` | probed pixel width, inclusive upper bound |
//!
//! A rule matches only when every criterion it declares holds. Among matching
//! rules the one declaring the most criteria (its *specificity*) wins, so
//! `pattern + directory` beats `pattern` alone wherever they appear in the
//! file. Declaration order only breaks ties: the later rule wins.
//!
//! The winner's entries replace the defaults format by format; formats the
//! rule does not mention keep their default.

use crate::imaging::OutputFormat;
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Format → quality (1–100).
pub type QualityMap = BTreeMap<OutputFormat, u32>;

/// A quality override and the criteria a file must meet for it to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub quality: QualityMap,
}

impl QualityRule {
    /// Number of declared criteria.
    pub fn specificity(&self) -> usize {
        [
            self.pattern.is_some(),
            self.directory.is_some(),
            self.min_width.is_some(),
            self.max_width.is_some(),
        ]
        .into_iter()
        .filter(|declared| *declared)
        .count()
    }

    pub fn needs_width(&self) -> bool {
        self.min_width.is_some() || self.max_width.is_some()
    }

    /// Human-readable list of declared criteria, for trace output.
    pub fn criteria(&self) -> String {
        let mut parts = Vec::new();
        if let Some(p) = &self.pattern {
            parts.push(format!("pattern={p}"));
        }
        if let Some(d) = &self.directory {
            parts.push(format!("directory={d}"));
        }
        if let Some(w) = self.min_width {
            parts.push(format!("min_width={w}"));
        }
        if let Some(w) = self.max_width {
            parts.push(format!("max_width={w}"));
        }
        parts.join(", ")
    }
}

struct CompiledRule {
    rule: QualityRule,
    glob: Option<GlobMatcher>,
}

impl CompiledRule {
    fn matches(&self, file_name: &str, relative_dir: &str, width: Option<u32>) -> bool {
        if self.rule.specificity() == 0 {
            return false;
        }
        if let Some(glob) = &self.glob
            && !glob.is_match(file_name)
        {
            return false;
        }
        if let Some(dir) = &self.rule.directory
            && !dir_has_prefix(relative_dir, dir)
        {
            return false;
        }
        if let Some(min) = self.rule.min_width
            && !width.is_some_and(|w| w >= min)
        {
            return false;
        }
        if let Some(max) = self.rule.max_width
            && !width.is_some_and(|w| w <= max)
        {
            return false;
        }
        true
    }
}

/// `marketing` matches `marketing` and `marketing/banners`, not `marketing-old`.
fn dir_has_prefix(relative_dir: &str, prefix: &str) -> bool {
    let dir = relative_dir.trim_matches('/');
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    dir == prefix
        || dir
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Rules with their globs compiled, built once per run.
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    pub fn new(rules: &[QualityRule]) -> Result<Self, globset::Error> {
        let rules = rules
            .iter()
            .map(|rule| {
                let glob = match &rule.pattern {
                    Some(p) => Some(Glob::new(p)?.compile_matcher()),
                    None => None,
                };
                Ok(CompiledRule {
                    rule: rule.clone(),
                    glob,
                })
            })
            .collect::<Result<Vec<_>, globset::Error>>()?;
        Ok(Self { rules })
    }

    /// Whether any rule needs the probed width (so callers can skip probing).
    pub fn needs_width(&self) -> bool {
        self.rules.iter().any(|c| c.rule.needs_width())
    }

    /// The most specific matching rule; later rules win ties.
    pub fn winner(
        &self,
        file_name: &str,
        relative_dir: &str,
        width: Option<u32>,
    ) -> Option<&QualityRule> {
        let mut best: Option<&QualityRule> = None;
        for compiled in &self.rules {
            if !compiled.matches(file_name, relative_dir, width) {
                continue;
            }
            let beats = best.is_none_or(|b| compiled.rule.specificity() >= b.specificity());
            if beats {
                best = Some(&compiled.rule);
            }
        }
        best
    }

    /// Effective quality for one file.
    pub fn resolve(
        &self,
        file_name: &str,
        relative_dir: &str,
        width: Option<u32>,
        defaults: &QualityMap,
    ) -> QualityMap {
        let Some(rule) = self.winner(file_name, relative_dir, width) else {
            tracing::trace!(file = file_name, "no quality rule matched");
            return defaults.clone();
        };
        let mut resolved = defaults.clone();
        resolved.extend(rule.quality.iter().map(|(f, q)| (*f, *q)));
        tracing::debug!(
            file = file_name,
            criteria = %rule.criteria(),
            quality = ?resolved,
            "quality rule applied"
        );
        resolved
    }
}

/// One-shot form of [`CompiledRules::resolve`].
pub fn resolve(
    file_name: &str,
    relative_dir: &str,
    width: Option<u32>,
    defaults: &QualityMap,
    rules: &[QualityRule],
) -> Result<QualityMap, globset::Error> {
    Ok(CompiledRules::new(rules)?.resolve(file_name, relative_dir, width, defaults))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webp(q: u32) -> QualityMap {
        QualityMap::from([(OutputFormat::Webp, q)])
    }

    fn pattern_rule(pattern: &str, q: u32) -> QualityRule {
        QualityRule {
            pattern: Some(pattern.into()),
            quality: webp(q),
            ..QualityRule::default()
        }
    }

    fn pattern_dir_rule(pattern: &str, dir: &str, q: u32) -> QualityRule {
        QualityRule {
            pattern: Some(pattern.into()),
            directory: Some(dir.into()),
            quality: webp(q),
            ..QualityRule::default()
        }
    }

    fn width_rule(min: Option<u32>, max: Option<u32>, q: u32) -> QualityRule {
        QualityRule {
            min_width: min,
            max_width: max,
            quality: webp(q),
            ..QualityRule::default()
        }
    }

    fn webp_of(map: &QualityMap) -> u32 {
        map[&OutputFormat::Webp]
    }

    // =========================================================================
    // Matching
    // =========================================================================

    #[test]
    fn hero_pattern_overrides_default() {
        let rules = vec![pattern_rule("*-hero.*", 95)];
        let q = resolve("banner-hero.png", "", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 95);
    }

    #[test]
    fn no_match_returns_default_unchanged() {
        let defaults = QualityMap::from([(OutputFormat::Webp, 70), (OutputFormat::Avif, 50)]);
        let rules = vec![pattern_rule("*-hero.*", 95)];
        let q = resolve("banner.png", "", None, &defaults, &rules).unwrap();
        assert_eq!(q, defaults);
    }

    #[test]
    fn empty_rule_quality_keeps_default() {
        let rules = vec![QualityRule {
            pattern: Some("*.png".into()),
            ..QualityRule::default()
        }];
        let q = resolve("a.png", "", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 70);
    }

    #[test]
    fn unmentioned_formats_keep_default() {
        let defaults = QualityMap::from([(OutputFormat::Webp, 70), (OutputFormat::Avif, 50)]);
        let rules = vec![pattern_rule("*.png", 95)];
        let q = resolve("a.png", "", None, &defaults, &rules).unwrap();
        assert_eq!(q[&OutputFormat::Webp], 95);
        assert_eq!(q[&OutputFormat::Avif], 50);
    }

    #[test]
    fn rule_without_criteria_never_matches() {
        let rules = vec![QualityRule {
            quality: webp(10),
            ..QualityRule::default()
        }];
        let q = resolve("a.png", "", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 70);
    }

    #[test]
    fn directory_prefix_respects_segment_boundary() {
        assert!(dir_has_prefix("marketing", "marketing"));
        assert!(dir_has_prefix("marketing/banners", "marketing/"));
        assert!(dir_has_prefix("marketing/banners", "marketing"));
        assert!(!dir_has_prefix("marketing-old", "marketing"));
        assert!(!dir_has_prefix("", "marketing"));
    }

    #[test]
    fn width_rule_needs_probed_width() {
        let rules = vec![width_rule(Some(2000), None, 40)];
        let q = resolve("a.png", "", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 70);
        let q = resolve("a.png", "", Some(2400), &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 40);
        let q = resolve("a.png", "", Some(1999), &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 70);
    }

    #[test]
    fn width_bounds_are_inclusive() {
        let rules = vec![width_rule(Some(800), Some(1600), 55)];
        for w in [800, 1200, 1600] {
            let q = resolve("a.png", "", Some(w), &webp(70), &rules).unwrap();
            assert_eq!(webp_of(&q), 55, "width {w}");
        }
        let q = resolve("a.png", "", Some(1601), &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 70);
    }

    // =========================================================================
    // Specificity
    // =========================================================================

    #[test]
    fn pattern_and_directory_beat_pattern_alone() {
        let specific = pattern_dir_rule("*-hero.*", "marketing/", 95);
        let general = pattern_rule("*-hero.*", 85);

        let rules = vec![specific.clone(), general.clone()];
        let q = resolve("banner-hero.png", "marketing", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 95);

        // Declaration order does not matter.
        let rules = vec![general, specific];
        let q = resolve("banner-hero.png", "marketing", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 95);
    }

    #[test]
    fn general_rule_applies_outside_directory() {
        let rules = vec![
            pattern_dir_rule("*-hero.*", "marketing/", 95),
            pattern_rule("*-hero.*", 85),
        ];
        let q = resolve("banner-hero.png", "blog", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 85);
    }

    #[test]
    fn equal_specificity_last_declared_wins() {
        let rules = vec![pattern_rule("*.png", 60), pattern_rule("banner*", 65)];
        let q = resolve("banner.png", "", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 65);
    }

    #[test]
    fn size_only_rules_tie_last_wins() {
        let rules = vec![
            width_rule(Some(1000), None, 50),
            width_rule(None, Some(5000), 45),
        ];
        let q = resolve("a.png", "", Some(3000), &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 45);
    }

    #[test]
    fn earlier_more_specific_rule_survives_later_ties() {
        let rules = vec![
            pattern_dir_rule("*.png", "shop", 90),
            pattern_rule("*.png", 60),
            pattern_rule("a*", 61),
        ];
        let q = resolve("a.png", "shop/items", None, &webp(70), &rules).unwrap();
        assert_eq!(webp_of(&q), 90);
    }

    #[test]
    fn specificity_counts_declared_criteria() {
        assert_eq!(QualityRule::default().specificity(), 0);
        assert_eq!(pattern_rule("*", 1).specificity(), 1);
        assert_eq!(pattern_dir_rule("*", "a", 1).specificity(), 2);
        assert_eq!(width_rule(Some(1), Some(2), 1).specificity(), 2);
    }

    #[test]
    fn needs_width_only_with_width_criteria() {
        let compiled = CompiledRules::new(&[pattern_rule("*.png", 80)]).unwrap();
        assert!(!compiled.needs_width());
        let compiled = CompiledRules::new(&[width_rule(None, Some(100), 80)]).unwrap();
        assert!(compiled.needs_width());
    }

    #[test]
    fn invalid_glob_is_error() {
        assert!(CompiledRules::new(&[pattern_rule("a[", 80)]).is_err());
    }

    #[test]
    fn criteria_lists_declared_fields() {
        let rule = pattern_dir_rule("*-hero.*", "marketing", 95);
        assert_eq!(rule.criteria(), "pattern=*-hero.*, directory=marketing");
    }
}
