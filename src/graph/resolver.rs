//! Path resolution: deciding which rule produces a given path.

use crate::error::EngineError;
use crate::graph::job::JobId;
use crate::rules::{PipelineConfig, Ruleset, WildcardBinding};

/// A successful resolution: the producing rule (by index into the
/// ruleset) and the wildcard values captured from the matched template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub rule_index: usize,
    pub binding: WildcardBinding,
}

/// Finds the unique producer of `path`, if any.
///
/// Every output template of every rule is tried. Candidates whose
/// captured values fall outside a declared wildcard domain are dropped.
/// Matches that agree on rule and binding collapse into one candidate;
/// two or more distinct survivors make the path ambiguous.
pub fn resolve_path(
    path: &str,
    ruleset: &Ruleset,
    config: &PipelineConfig,
) -> Result<Option<Resolution>, EngineError> {
    let mut candidates: Vec<Resolution> = Vec::new();

    for (rule_index, rule) in ruleset.rules().iter().enumerate() {
        for output in &rule.outputs {
            let Some(binding) = output.template.match_path(path) else {
                continue;
            };
            if !config.allows(&binding) {
                continue;
            }
            let candidate = Resolution {
                rule_index,
                binding,
            };
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
    }

    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        _ => {
            let names = candidates
                .into_iter()
                .map(|c| {
                    JobId::new(ruleset.rules()[c.rule_index].name.clone(), c.binding)
                        .to_string()
                })
                .collect();
            Err(EngineError::AmbiguousRule {
                path: path.to_string(),
                candidates: names,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::rules::{PipelineConfig, RulePattern};

    fn ruleset(patterns: Vec<RulePattern>) -> Ruleset {
        Ruleset::new(patterns).unwrap()
    }

    fn no_domains() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn resolves_a_wildcard_output() {
        let rules = ruleset(vec![RulePattern::new("align", "aligner {output}")
            .with_input("data/{sample}.fastq")
            .with_output("out/{sample}.bam")]);

        let resolution = resolve_path("out/a.bam", &rules, &no_domains())
            .unwrap()
            .unwrap();
        assert_eq!(resolution.rule_index, 0);
        assert_eq!(resolution.binding.get("sample").map(String::as_str), Some("a"));
    }

    #[test]
    fn unmatched_paths_resolve_to_none() {
        let rules = ruleset(vec![
            RulePattern::new("a", "true").with_output("out/{x}.bam")
        ]);
        assert!(resolve_path("data/raw.fastq", &rules, &no_domains())
            .unwrap()
            .is_none());
    }

    #[test]
    fn distinct_candidates_are_ambiguous() {
        let rules = ruleset(vec![
            RulePattern::new("per_sample", "true").with_output("out/{sample}.csv"),
            RulePattern::new("summary", "true").with_output("out/z_{kind}.csv"),
        ]);

        // Matches per_sample (sample = "z_total") and summary (kind = "total").
        let err = resolve_path("out/z_total.csv", &rules, &no_domains()).unwrap_err();
        match err {
            EngineError::AmbiguousRule { path, candidates } => {
                assert_eq!(path, "out/z_total.csv");
                assert_eq!(candidates.len(), 2);
                assert!(candidates.iter().any(|c| c.starts_with("per_sample")));
                assert!(candidates.iter().any(|c| c.starts_with("summary")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn domains_veto_out_of_range_candidates() {
        let rules = ruleset(vec![
            RulePattern::new("per_sample", "true").with_output("out/{sample}.csv"),
            RulePattern::new("summary", "true").with_output("out/z_{kind}.csv"),
        ]);
        let config = PipelineConfig::new(
            BTreeMap::new(),
            [("sample".to_string(), vec!["a".to_string(), "b".to_string()])]
                .into_iter()
                .collect(),
        )
        .unwrap();

        // "z_total" is outside sample's domain, so only summary survives.
        let resolution = resolve_path("out/z_total.csv", &rules, &config)
            .unwrap()
            .unwrap();
        assert_eq!(resolution.rule_index, 1);
        assert_eq!(resolution.binding.get("kind").map(String::as_str), Some("total"));
    }

    #[test]
    fn sibling_templates_with_equal_bindings_collapse() {
        let rules = ruleset(vec![RulePattern::new("echoes", "true")
            .with_output("a/{s}-{s}.txt")
            .with_output("a/{s}-b.txt")]);

        // Both templates match with s = "b"; that is one job, not two.
        let resolution = resolve_path("a/b-b.txt", &rules, &no_domains())
            .unwrap()
            .unwrap();
        assert_eq!(resolution.binding.get("s").map(String::as_str), Some("b"));
    }

    #[test]
    fn one_rule_can_still_be_ambiguous_with_itself() {
        let rules = ruleset(vec![RulePattern::new("overlap", "true")
            .with_output("out/{s}.txt")
            .with_output("out/{s}x.txt")]);

        // s = "ax" for the first template, s = "a" for the second.
        let err = resolve_path("out/ax.txt", &rules, &no_domains()).unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousRule { .. }));
    }
}
