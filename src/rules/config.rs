//! Pipeline-level configuration: global parameters and wildcard domains.
//!
//! Domains serve two purposes. They expand wildcard targets into concrete
//! paths before resolution starts, and they veto resolver candidates whose
//! captured values fall outside the declared set.

use std::collections::{BTreeMap, HashSet};

use crate::error::RulesetError;
use crate::rules::pattern::{PathTemplate, WildcardBinding};

/// Global settings shared by every rule in a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    params: BTreeMap<String, String>,
    domains: BTreeMap<String, Vec<String>>,
}

impl PipelineConfig {
    /// Builds a config, rejecting wildcard domains with no values.
    pub fn new(
        params: BTreeMap<String, String>,
        domains: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, RulesetError> {
        for (name, values) in &domains {
            if values.is_empty() {
                return Err(RulesetError::EmptyDomain(name.clone()));
            }
        }
        Ok(Self { params, domains })
    }

    /// Looks up a global parameter value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// All global parameters.
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// The declared domain of a wildcard, if any.
    pub fn domain(&self, name: &str) -> Option<&[String]> {
        self.domains.get(name).map(Vec::as_slice)
    }

    /// Whether every captured value in `binding` is allowed.
    ///
    /// Wildcards without a declared domain are unconstrained.
    pub fn allows(&self, binding: &WildcardBinding) -> bool {
        binding.iter().all(|(name, value)| match self.domains.get(name) {
            Some(values) => values.iter().any(|v| v == value),
            None => true,
        })
    }

    /// Expands wildcard targets over their domains.
    ///
    /// Literal targets pass through untouched. A target using a wildcard
    /// without a declared domain is an error since there is nothing to
    /// enumerate. Duplicates collapse, keeping first-appearance order.
    pub fn expand_targets(&self, targets: &[String]) -> Result<Vec<String>, RulesetError> {
        let mut expanded = Vec::new();
        let mut seen = HashSet::new();

        for target in targets {
            let template = PathTemplate::compile(target).map_err(|source| {
                RulesetError::TargetTemplate {
                    target: target.clone(),
                    source,
                }
            })?;

            if template.is_literal() {
                if seen.insert(target.clone()) {
                    expanded.push(target.clone());
                }
                continue;
            }

            let names = template.wildcard_names();
            let mut domains = Vec::with_capacity(names.len());
            for name in names {
                match self.domains.get(name) {
                    Some(values) => domains.push(values),
                    None => {
                        return Err(RulesetError::UnknownTargetWildcard {
                            target: target.clone(),
                            wildcard: name.clone(),
                        })
                    }
                }
            }

            // Odometer over the cartesian product of the domains. The
            // rightmost wildcard varies fastest; full rollover ends it.
            let mut cursor = vec![0usize; names.len()];
            loop {
                let binding: WildcardBinding = names
                    .iter()
                    .enumerate()
                    .map(|(k, name)| (name.clone(), domains[k][cursor[k]].clone()))
                    .collect();
                let path = template
                    .substitute(&binding)
                    .expect("every template wildcard has a domain value");
                if seen.insert(path.clone()) {
                    expanded.push(path);
                }

                let mut wheel = cursor.len();
                while wheel > 0 {
                    wheel -= 1;
                    cursor[wheel] += 1;
                    if cursor[wheel] < domains[wheel].len() {
                        break;
                    }
                    cursor[wheel] = 0;
                }
                if cursor.iter().all(|&i| i == 0) {
                    break;
                }
            }
        }

        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(domains: &[(&str, &[&str])]) -> PipelineConfig {
        PipelineConfig::new(
            BTreeMap::new(),
            domains
                .iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn literal_targets_pass_through() {
        let expanded = config(&[])
            .expand_targets(&["out/report.html".to_string()])
            .unwrap();
        assert_eq!(expanded, vec!["out/report.html"]);
    }

    #[test]
    fn expands_over_a_single_domain() {
        let expanded = config(&[("sample", &["a", "b", "c"])])
            .expand_targets(&["out/{sample}.bam".to_string()])
            .unwrap();
        assert_eq!(expanded, vec!["out/a.bam", "out/b.bam", "out/c.bam"]);
    }

    #[test]
    fn expands_the_cartesian_product_in_order() {
        let expanded = config(&[("sample", &["a", "b"]), ("lane", &["1", "2"])])
            .expand_targets(&["out/{sample}_{lane}.bam".to_string()])
            .unwrap();
        assert_eq!(
            expanded,
            vec!["out/a_1.bam", "out/a_2.bam", "out/b_1.bam", "out/b_2.bam"]
        );
    }

    #[test]
    fn deduplicates_expanded_targets() {
        let expanded = config(&[("sample", &["a"])])
            .expand_targets(&[
                "out/{sample}.bam".to_string(),
                "out/a.bam".to_string(),
            ])
            .unwrap();
        assert_eq!(expanded, vec!["out/a.bam"]);
    }

    #[test]
    fn rejects_targets_with_undeclared_wildcards() {
        let err = config(&[])
            .expand_targets(&["out/{sample}.bam".to_string()])
            .unwrap_err();
        match err {
            RulesetError::UnknownTargetWildcard { wildcard, .. } => {
                assert_eq!(wildcard, "sample")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_malformed_targets() {
        let err = config(&[])
            .expand_targets(&["out/{unclosed".to_string()])
            .unwrap_err();
        assert!(matches!(err, RulesetError::TargetTemplate { .. }));
    }

    #[test]
    fn rejects_empty_domains() {
        let err = PipelineConfig::new(
            BTreeMap::new(),
            [("sample".to_string(), Vec::new())].into_iter().collect(),
        )
        .unwrap_err();
        assert!(matches!(err, RulesetError::EmptyDomain(_)));
    }

    #[test]
    fn binding_filter_respects_domains() {
        let cfg = config(&[("sample", &["a", "b"])]);

        let mut allowed = WildcardBinding::new();
        allowed.insert("sample".to_string(), "a".to_string());
        allowed.insert("free".to_string(), "anything".to_string());
        assert!(cfg.allows(&allowed));

        let mut rejected = WildcardBinding::new();
        rejected.insert("sample".to_string(), "z".to_string());
        assert!(!cfg.allows(&rejected));
    }
}
