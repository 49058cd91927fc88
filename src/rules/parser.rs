//! YAML pipeline documents.
//!
//! A pipeline is one YAML document holding global params, wildcard
//! domains, default targets, lifecycle hooks and the rule list. Parsing
//! is strict: unknown keys are rejected so a typo fails loudly instead
//! of silently changing behavior.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::error::RulesetError;
use crate::rules::config::PipelineConfig;
use crate::rules::model::{self, Hooks, RulePattern, Ruleset};

/// The document exactly as written, before validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineDoc {
    #[serde(default, deserialize_with = "crate::rules::model::param_map")]
    params: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "domain_map")]
    wildcards: BTreeMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "crate::rules::model::string_or_list")]
    targets: Vec<String>,
    #[serde(default)]
    hooks: Hooks,
    #[serde(default)]
    rules: Vec<RulePattern>,
}

/// A loaded, validated pipeline.
#[derive(Debug)]
pub struct Pipeline {
    pub config: PipelineConfig,
    pub ruleset: Ruleset,
    /// Default targets, already expanded over wildcard domains.
    pub targets: Vec<String>,
    pub hooks: Hooks,
}

/// Reads and validates a pipeline document from disk.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<Pipeline, RulesetError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| RulesetError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_pipeline(&content, &path.display().to_string())
}

/// Parses a pipeline document. `origin` names the source in errors.
pub fn parse_pipeline(content: &str, origin: &str) -> Result<Pipeline, RulesetError> {
    let doc: PipelineDoc =
        serde_yaml::from_str(content).map_err(|source| RulesetError::Parse {
            path: origin.to_string(),
            source,
        })?;

    let config = PipelineConfig::new(doc.params, doc.wildcards)?;

    let mut rules = doc.rules;
    for rule in &mut rules {
        inherit_globals(rule, &config);
    }
    let ruleset = Ruleset::new(rules)?;

    let targets = config.expand_targets(&doc.targets)?;

    debug!(
        "Loaded pipeline from '{}': {} rules, {} default targets",
        origin,
        ruleset.len(),
        targets.len()
    );

    Ok(Pipeline {
        config,
        ruleset,
        targets,
        hooks: doc.hooks,
    })
}

/// Copies each global param a rule's command references into the rule's
/// own params, unless the rule already defines it. Rules keep no tie to
/// globals their command never mentions, so editing an unrelated global
/// does not change their recorded identity.
fn inherit_globals(rule: &mut RulePattern, config: &PipelineConfig) {
    for name in model::referenced_params(&rule.command) {
        if rule.params.contains_key(&name) {
            continue;
        }
        if let Some(value) = config.param(&name) {
            rule.params.insert(name, value.to_string());
        }
    }
}

/// `wildcards:` maps each name to a scalar or a list of scalars.
fn domain_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    let serde_yaml::Value::Mapping(mapping) = value else {
        return Err(D::Error::custom("wildcards must be a mapping"));
    };
    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let serde_yaml::Value::String(name) = key else {
            return Err(D::Error::custom("wildcard names must be strings"));
        };
        let values = match &value {
            serde_yaml::Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    model::scalar_to_string(item).ok_or_else(|| {
                        D::Error::custom(format!("wildcard '{name}' has a non-scalar value"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => match model::scalar_to_string(other) {
                Some(single) => vec![single],
                None => {
                    return Err(D::Error::custom(format!(
                        "wildcard '{name}' has a non-scalar value"
                    )))
                }
            },
        };
        out.insert(name, values);
    }
    Ok(out)
}
