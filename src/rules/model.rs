//! Rule definitions: the declarative document form and the compiled
//! registry the engine works with.
//!
//! A [`RulePattern`] is what a pipeline file declares: wildcard path
//! templates for inputs and outputs, a shell command with placeholders,
//! optional params and an optional isolated environment. A [`Ruleset`]
//! compiles patterns into [`Rule`]s, validating every registration
//! invariant up front so the resolver and graph builder can assume a
//! well-formed registry.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::warn;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

use crate::error::{RulesetError, TemplateError};
use crate::rules::pattern::{PathTemplate, WildcardBinding};

/// One declared input or output entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEntry {
    pub name: Option<String>,
    pub path: String,
    pub ancient: bool,
    pub temporary: bool,
    pub protected: bool,
    pub directory: bool,
}

impl IoEntry {
    pub fn plain(path: impl Into<String>) -> Self {
        IoEntry {
            name: None,
            path: path.into(),
            ancient: false,
            temporary: false,
            protected: false,
            directory: false,
        }
    }

    pub fn named(name: impl Into<String>, path: impl Into<String>) -> Self {
        IoEntry {
            name: Some(name.into()),
            ..IoEntry::plain(path)
        }
    }
}

/// An isolated environment request: packages installed via micromamba
/// into an environment owned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvDescriptor {
    pub name: String,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub packages: Vec<String>,
}

fn default_channels() -> Vec<String> {
    vec!["conda-forge".to_string(), "bioconda".to_string()]
}

impl EnvDescriptor {
    pub fn new(name: impl Into<String>, packages: Vec<String>) -> Self {
        EnvDescriptor {
            name: name.into(),
            channels: default_channels(),
            packages,
        }
    }

    /// Canonical one-line form used for identity digests. Order of
    /// channels and packages is preserved: it matters to the solver.
    pub fn canonical(&self) -> String {
        format!(
            "name={};channels={};packages={}",
            self.name,
            self.channels.join(","),
            self.packages.join(",")
        )
    }
}

/// Pipeline lifecycle hook commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
    #[serde(default)]
    pub on_start: Option<String>,
    #[serde(default)]
    pub on_success: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.on_start.is_none() && self.on_success.is_none() && self.on_failure.is_none()
    }
}

/// A rule as declared in the pipeline document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulePattern {
    pub name: String,
    #[serde(default, deserialize_with = "io_entries")]
    pub input: Vec<IoEntry>,
    #[serde(default, deserialize_with = "io_entries")]
    pub output: Vec<IoEntry>,
    #[serde(default, deserialize_with = "param_map")]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: Option<EnvDescriptor>,
    pub command: String,
}

impl RulePattern {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        RulePattern {
            name: name.into(),
            input: Vec::new(),
            output: Vec::new(),
            params: BTreeMap::new(),
            environment: None,
            command: command.into(),
        }
    }

    pub fn with_input(mut self, path: impl Into<String>) -> Self {
        self.input.push(IoEntry::plain(path));
        self
    }

    pub fn with_named_input(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.input.push(IoEntry::named(name, path));
        self
    }

    pub fn with_ancient_input(mut self, path: impl Into<String>) -> Self {
        self.input.push(IoEntry {
            ancient: true,
            ..IoEntry::plain(path)
        });
        self
    }

    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.output.push(IoEntry::plain(path));
        self
    }

    pub fn with_named_output(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.output.push(IoEntry::named(name, path));
        self
    }

    pub fn with_temp_output(mut self, path: impl Into<String>) -> Self {
        self.output.push(IoEntry {
            temporary: true,
            ..IoEntry::plain(path)
        });
        self
    }

    pub fn with_protected_output(mut self, path: impl Into<String>) -> Self {
        self.output.push(IoEntry {
            protected: true,
            ..IoEntry::plain(path)
        });
        self
    }

    pub fn with_directory_output(mut self, path: impl Into<String>) -> Self {
        self.output.push(IoEntry {
            directory: true,
            ..IoEntry::plain(path)
        });
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_environment(mut self, env: EnvDescriptor) -> Self {
        self.environment = Some(env);
        self
    }
}

/// A compiled input template.
#[derive(Debug, Clone)]
pub struct InputSpec {
    pub name: Option<String>,
    pub template: PathTemplate,
    pub ancient: bool,
}

/// A compiled output template with its markers.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: Option<String>,
    pub template: PathTemplate,
    pub temporary: bool,
    pub protected: bool,
    pub directory: bool,
}

/// A validated, compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub params: BTreeMap<String, String>,
    pub environment: Option<EnvDescriptor>,
    pub command: String,
}

impl Rule {
    /// The rule's wildcard set: every name appearing in an output template.
    pub fn wildcard_set(&self) -> HashSet<&str> {
        self.outputs
            .iter()
            .flat_map(|o| o.template.wildcard_names())
            .map(String::as_str)
            .collect()
    }

    /// Substitute the binding into every param value.
    pub fn resolved_params(
        &self,
        binding: &WildcardBinding,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.params {
            let resolved = if value.contains('{') {
                PathTemplate::compile(value)?.substitute(binding)?
            } else {
                value.clone()
            };
            out.insert(key.clone(), resolved);
        }
        Ok(out)
    }

    /// Render the command with all placeholders replaced by concrete
    /// values. Inputs and outputs are (name, rendered path) pairs in
    /// declaration order.
    pub fn render_command(
        &self,
        inputs: &[(Option<String>, String)],
        outputs: &[(Option<String>, String)],
        params: &BTreeMap<String, String>,
        binding: &WildcardBinding,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.command.len());
        for piece in command_pieces(&self.command)? {
            match piece {
                CommandPiece::Text(text) => out.push_str(&text),
                CommandPiece::Placeholder(body) => {
                    let value = lookup_placeholder(&body, inputs, outputs, params, binding)
                        .ok_or_else(|| TemplateError::UnboundName(body.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

/// The compiled rule registry.
#[derive(Debug)]
pub struct Ruleset {
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
}

impl Ruleset {
    /// Compile and validate a set of rule patterns.
    pub fn new(patterns: Vec<RulePattern>) -> Result<Self, RulesetError> {
        if patterns.is_empty() {
            return Err(RulesetError::EmptyRuleset);
        }

        let mut rules = Vec::with_capacity(patterns.len());
        let mut index = HashMap::new();
        for pattern in &patterns {
            let rule = compile_rule(pattern)?;
            if index.insert(rule.name.clone(), rules.len()).is_some() {
                return Err(RulesetError::DuplicateRule(rule.name));
            }
            rules.push(rule);
        }

        // Two interchangeable output templates make every matching path
        // ambiguous, whichever rules they belong to; refuse them outright.
        let mut shapes: HashMap<String, String> = HashMap::new();
        for rule in &rules {
            for output in &rule.outputs {
                let key = output.template.shape_key();
                if let Some(first) = shapes.get(&key) {
                    return Err(RulesetError::DuplicateOutputTemplate {
                        first: first.clone(),
                        second: rule.name.clone(),
                        template: output.template.raw().to_string(),
                    });
                }
                shapes.insert(key, rule.name.clone());
            }
        }

        Ok(Ruleset { rules, index })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_rule(pattern: &RulePattern) -> Result<Rule, RulesetError> {
    let name = pattern.name.trim();
    if name.is_empty() {
        return Err(RulesetError::EmptyRuleName);
    }
    let rule_name = name.to_string();

    if pattern.command.trim().is_empty() {
        return Err(RulesetError::EmptyCommand(rule_name));
    }
    if pattern.output.is_empty() {
        return Err(RulesetError::NoOutputs(rule_name));
    }
    if let Some(env) = &pattern.environment {
        if env.packages.is_empty() {
            return Err(RulesetError::EmptyEnvironment(rule_name));
        }
    }

    let compile = |raw: &str| -> Result<PathTemplate, RulesetError> {
        PathTemplate::compile(raw).map_err(|source| RulesetError::Template {
            rule: rule_name.clone(),
            template: raw.to_string(),
            source,
        })
    };

    let mut outputs = Vec::with_capacity(pattern.output.len());
    let mut seen_output_names = HashSet::new();
    for (i, entry) in pattern.output.iter().enumerate() {
        if entry.ancient {
            return Err(RulesetError::InvalidMarker {
                rule: rule_name.clone(),
                entry: entry_label("output", &entry.name, i),
                marker: "ancient",
            });
        }
        if entry.temporary && entry.protected {
            return Err(RulesetError::ConflictingMarkers {
                rule: rule_name.clone(),
                output: entry.path.clone(),
            });
        }
        if let Some(n) = &entry.name {
            if !seen_output_names.insert(n.clone()) {
                return Err(RulesetError::DuplicateEntryName {
                    rule: rule_name.clone(),
                    kind: "output",
                    name: n.clone(),
                });
            }
        }
        outputs.push(OutputSpec {
            name: entry.name.clone(),
            template: compile(&entry.path)?,
            temporary: entry.temporary,
            protected: entry.protected,
            directory: entry.directory,
        });
    }

    let mut inputs = Vec::with_capacity(pattern.input.len());
    let mut seen_input_names = HashSet::new();
    for (i, entry) in pattern.input.iter().enumerate() {
        for (flag, marker) in [
            (entry.temporary, "temporary"),
            (entry.protected, "protected"),
            (entry.directory, "directory"),
        ] {
            if flag {
                return Err(RulesetError::InvalidMarker {
                    rule: rule_name.clone(),
                    entry: entry_label("input", &entry.name, i),
                    marker,
                });
            }
        }
        if let Some(n) = &entry.name {
            if !seen_input_names.insert(n.clone()) {
                return Err(RulesetError::DuplicateEntryName {
                    rule: rule_name.clone(),
                    kind: "input",
                    name: n.clone(),
                });
            }
        }
        inputs.push(InputSpec {
            name: entry.name.clone(),
            template: compile(&entry.path)?,
            ancient: entry.ancient,
        });
    }

    let rule = Rule {
        name: rule_name.clone(),
        inputs,
        outputs,
        params: pattern.params.clone(),
        environment: pattern.environment.clone(),
        command: pattern.command.clone(),
    };

    validate_wildcard_closure(&rule)?;
    validate_command(&rule)?;
    Ok(rule)
}

fn entry_label(kind: &str, name: &Option<String>, index: usize) -> String {
    match name {
        Some(n) => format!("{kind} '{n}'"),
        None => format!("{kind} #{}", index + 1),
    }
}

/// Every wildcard used by inputs and param values must be bound by the
/// outputs, and a name must keep one mode across the whole rule.
fn validate_wildcard_closure(rule: &Rule) -> Result<(), RulesetError> {
    let bound = rule.wildcard_set();

    let mut modes: HashMap<String, bool> = HashMap::new();
    let templates = rule
        .outputs
        .iter()
        .map(|o| &o.template)
        .chain(rule.inputs.iter().map(|i| &i.template));
    for template in templates {
        for name in template.wildcard_names() {
            let multi = template.wildcard_mode(name).unwrap_or(false);
            match modes.get(name) {
                Some(&seen) if seen != multi => {
                    return Err(RulesetError::Template {
                        rule: rule.name.clone(),
                        template: template.raw().to_string(),
                        source: TemplateError::ConflictingModes(name.clone()),
                    })
                }
                Some(_) => {}
                None => {
                    modes.insert(name.clone(), multi);
                }
            }
        }
    }

    // Every output of a rule must bind the full wildcard set: matching any
    // one output yields the binding used to render all of its siblings.
    for output in &rule.outputs {
        for name in &bound {
            if output.template.wildcard_mode(name).is_none() {
                return Err(RulesetError::PartialOutputWildcard {
                    rule: rule.name.clone(),
                    wildcard: (*name).to_string(),
                    template: output.template.raw().to_string(),
                });
            }
        }
    }

    for (i, input) in rule.inputs.iter().enumerate() {
        for name in input.template.wildcard_names() {
            if !bound.contains(name.as_str()) {
                return Err(RulesetError::UnboundWildcard {
                    rule: rule.name.clone(),
                    wildcard: name.clone(),
                    location: entry_label("input", &input.name, i),
                });
            }
        }
    }

    for (key, value) in &rule.params {
        if !value.contains('{') {
            continue;
        }
        let template =
            PathTemplate::compile(value).map_err(|source| RulesetError::Template {
                rule: rule.name.clone(),
                template: value.clone(),
                source,
            })?;
        for name in template.wildcard_names() {
            if !bound.contains(name.as_str()) {
                return Err(RulesetError::UnboundWildcard {
                    rule: rule.name.clone(),
                    wildcard: name.clone(),
                    location: format!("param '{key}'"),
                });
            }
        }
    }

    Ok(())
}

/// Check every command placeholder against the rule's declared surface.
fn validate_command(rule: &Rule) -> Result<(), RulesetError> {
    let bound = rule.wildcard_set();
    let pieces = command_pieces(&rule.command).map_err(|source| RulesetError::Template {
        rule: rule.name.clone(),
        template: rule.command.clone(),
        source,
    })?;

    let unknown = |placeholder: &str| RulesetError::UnknownPlaceholder {
        rule: rule.name.clone(),
        placeholder: placeholder.to_string(),
    };

    for piece in &pieces {
        let CommandPiece::Placeholder(body) = piece else {
            continue;
        };
        match body.as_str() {
            "input" => {
                if rule.inputs.is_empty() {
                    warn!(
                        "Rule '{}' uses {{input}} but declares no inputs",
                        rule.name
                    );
                }
            }
            "output" => {}
            other => {
                let Some((ns, name)) = other.split_once('.') else {
                    return Err(unknown(other));
                };
                let known = match ns {
                    "input" => rule.inputs.iter().any(|e| e.name.as_deref() == Some(name)),
                    "output" => rule.outputs.iter().any(|e| e.name.as_deref() == Some(name)),
                    "params" => rule.params.contains_key(name),
                    "wildcards" => bound.contains(name),
                    _ => false,
                };
                if !known {
                    return Err(unknown(other));
                }
            }
        }
    }
    Ok(())
}

enum CommandPiece {
    Text(String),
    Placeholder(String),
}

/// Split a command into literal text and `{...}` placeholders. `{{` and
/// `}}` escape literal braces for the shell.
fn command_pieces(command: &str) -> Result<Vec<CommandPiece>, TemplateError> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = command.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some(&(_, '{'))) {
                    chars.next();
                    text.push('{');
                    continue;
                }
                let body_start = pos + 1;
                let close = command[body_start..]
                    .find('}')
                    .map(|off| body_start + off)
                    .ok_or(TemplateError::UnclosedBrace(pos))?;
                let body = &command[body_start..close];
                if body.contains('{') {
                    return Err(TemplateError::UnclosedBrace(pos));
                }
                if !text.is_empty() {
                    pieces.push(CommandPiece::Text(std::mem::take(&mut text)));
                }
                pieces.push(CommandPiece::Placeholder(body.to_string()));
                while let Some(&(p, _)) = chars.peek() {
                    if p <= close {
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            '}' => {
                if matches!(chars.peek(), Some(&(_, '}'))) {
                    chars.next();
                    text.push('}');
                    continue;
                }
                return Err(TemplateError::StrayCloseBrace(pos));
            }
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        pieces.push(CommandPiece::Text(text));
    }
    Ok(pieces)
}

/// Names of global params a command actually references, for selective
/// inheritance. Grammar problems are ignored here; they resurface with
/// proper context when the ruleset compiles.
pub(crate) fn referenced_params(command: &str) -> Vec<String> {
    match command_pieces(command) {
        Ok(pieces) => pieces
            .into_iter()
            .filter_map(|piece| match piece {
                CommandPiece::Placeholder(body) => body
                    .strip_prefix("params.")
                    .map(|name| name.to_string()),
                CommandPiece::Text(_) => None,
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn lookup_placeholder(
    body: &str,
    inputs: &[(Option<String>, String)],
    outputs: &[(Option<String>, String)],
    params: &BTreeMap<String, String>,
    binding: &WildcardBinding,
) -> Option<String> {
    let join = |entries: &[(Option<String>, String)]| {
        entries
            .iter()
            .map(|(_, path)| path.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };
    let find = |entries: &[(Option<String>, String)], name: &str| {
        entries
            .iter()
            .find(|(n, _)| n.as_deref() == Some(name))
            .map(|(_, path)| path.clone())
    };
    match body {
        "input" => Some(join(inputs)),
        "output" => Some(join(outputs)),
        _ => {
            let (ns, name) = body.split_once('.')?;
            match ns {
                "input" => find(inputs, name),
                "output" => find(outputs, name),
                "params" => params.get(name).cloned(),
                "wildcards" => binding.get(name).cloned(),
                _ => None,
            }
        }
    }
}

/// Accept either a single string or a list of strings.
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::String(s) => Ok(vec![s]),
        serde_yaml::Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| match item {
                serde_yaml::Value::String(s) => Ok(s),
                other => Err(D::Error::custom(format!(
                    "expected string, found {}",
                    yaml_kind(&other)
                ))),
            })
            .collect(),
        other => Err(D::Error::custom(format!(
            "expected string or list of strings, found {}",
            yaml_kind(&other)
        ))),
    }
}

/// Accept scalar param values of any YAML scalar type, coerced to strings.
pub(crate) fn param_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    let serde_yaml::Value::Mapping(mapping) = value else {
        return Err(D::Error::custom("params must be a mapping"));
    };
    let mut out = BTreeMap::new();
    for (key, value) in mapping {
        let serde_yaml::Value::String(key) = key else {
            return Err(D::Error::custom("param names must be strings"));
        };
        let value = scalar_to_string(&value)
            .ok_or_else(|| D::Error::custom(format!("param '{key}' must be a scalar")))?;
        out.insert(key, value);
    }
    Ok(out)
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "a bool",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a list",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Accept input/output declarations in every shape the document allows:
/// a single string, a detailed mapping with a `path` key, a list mixing
/// both, or a mapping of entry names to either form.
pub(crate) fn io_entries<'de, D>(deserializer: D) -> Result<Vec<IoEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    io_entries_from_value(value).map_err(D::Error::custom)
}

fn io_entries_from_value(value: serde_yaml::Value) -> Result<Vec<IoEntry>, String> {
    match value {
        serde_yaml::Value::String(path) => Ok(vec![IoEntry::plain(path)]),
        serde_yaml::Value::Sequence(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                entries.extend(sequence_item(item)?);
            }
            Ok(entries)
        }
        serde_yaml::Value::Mapping(mapping) => {
            if mapping.get("path").is_some() {
                Ok(vec![detailed_entry(
                    None,
                    serde_yaml::Value::Mapping(mapping),
                )?])
            } else {
                named_entries(mapping)
            }
        }
        other => Err(format!(
            "expected a path, a list of paths, or a mapping, found {}",
            yaml_kind(&other)
        )),
    }
}

fn sequence_item(item: serde_yaml::Value) -> Result<Vec<IoEntry>, String> {
    match item {
        serde_yaml::Value::String(path) => Ok(vec![IoEntry::plain(path)]),
        serde_yaml::Value::Mapping(mapping) => {
            if mapping.get("path").is_some() {
                Ok(vec![detailed_entry(
                    None,
                    serde_yaml::Value::Mapping(mapping),
                )?])
            } else {
                named_entries(mapping)
            }
        }
        other => Err(format!(
            "list entries must be paths or mappings, found {}",
            yaml_kind(&other)
        )),
    }
}

fn named_entries(mapping: serde_yaml::Mapping) -> Result<Vec<IoEntry>, String> {
    let mut entries = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let serde_yaml::Value::String(name) = key else {
            return Err("entry names must be strings".to_string());
        };
        match value {
            serde_yaml::Value::String(path) => entries.push(IoEntry::named(name, path)),
            mapping @ serde_yaml::Value::Mapping(_) => {
                entries.push(detailed_entry(Some(name), mapping)?)
            }
            other => {
                return Err(format!(
                    "entry '{name}' must be a path or a mapping, found {}",
                    yaml_kind(&other)
                ))
            }
        }
    }
    Ok(entries)
}

fn detailed_entry(
    name: Option<String>,
    value: serde_yaml::Value,
) -> Result<IoEntry, String> {
    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Detailed {
        path: String,
        #[serde(default)]
        ancient: bool,
        #[serde(default)]
        temporary: bool,
        #[serde(default)]
        protected: bool,
        #[serde(default)]
        directory: bool,
    }
    let detailed: Detailed = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
    Ok(IoEntry {
        name,
        path: detailed.path,
        ancient: detailed.ancient,
        temporary: detailed.temporary,
        protected: detailed.protected,
        directory: detailed.directory,
    })
}
