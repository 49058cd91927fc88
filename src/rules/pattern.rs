//! Wildcard path templates.
//!
//! A template is literal path text interleaved with named captures:
//! `{sample}` matches within a single path segment (never `/`), while
//! `{*run}` may span directory separators. Templates are compiled once
//! when a rule is registered and matched against concrete paths many
//! times after that.
//!
//! Matching is deterministic: a wildcard takes the shortest capture that
//! lets the rest of the template succeed, growing only when a later
//! occurrence of the next literal anchor is needed. A name that appears
//! twice must capture the same value both times.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::TemplateError;

/// Wildcard values captured by a successful match, keyed by name.
///
/// A `BTreeMap` keeps bindings ordered and hashable, so they can serve
/// as part of a job identity.
pub type WildcardBinding = BTreeMap<String, String>;

/// Names that collide with command placeholder namespaces.
const RESERVED_NAMES: &[&str] = &["input", "output", "params", "wildcards"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard { name: String, multi: bool },
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
    names: Vec<String>,
}

impl PathTemplate {
    /// Compile a raw template string, validating the wildcard grammar.
    pub fn compile(raw: &str) -> Result<Self, TemplateError> {
        if raw.is_empty() {
            return Err(TemplateError::Empty);
        }
        let mut segments: Vec<Segment> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        let mut modes: BTreeMap<String, bool> = BTreeMap::new();
        let mut literal = String::new();
        let mut iter = raw.char_indices().peekable();

        while let Some((pos, ch)) = iter.next() {
            match ch {
                '{' => {
                    let body_start = pos + 1;
                    let close = raw[body_start..]
                        .find('}')
                        .map(|off| body_start + off)
                        .ok_or(TemplateError::UnclosedBrace(pos))?;
                    if raw[body_start..close].contains('{') {
                        return Err(TemplateError::UnclosedBrace(pos));
                    }
                    let body = &raw[body_start..close];
                    let (multi, name) = match body.strip_prefix('*') {
                        Some(rest) => (true, rest),
                        None => (false, body),
                    };
                    if name.is_empty() {
                        return Err(TemplateError::EmptyName(pos));
                    }
                    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(TemplateError::InvalidName(name.to_string()));
                    }
                    if RESERVED_NAMES.contains(&name) {
                        return Err(TemplateError::ReservedName(name.to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if let Some(Segment::Wildcard { name: prev, .. }) = segments.last() {
                        return Err(TemplateError::AdjacentWildcards(
                            prev.clone(),
                            name.to_string(),
                        ));
                    }
                    match modes.get(name) {
                        Some(&seen) if seen != multi => {
                            return Err(TemplateError::ConflictingModes(name.to_string()))
                        }
                        Some(_) => {}
                        None => {
                            modes.insert(name.to_string(), multi);
                            names.push(name.to_string());
                        }
                    }
                    segments.push(Segment::Wildcard {
                        name: name.to_string(),
                        multi,
                    });
                    while let Some(&(p, _)) = iter.peek() {
                        if p <= close {
                            iter.next();
                        } else {
                            break;
                        }
                    }
                }
                '}' => return Err(TemplateError::StrayCloseBrace(pos)),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(PathTemplate {
            raw: raw.to_string(),
            segments,
            names,
        })
    }

    /// The template text as written.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Wildcard names in first-appearance order, without duplicates.
    pub fn wildcard_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_wildcards(&self) -> bool {
        !self.names.is_empty()
    }

    /// Whether `name` is a multi-segment wildcard in this template.
    /// `None` when the name does not occur.
    pub fn wildcard_mode(&self, name: &str) -> Option<bool> {
        self.segments.iter().find_map(|seg| match seg {
            Segment::Wildcard { name: n, multi } if n == name => Some(*multi),
            _ => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.names.is_empty()
    }

    /// Match a concrete path against the template.
    ///
    /// Returns the captured binding, or `None` when the path does not fit.
    /// Captures are never empty.
    pub fn match_path(&self, path: &str) -> Option<WildcardBinding> {
        let mut binding = WildcardBinding::new();
        if match_segments(&self.segments, path, &mut binding) {
            Some(binding)
        } else {
            None
        }
    }

    /// Render the template with every wildcard replaced by its bound value.
    pub fn substitute(&self, binding: &WildcardBinding) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Wildcard { name, .. } => match binding.get(name) {
                    Some(value) => out.push_str(value),
                    None => return Err(TemplateError::UnboundName(name.clone())),
                },
            }
        }
        Ok(out)
    }

    /// A name-erased key: two templates with the same key match exactly
    /// the same set of paths, whatever their wildcards are called.
    pub(crate) fn shape_key(&self) -> String {
        let mut key = String::with_capacity(self.raw.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(lit) => {
                    for ch in lit.chars() {
                        if ch == '\\' {
                            key.push_str("\\\\");
                        } else {
                            key.push(ch);
                        }
                    }
                }
                Segment::Wildcard { multi: false, .. } => key.push_str("\\1"),
                Segment::Wildcard { multi: true, .. } => key.push_str("\\*"),
            }
        }
        key
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn match_segments(segments: &[Segment], rest: &str, binding: &mut WildcardBinding) -> bool {
    let Some(seg) = segments.first() else {
        return rest.is_empty();
    };
    match seg {
        Segment::Literal(lit) => match rest.strip_prefix(lit.as_str()) {
            Some(tail) => match_segments(&segments[1..], tail, binding),
            None => false,
        },
        Segment::Wildcard { name, multi } => match segments.get(1) {
            // A trailing wildcard swallows everything that is left.
            None => {
                if rest.is_empty() || (!multi && rest.contains('/')) {
                    return false;
                }
                bind_and_match(&[], name, rest, "", binding)
            }
            Some(Segment::Literal(lit)) => {
                let mut from = match rest.chars().next() {
                    Some(c) => c.len_utf8(),
                    None => return false,
                };
                while let Some(found) = rest.get(from..).and_then(|s| s.find(lit.as_str())) {
                    let split = from + found;
                    let value = &rest[..split];
                    if !multi && value.contains('/') {
                        // Growing the capture only appends characters, so the
                        // slash stays. Nothing further can match.
                        return false;
                    }
                    let tail = &rest[split + lit.len()..];
                    if bind_and_match(&segments[2..], name, value, tail, binding) {
                        return true;
                    }
                    from = split + next_char_len(rest, split);
                }
                false
            }
            // Adjacent wildcards are rejected at compile time.
            Some(Segment::Wildcard { .. }) => false,
        },
    }
}

fn bind_and_match(
    remaining: &[Segment],
    name: &str,
    value: &str,
    tail: &str,
    binding: &mut WildcardBinding,
) -> bool {
    match binding.get(name) {
        Some(existing) if existing != value => return false,
        Some(_) => return match_segments(remaining, tail, binding),
        None => {}
    }
    binding.insert(name.to_string(), value.to_string());
    if match_segments(remaining, tail, binding) {
        true
    } else {
        binding.remove(name);
        false
    }
}

fn next_char_len(s: &str, at: usize) -> usize {
    s[at..].chars().next().map_or(1, |c| c.len_utf8())
}
