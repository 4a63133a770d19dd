//! Branch mapping
//!
//! Translates a source branch name into the deployment tag an image is
//! published under. Rules are evaluated in declaration order and every match
//! overwrites the previous one, so the last matching rule wins. A branch that
//! matches no rule has no deployment tag.
//!
//! Patterns are regular expressions matched anywhere in the branch name unless
//! anchored. The same patterns are emitted into the image builder's bash
//! script (`[[ $BRANCH =~ $PATTERN ]]`), so they should stay within the subset
//! that POSIX extended regular expressions and the `regex` crate agree on.

use regex::Regex;

use crate::error::{Result, SynthError};

/// Maximum length of a container image tag
const MAX_TAG_LEN: usize = 128;

/// One `pattern -> tag` rule
#[derive(Debug, Clone)]
pub struct BranchRule {
    pattern: String,
    regex: Regex,
    tag: String,
}

impl BranchRule {
    /// Creates a rule, compiling the pattern and validating the tag
    pub fn new(pattern: impl Into<String>, tag: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let tag = tag.into();

        let regex = Regex::new(&pattern).map_err(|source| SynthError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;

        if top_level_alternatives(&pattern)
            .iter()
            .any(|alternative| has_inner_anchor(alternative))
        {
            return Err(SynthError::invalid(format!(
                "branch pattern '{}' may only use '^' at the start of an alternative",
                pattern
            )));
        }

        if !is_valid_image_tag(&tag) {
            return Err(SynthError::InvalidTag(tag));
        }

        Ok(Self {
            pattern,
            regex,
            tag,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Check whether this rule applies to a branch
    pub fn is_match(&self, branch: &str) -> bool {
        self.regex.is_match(branch)
    }

    /// Pattern for a webhook `HEAD_REF` filter
    ///
    /// Webhooks see the full ref (`refs/heads/<branch>`). Each top-level
    /// alternative is re-anchored after the ref prefix when it starts with `^`
    /// and allowed to float after it otherwise, so the filter matches exactly
    /// the refs whose branch the rule matches.
    pub fn head_ref_pattern(&self) -> String {
        let alternatives: Vec<String> = top_level_alternatives(&self.pattern)
            .into_iter()
            .map(|alternative| match alternative.strip_prefix('^') {
                Some(rest) => rest.to_string(),
                None if needs_group(alternative) => format!(".*(?:{})", alternative),
                None => format!(".*{}", alternative),
            })
            .collect();

        match alternatives.as_slice() {
            [single] => format!("^refs/heads/{}", single),
            _ => format!("^refs/heads/(?:{})", alternatives.join("|")),
        }
    }
}

/// A floating alternative only needs a group when it starts with a flag group
fn needs_group(alternative: &str) -> bool {
    alternative.starts_with("(?")
}

/// Split a pattern on `|` outside groups, classes and escapes
fn top_level_alternatives(pattern: &str) -> Vec<&str> {
    let mut alternatives = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut scanner = PatternScanner::default();

    for (index, c) in pattern.char_indices() {
        if !scanner.is_literal(c) {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                '|' if depth == 0 => {
                    alternatives.push(&pattern[start..index]);
                    start = index + 1;
                }
                _ => {}
            }
        }
    }

    alternatives.push(&pattern[start..]);
    alternatives
}

/// Whether `^` is used as an anchor anywhere but the first character
fn has_inner_anchor(alternative: &str) -> bool {
    let mut scanner = PatternScanner::default();
    alternative
        .char_indices()
        .any(|(index, c)| !scanner.is_literal(c) && c == '^' && index > 0)
}

/// Tracks escapes and character classes while walking a pattern
#[derive(Default)]
struct PatternScanner {
    escaped: bool,
    in_class: bool,
    /// Characters seen since the class opened, to allow `[]]` and `[^]]`
    class_len: usize,
    negated: bool,
}

impl PatternScanner {
    /// Feed the next character; true when it has no structural meaning
    fn is_literal(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return true;
        }
        if c == '\\' {
            self.escaped = true;
            return true;
        }
        if self.in_class {
            let leading = self.class_len == 0 || (self.class_len == 1 && self.negated);
            if self.class_len == 0 && c == '^' {
                self.negated = true;
            }
            self.class_len += 1;
            if c == ']' && !leading {
                self.in_class = false;
            }
            return true;
        }
        if c == '[' {
            self.in_class = true;
            self.class_len = 0;
            self.negated = false;
            return true;
        }
        false
    }
}

/// Ordered set of branch rules
#[derive(Debug, Clone, Default)]
pub struct BranchMapping {
    rules: Vec<BranchRule>,
}

impl BranchMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rule; later rules take precedence over earlier ones
    pub fn push(&mut self, rule: BranchRule) {
        self.rules.push(rule);
    }

    /// Builder-style variant of [`BranchMapping::push`]
    pub fn with_rule(mut self, pattern: &str, tag: &str) -> Result<Self> {
        self.push(BranchRule::new(pattern, tag)?);
        Ok(self)
    }

    pub fn rules(&self) -> &[BranchRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve the deployment tag for a branch
    ///
    /// Returns the tag of the last matching rule, or `None` when no rule
    /// matches.
    pub fn resolve(&self, branch: &str) -> Option<&str> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.is_match(branch))
            .map(BranchRule::tag)
    }

    /// All rules matching a branch, in evaluation order
    ///
    /// More than one entry means the patterns overlap for this branch and only
    /// the last one takes effect.
    pub fn matches(&self, branch: &str) -> Vec<&BranchRule> {
        self.rules
            .iter()
            .filter(|rule| rule.is_match(branch))
            .collect()
    }

    /// Check whether any rule publishes the given tag
    pub fn publishes(&self, tag: &str) -> bool {
        self.rules.iter().any(|rule| rule.tag == tag)
    }
}

/// Check a string against the container image tag grammar
///
/// A tag is up to 128 characters of `[A-Za-z0-9_.-]` and must not start with
/// a period or a dash.
pub fn is_valid_image_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    tag.len() <= MAX_TAG_LEN
        && (first.is_ascii_alphanumeric() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
