//! Rubric prompt templates with `{{variable}}` slots.
//!
//! A template carries a system text, a user text and the current variable
//! bindings. Bindings are filled in at planning time from the session's story
//! context and later overwritten by adaptation strategies; rendering substitutes
//! every slot and fails if any slot is left without a binding.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::{Error, Result};

/// Regex pattern for template variables: `{{variable_name}}`.
static VARIABLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").unwrap_or_else(|_| unreachable!()));

/// A rubric prompt template plus its variable bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// System text sent to the generation provider.
    pub system: String,
    /// User text with `{{variable}}` placeholders.
    pub user: String,
    /// Current variable bindings, keyed by slot name.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
}

/// A template with every slot substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// Substituted system text.
    pub system: String,
    /// Substituted user text.
    pub user: String,
}

impl RenderedPrompt {
    /// SHA-256 hex digest of the rendered prompt.
    ///
    /// Stored next to generated content so a reader can tell which bindings
    /// produced it.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.system.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.user.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PromptTemplate {
    /// Creates a template with no bindings.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            bindings: BTreeMap::new(),
        }
    }

    /// Adds a binding.
    #[must_use]
    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bind(name, value);
        self
    }

    /// Sets or replaces one binding.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Merges bindings, replacing existing values for the same names.
    pub fn merge_bindings<I, K, V>(&mut self, bindings: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in bindings {
            self.bind(name, value);
        }
    }

    /// Names of every slot used in the system or user text, in order of first appearance.
    #[must_use]
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = extract_variables(&self.system);
        for name in extract_variables(&self.user) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Substitutes every slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming every slot without a binding.
    pub fn render(&self) -> Result<RenderedPrompt> {
        let missing: Vec<String> = self
            .variable_names()
            .into_iter()
            .filter(|name| !self.bindings.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "missing template bindings: {}",
                missing.join(", ")
            )));
        }

        Ok(RenderedPrompt {
            system: substitute_variables(&self.system, &self.bindings),
            user: substitute_variables(&self.user, &self.bindings),
        })
    }
}

/// Extracts variable names from content, deduplicated in order of first appearance.
#[must_use]
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in VARIABLE_PATTERN.captures_iter(content) {
        if let Some(m) = cap.get(1) {
            let name = m.as_str();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Replaces every bound `{{name}}` in `content`; unbound slots are left as-is.
#[must_use]
pub fn substitute_variables(content: &str, bindings: &BTreeMap<String, String>) -> String {
    VARIABLE_PATTERN
        .replace_all(content, |caps: &regex::Captures| {
            caps.get(1)
                .and_then(|m| bindings.get(m.as_str()))
                .map_or_else(|| caps[0].to_string(), String::clone)
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_variables_deduplicates() {
        let vars = extract_variables("{{name}} and {{name}} again, plus {{skill}}.");
        assert_eq!(vars, vec!["name".to_string(), "skill".to_string()]);
    }

    #[test]
    fn test_render_substitutes_both_texts() {
        let template = PromptTemplate::new("You teach grade {{grade}}.", "Teach {{skill}}.")
            .with_binding("grade", "3")
            .with_binding("skill", "fractions");
        let rendered = template.render().unwrap();
        assert_eq!(rendered.system, "You teach grade 3.");
        assert_eq!(rendered.user, "Teach fractions.");
    }

    #[test]
    fn test_render_reports_all_missing_bindings() {
        let template = PromptTemplate::new("{{a}}", "{{b}} {{c}}").with_binding("b", "x");
        let err = template.render().unwrap_err();
        let message = err.to_string();
        assert!(message.contains('a'));
        assert!(message.contains('c'));
        assert!(!message.contains("b,"));
    }

    #[test]
    fn test_merge_bindings_overwrites() {
        let mut template = PromptTemplate::new("", "{{level}}").with_binding("level", "low");
        template.merge_bindings([("level", "high")]);
        assert_eq!(template.render().unwrap().user, "high");
    }

    #[test]
    fn test_fingerprint_changes_with_bindings() {
        let a = PromptTemplate::new("", "{{x}}").with_binding("x", "1");
        let b = PromptTemplate::new("", "{{x}}").with_binding("x", "2");
        let fa = a.render().unwrap().fingerprint();
        let fb = b.render().unwrap().fingerprint();
        assert_eq!(fa.len(), 64);
        assert_ne!(fa, fb);
        assert_eq!(fa, a.render().unwrap().fingerprint());
    }
}
