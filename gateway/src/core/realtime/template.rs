//! Instruction text generation.
//!
//! The bridge does not write system instructions itself. It hands scenario
//! parameters to an [`InstructionTemplate`] and uses whatever text comes back.
//! [`PlaceholderTemplate`] is the built-in implementation: `{{name}}`
//! placeholders are substituted from the parameters.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::debug;

use super::session_config::ScenarioParameters;

/// Template used when no template file is configured.
pub const DEFAULT_TEMPLATE: &str = "You are {{persona}}, taking part in a spoken conversation. \
Scenario: {{scenario}}. Keep a {{mood}} tone and respond in {{language}}. \
Keep answers short and natural, as they will be spoken aloud.";

/// Values used for placeholders the parameters leave unset.
const DEFAULT_VALUES: &[(&str, &str)] = &[
    ("persona", "a friendly conversation partner"),
    ("scenario", "an open-ended conversation"),
    ("mood", "warm"),
    ("language", "English"),
];

fn default_values() -> HashMap<String, String> {
    DEFAULT_VALUES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Template errors
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Template is empty")]
    Empty,
}

/// Produces system instructions from scenario parameters.
pub trait InstructionTemplate: Send + Sync {
    fn render(&self, params: &ScenarioParameters) -> Result<String, TemplateError>;
}

/// `{{name}}` substitution over a fixed template text.
#[derive(Debug, Clone)]
pub struct PlaceholderTemplate {
    source: String,
    defaults: HashMap<String, String>,
}

impl PlaceholderTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(Self {
            source,
            defaults: default_values(),
        })
    }

    /// Load the template text from a file.
    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::new(source)
    }

    /// Override the value used when a placeholder is not supplied.
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Default for PlaceholderTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            defaults: default_values(),
        }
    }
}

impl InstructionTemplate for PlaceholderTemplate {
    fn render(&self, params: &ScenarioParameters) -> Result<String, TemplateError> {
        let rendered = PLACEHOLDER.replace_all(&self.source, |caps: &Captures<'_>| {
            let name = &caps[1];
            params
                .value(name)
                .or_else(|| self.defaults.get(name).cloned())
                .unwrap_or_else(|| {
                    debug!(placeholder = name, "No value for template placeholder");
                    String::new()
                })
        });
        Ok(rendered.trim().to_string())
    }
}
