// Copyright 2025 Cornell University
// released under MIT License

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::errors::DecodeError;

/// How processes are split into scenarios
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SeparationStrategy {
    /// One whole-process copy per savepoint
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Every alternative of every choice becomes a scenario
    #[serde(rename = "linear")]
    Linear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "SelectionOption")]
pub enum SelectionStrategy {
    #[default]
    Default,
    Combinatorial,
    Selective(SelectiveConfig),
}

#[derive(Deserialize)]
enum SelectionKeyword {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "use all scenarios combinations")]
    Combinatorial,
}

/// `"select scenarios"` is either a keyword or the selective settings
#[derive(Deserialize)]
#[serde(untagged)]
enum SelectionOption {
    Keyword(SelectionKeyword),
    Selective(SelectiveConfig),
}

impl From<SelectionOption> for SelectionStrategy {
    fn from(option: SelectionOption) -> Self {
        match option {
            SelectionOption::Keyword(SelectionKeyword::Default) => SelectionStrategy::Default,
            SelectionOption::Keyword(SelectionKeyword::Combinatorial) => {
                SelectionStrategy::Combinatorial
            }
            SelectionOption::Selective(config) => SelectionStrategy::Selective(config),
        }
    }
}

/// Scenarios of the process must contain all of these
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MustContain {
    #[serde(default)]
    pub actions: BTreeSet<String>,
    #[serde(default)]
    pub savepoint: Option<String>,
}

/// Scenarios of the process must contain none of these. Without any
/// entry the process is removed from the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MustNotContain {
    #[serde(default)]
    pub actions: Vec<BTreeSet<String>>,
    #[serde(default)]
    pub savepoints: BTreeSet<String>,
}

impl MustNotContain {
    pub fn removes_process(&self) -> bool {
        self.actions.is_empty() && self.savepoints.is_empty()
    }
}

/// Coverage target of a process. By default every action must appear in
/// some generated model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoverScenarios {
    #[serde(default)]
    pub actions: Option<BTreeSet<String>>,
    #[serde(rename = "actions except", default)]
    pub actions_except: BTreeSet<String>,
    /// Every savepoint must start some model, too
    #[serde(default)]
    pub savepoints: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectiveConfig {
    #[serde(rename = "must contain", default)]
    pub must_contain: BTreeMap<String, MustContain>,
    #[serde(rename = "must not contain", default)]
    pub must_not_contain: BTreeMap<String, MustNotContain>,
    #[serde(rename = "cover scenarios", default)]
    pub cover_scenarios: BTreeMap<String, CoverScenarios>,
    #[serde(rename = "greedy selection", default)]
    pub greedy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GeneratorConfig {
    #[serde(rename = "scenario separation", default)]
    pub separation: SeparationStrategy,
    #[serde(rename = "select scenarios", default)]
    pub selection: SelectionStrategy,
    #[serde(rename = "skip origin model", default)]
    pub skip_origin_model: bool,
    #[serde(rename = "skip savepoints", default)]
    pub skip_savepoints: bool,
}

impl GeneratorConfig {
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}
