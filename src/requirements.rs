// Copyright 2025 Cornell University
// released under MIT License

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::collection::ProcessCollection;
use crate::ir::Process;

/// Cross-process preconditions of an action or a savepoint.
/// Keys are process keys as used by `ProcessCollection::find`.
/// Listing required actions of a process implies that it is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Process key -> must be present (`true`) or absent (`false`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    processes: BTreeMap<String, bool>,
    /// Process key -> actions that process must retain
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    actions: BTreeMap<String, BTreeSet<String>>,
}

impl Requirements {
    pub fn require_process(&mut self, key: impl Into<String>, present: bool) {
        self.processes.insert(key.into(), present);
    }

    pub fn require_actions<I, S>(&mut self, key: impl Into<String>, actions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions
            .entry(key.into())
            .or_default()
            .extend(actions.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty() && self.actions.is_empty()
    }

    pub fn required_processes(&self) -> &BTreeMap<String, bool> {
        &self.processes
    }

    pub fn required_actions(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.actions
    }

    /// Keys of all processes mentioned by these requirements
    pub fn relevant_processes(&self) -> BTreeSet<&str> {
        self.processes
            .keys()
            .chain(self.actions.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn requires_presence(&self, key: &str) -> bool {
        self.processes.get(key) == Some(&true) || self.actions.contains_key(key)
    }

    pub fn requires_absence(&self, key: &str) -> bool {
        self.processes.get(key) == Some(&false)
    }

    /// Checks the requirements on process `key` against a candidate for it:
    /// `None` if the process is missing from the model, otherwise the names
    /// of the actions it retains.
    pub fn compatible(&self, key: &str, actions: Option<&BTreeSet<String>>) -> bool {
        match actions {
            None => !self.requires_presence(key),
            Some(present) => {
                !self.requires_absence(key)
                    && self
                        .actions
                        .get(key)
                        .is_none_or(|required| required.is_subset(present))
            }
        }
    }

    pub fn compatible_with_process(&self, key: &str, process: Option<&Process>) -> bool {
        let actions = process.map(Process::action_names);
        self.compatible(key, actions.as_ref())
    }

    /// Checks every mentioned process (or only `restrict_to`) against `model`
    pub fn compatible_with_model(&self, model: &ProcessCollection, restrict_to: Option<&str>) -> bool {
        self.relevant_processes()
            .into_iter()
            .filter(|key| restrict_to.is_none_or(|only| only == *key))
            .all(|key| self.compatible_with_process(key, model.find(key)))
    }

    /// Merges two requirement sets. Contradicting presence flags make the
    /// result unsatisfiable for that process.
    pub fn union(&self, other: &Requirements) -> Requirements {
        let mut merged = self.clone();
        for (key, present) in &other.processes {
            match merged.processes.get(key) {
                Some(existing) if existing != present => {
                    merged.processes.insert(key.clone(), false);
                    merged.actions.entry(key.clone()).or_default();
                }
                _ => {
                    merged.processes.insert(key.clone(), *present);
                }
            }
        }
        for (key, actions) in &other.actions {
            merged
                .actions
                .entry(key.clone())
                .or_default()
                .extend(actions.iter().cloned());
        }
        merged
    }

    /// Processes on which `self` and `other` demand opposite presence
    pub fn conflicts_with(&self, other: &Requirements) -> Vec<String> {
        let mut conflicts: BTreeSet<String> = BTreeSet::new();
        for key in self.relevant_processes().union(&other.relevant_processes()) {
            let disagree = (self.requires_presence(key) && other.requires_absence(key))
                || (self.requires_absence(key) && other.requires_presence(key));
            if disagree {
                conflicts.insert(key.to_string());
            }
        }
        conflicts.into_iter().collect()
    }
}
