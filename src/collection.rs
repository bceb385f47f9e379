// Copyright 2025 Cornell University
// released under MIT License

use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::{GenerationError, Result};
use crate::ir::Process;
use crate::requirements::Requirements;

/// All processes of an environment model.
/// Function models are keyed by name, environment processes by identity
/// (`category/name`); the entry process is found by its identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessCollection {
    pub name: String,
    /// Process key -> name of the scenario the process was built from
    pub attributes: BTreeMap<String, String>,
    pub models: BTreeMap<String, Process>,
    pub environment: BTreeMap<String, Process>,
    pub entry: Option<Process>,
}

impl ProcessCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_model(&mut self, process: Process) {
        self.models.insert(process.name.clone(), process);
    }

    pub fn add_environment(&mut self, process: Process) {
        self.environment.insert(process.identity(), process);
    }

    pub fn entry_key(&self) -> Option<String> {
        self.entry.as_ref().map(Process::identity)
    }

    pub fn find(&self, key: &str) -> Option<&Process> {
        self.models
            .get(key)
            .or_else(|| self.environment.get(key))
            .or_else(|| self.entry.as_ref().filter(|e| e.identity() == key))
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut Process> {
        if self.models.contains_key(key) {
            return self.models.get_mut(key);
        }
        if self.environment.contains_key(key) {
            return self.environment.get_mut(key);
        }
        self.entry.as_mut().filter(|e| e.identity() == key)
    }

    /// `(key, process)` pairs: models, then environment, then the entry
    pub fn processes(&self) -> Vec<(String, &Process)> {
        self.models
            .iter()
            .chain(self.environment.iter())
            .map(|(key, process)| (key.clone(), process))
            .chain(self.entry.iter().map(|e| (e.identity(), e)))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.processes().into_iter().map(|(key, _)| key).collect()
    }

    /// Recomputes the peers of every pair of processes from scratch
    pub fn establish_peers(&mut self) {
        let mut processes: Vec<&mut Process> = self
            .models
            .values_mut()
            .chain(self.environment.values_mut())
            .chain(self.entry.iter_mut())
            .collect();
        for process in processes.iter_mut() {
            process.peers.clear();
        }
        for i in 0..processes.len() {
            let (head, tail) = processes.split_at_mut(i + 1);
            let current = &mut head[i];
            for other in tail.iter_mut() {
                current.establish_peers(other);
            }
        }
    }

    /// Removes a process together with every peer link pointing at it
    pub fn remove_process(&mut self, key: &str) -> Option<Process> {
        let removed = if let Some(process) = self.models.remove(key) {
            Some(process)
        } else if let Some(process) = self.environment.remove(key) {
            Some(process)
        } else if self.entry_key().as_deref() == Some(key) {
            self.entry.take()
        } else {
            None
        }?;

        let identity = removed.identity();
        for process in self
            .models
            .values_mut()
            .chain(self.environment.values_mut())
            .chain(self.entry.iter_mut())
        {
            process.peers.remove(&identity);
        }
        self.attributes.remove(key);
        Some(removed)
    }

    fn requirements_by_key(&self) -> FxHashMap<String, Requirements> {
        self.processes()
            .into_iter()
            .map(|(key, process)| (key, process.requirements()))
            .collect()
    }

    /// Keys of processes whose requirements do not hold in this collection
    pub fn inconsistent_processes(&self) -> Vec<String> {
        self.processes()
            .into_iter()
            .filter(|(_, process)| !process.requirements().compatible_with_model(self, None))
            .map(|(key, _)| key)
            .collect()
    }

    /// Whether the requirements of every present action hold
    pub fn consistent(&self) -> bool {
        self.inconsistent_processes().is_empty()
    }

    /// Processes requiring `key` to be present, directly or through other
    /// requiring processes
    pub fn requiring_processes(&self, key: &str) -> BTreeSet<String> {
        let requirements = self.requirements_by_key();
        let mut closure: BTreeSet<String> = BTreeSet::from([key.to_string()]);
        loop {
            let added: Vec<String> = requirements
                .iter()
                .filter(|(candidate, _)| !closure.contains(*candidate))
                .filter(|(_, reqs)| closure.iter().any(|t| reqs.requires_presence(t)))
                .map(|(candidate, _)| candidate.clone())
                .collect();
            if added.is_empty() {
                break;
            }
            closure.extend(added);
        }
        closure.remove(key);
        closure
    }

    /// Processes that would become inconsistent if `key` were removed
    /// (`replacement` is `None`) or replaced by a process retaining only
    /// the `replacement` actions. Processes that break because a broken
    /// process disappears are included.
    pub fn broken_processes(
        &self,
        key: &str,
        replacement: Option<&BTreeSet<String>>,
    ) -> BTreeSet<String> {
        let requirements = self.requirements_by_key();
        let mut broken: BTreeSet<String> = requirements
            .iter()
            .filter(|(candidate, reqs)| *candidate != key && !reqs.compatible(key, replacement))
            .map(|(candidate, _)| candidate.clone())
            .collect();
        loop {
            let added: Vec<String> = requirements
                .iter()
                .filter(|(candidate, _)| *candidate != key && !broken.contains(*candidate))
                .filter(|(_, reqs)| broken.iter().any(|b| !reqs.compatible(b, None)))
                .map(|(candidate, _)| candidate.clone())
                .collect();
            if added.is_empty() {
                break;
            }
            broken.extend(added);
        }
        broken
    }

    /// Reports references to unknown processes or actions and savepoints
    /// declared under the same name by different processes
    pub fn validate(&self) -> Result<()> {
        let mut savepoint_owners: BTreeMap<&str, String> = BTreeMap::new();
        for (key, process) in self.processes() {
            for (_, action) in process.actions() {
                let mut checked = vec![&action.requirements, &action.weak_requirements];
                checked.extend(action.savepoints.iter().map(|s| &s.requirements));
                for requirements in checked {
                    self.check_references(&key, requirements)?;
                }
            }
            for (_, savepoint) in process.savepoints() {
                if let Some(first) = savepoint_owners.get(savepoint.name.as_str()) {
                    return Err(GenerationError::SavepointCollision {
                        savepoint: savepoint.name.clone(),
                        first: first.clone(),
                        second: key.clone(),
                    });
                }
                savepoint_owners.insert(&savepoint.name, key.clone());
            }
        }
        Ok(())
    }

    fn check_references(&self, key: &str, requirements: &Requirements) -> Result<()> {
        for required in requirements.relevant_processes() {
            let Some(process) = self.find(required) else {
                return Err(GenerationError::UnknownProcess {
                    process: key.to_string(),
                    required: required.to_string(),
                });
            };
            let actions = requirements.required_actions().get(required);
            for action in actions.into_iter().flatten() {
                if process.action(action).is_none() {
                    return Err(GenerationError::UnknownAction {
                        process: key.to_string(),
                        required: required.to_string(),
                        action: action.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Canonical name built from the scenario chosen for every process
    pub fn attributed_name(&self) -> String {
        if self.attributes.is_empty() {
            return "base".to_string();
        }
        self.attributes
            .iter()
            .map(|(key, scenario)| format!("{key}:{scenario}"))
            .join("+")
    }
}
