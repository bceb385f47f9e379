// Copyright 2025 Cornell University
// released under MIT License

use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;

use crate::collection::ProcessCollection;
use crate::config::GeneratorConfig;
use crate::errors::Result;
use crate::ir::{ActionKind, Process};
use crate::scenario::Scenario;
use crate::selectors::{selector, Assignment, Selection, SelectionContext, Selections};
use crate::separation::separate;

pub const STUB_COMMENT: &str = "Skip the action, since no peers has been found.";

/// Extracts scenarios from the processes of a collection and turns
/// selections of them into complete models
pub struct ModelFactory<'a> {
    model: &'a ProcessCollection,
    config: &'a GeneratorConfig,
}

impl<'a> ModelFactory<'a> {
    pub fn new(model: &'a ProcessCollection, config: &'a GeneratorConfig) -> Self {
        Self { model, config }
    }

    /// Scenarios of the environment processes and the entry process
    pub fn scenarios(&self) -> Result<BTreeMap<String, Vec<Scenario>>> {
        let mut scenarios = BTreeMap::new();
        let processes = self
            .model
            .environment
            .iter()
            .map(|(key, process)| (key.clone(), process))
            .chain(self.model.entry.iter().map(|e| (e.identity(), e)));
        for (key, process) in processes {
            scenarios.insert(key, separate(self.config.separation, process)?);
        }
        Ok(scenarios)
    }

    /// The models built from `scenarios`, produced one at a time
    pub fn models(&self, scenarios: &'a BTreeMap<String, Vec<Scenario>>) -> Models<'a> {
        let context = SelectionContext::new(self.model, scenarios, self.config);
        let selections = selector(&self.config.selection, context).selections();
        Models {
            model: self.model,
            selections,
            seen: FxHashSet::default(),
            skip_origin: self.config.skip_origin_model,
            failed: false,
        }
    }
}

/// Lazy sequence of distinct consistent models
pub struct Models<'a> {
    model: &'a ProcessCollection,
    selections: Selections<'a>,
    /// Canonical names of the models produced so far
    seen: FxHashSet<String>,
    skip_origin: bool,
    failed: bool,
}

impl Models<'_> {
    fn materialize(&self, selection: &Selection) -> ProcessCollection {
        let mut variant = self.model.clone();
        let entry = self.model.entry_key();
        for (key, assignment) in &selection.scenarios.assignments {
            match assignment {
                Assignment::Keep => {
                    variant.attributes.insert(key.clone(), "base".to_string());
                }
                Assignment::Delete => {
                    variant.remove_process(key);
                }
                Assignment::Use(scenario) => {
                    if entry.as_deref() == Some(key.as_str()) {
                        variant.entry = Some(scenario.process.clone());
                    } else {
                        variant
                            .environment
                            .insert(key.clone(), scenario.process.clone());
                    }
                    variant
                        .attributes
                        .insert(key.clone(), scenario.name.clone());
                }
            }
        }
        variant
    }

    /// Processes waiting for a replicative receive need a peer sending it,
    /// the others start on their own
    fn activated(process: &Process) -> bool {
        let peered = process.peered_signals();
        let receives: Vec<&str> = process
            .initial_actions()
            .into_iter()
            .map(|node| process.described(node))
            .filter(|action| action.is_replicative_receive())
            .map(|action| action.name.as_str())
            .collect();
        receives.is_empty() || receives.iter().any(|name| peered.contains(name))
    }

    /// Removes environment processes nobody activates and nobody requires
    fn prune(variant: &mut ProcessCollection) {
        loop {
            let processes = variant.processes();
            let orphans: Vec<String> = variant
                .environment
                .iter()
                .filter(|(_, process)| !Self::activated(process))
                .filter(|(key, _)| {
                    !processes.iter().any(|(other, process)| {
                        other != *key
                            && (process.requirements().requires_presence(key)
                                || process.weak_requirements().requires_presence(key))
                    })
                })
                .map(|(key, _)| key.clone())
                .collect();
            if orphans.is_empty() {
                break;
            }
            for key in orphans {
                debug!("removing {key} since no process activates it");
                variant.remove_process(&key);
            }
        }
    }

    /// Replaces signals without peers by empty blocks
    fn stub_signals(variant: &mut ProcessCollection) {
        for process in variant
            .models
            .values_mut()
            .chain(variant.environment.values_mut())
            .chain(variant.entry.iter_mut())
        {
            for id in process.unmatched_signals() {
                warn!(
                    "{} of {} has no peers, replacing it with an empty block",
                    process[id].name,
                    process.identity()
                );
                let action = &mut process[id];
                action.kind = ActionKind::Block { statements: vec![] };
                action.comment = Some(STUB_COMMENT.to_string());
            }
        }
    }
}

impl Iterator for Models<'_> {
    type Item = Result<ProcessCollection>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let selection = match self.selections.next()? {
                Ok(selection) => selection,
                Err(error) => {
                    self.failed = true;
                    return Some(Err(error));
                }
            };
            let mut variant = self.materialize(&selection);
            // linear base scenarios rebuild the original model too
            if self.skip_origin && variant.attributes.values().all(|a| a == "base") {
                debug!("skipping origin model {}", variant.attributed_name());
                continue;
            }
            variant.establish_peers();
            Self::prune(&mut variant);
            Self::stub_signals(&mut variant);

            let name = variant.attributed_name();
            if !variant.consistent() {
                info!(
                    "skipping model {name}: requirements of {} do not hold",
                    variant.inconsistent_processes().join(", ")
                );
                continue;
            }
            if !self.seen.insert(name.clone()) {
                debug!("skipping duplicate model {name}");
                continue;
            }
            match &selection.related {
                Some(related) => info!("generated model {name} around {related}"),
                None => info!("generated model {name}"),
            }
            variant.name = name;
            return Some(Ok(variant));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SelectionStrategy, SeparationStrategy};
    use crate::ir::tests::build_process;
    use crate::ir::Savepoint;
    use crate::serialize::serialize_process;

    fn generate(model: &ProcessCollection, config: &GeneratorConfig) -> Vec<ProcessCollection> {
        let factory = ModelFactory::new(model, config);
        let scenarios = factory.scenarios().unwrap();
        let models: Vec<ProcessCollection> =
            factory.models(&scenarios).map(|m| m.unwrap()).collect();
        models
    }

    fn names(models: &[ProcessCollection]) -> Vec<&str> {
        models.iter().map(|m| m.name.as_str()).collect()
    }

    fn add_savepoint(process: &mut Process, action: &str, savepoint: Savepoint) {
        let id = process.action_id(action).unwrap();
        process[id].savepoints.push(savepoint);
    }

    /// An entry process registering two drivers
    fn drivers() -> ProcessCollection {
        let mut model = ProcessCollection::new("drivers");
        model.entry = Some(build_process("main/entry", "<init>.[reg_a].[reg_b]", &[]));
        let mut a = build_process("c/a", "(!reg_a).<probe_a>", &[]);
        add_savepoint(&mut a, "reg_a", Savepoint::new("sa", vec!["init_a();".into()]));
        let mut b = build_process("c/b", "(!reg_b).<probe_b>", &[]);
        add_savepoint(&mut b, "reg_b", Savepoint::new("sb", vec![]));
        model.add_environment(a);
        model.add_environment(b);
        model
    }

    fn linear_combinations() -> GeneratorConfig {
        GeneratorConfig {
            separation: SeparationStrategy::Linear,
            selection: SelectionStrategy::Combinatorial,
            ..Default::default()
        }
    }

    #[test]
    fn default_models() {
        let models = generate(&drivers(), &GeneratorConfig::default());
        assert_eq!(
            names(&models),
            vec![
                "c/a:base+c/b:base+main/entry:base",
                "c/a:sa+c/b:base+main/entry:base",
                "c/a:base+c/b:sb+main/entry:base",
            ]
        );
        let anchored = models[1].find("c/a").unwrap();
        assert_eq!(serialize_process(anchored), "<sa>.<probe_a>");
        for model in &models {
            assert!(model.consistent());
        }
    }

    #[test]
    fn combinatorial_models_are_deduplicated() {
        let models = generate(&drivers(), &linear_combinations());
        // the base combination of linear scenarios equals the original model.
        // Each savepoint starts its own model and two savepoints never share
        // one, so both drivers with savepoints give three models.
        assert_eq!(
            names(&models),
            vec![
                "c/a:base+c/b:base+main/entry:base",
                "c/a:sa+c/b:base+main/entry:base",
                "c/a:base+c/b:sb+main/entry:base",
            ]
        );

        let mut single = drivers();
        let b = single.find_mut("c/b").unwrap();
        let reg_b = b.action_id("reg_b").unwrap();
        b[reg_b].savepoints.clear();
        let models = generate(&single, &linear_combinations());
        assert_eq!(models.len(), 2);
    }

    #[test]
    fn linear_origin_is_skipped() {
        let config = GeneratorConfig {
            skip_origin_model: true,
            ..linear_combinations()
        };
        let models = generate(&drivers(), &config);
        assert_eq!(
            names(&models),
            vec![
                "c/a:sa+c/b:base+main/entry:base",
                "c/a:base+c/b:sb+main/entry:base",
            ]
        );
    }

    #[test]
    fn anchored_process_loses_its_activation() {
        let models = generate(&drivers(), &GeneratorConfig::default());
        // c/a starts from its savepoint, so the entry dispatch has no peer anymore
        let entry = models[1].entry.as_ref().unwrap();
        let reg_a = entry.action("reg_a").unwrap();
        assert_eq!(reg_a.kind, ActionKind::Block { statements: vec![] });
        assert_eq!(reg_a.comment.as_deref(), Some(STUB_COMMENT));
        let reg_b = entry.action("reg_b").unwrap();
        assert!(reg_b.is_signal());
    }

    #[test]
    fn orphans_are_pruned() {
        let mut model = drivers();
        model.add_environment(build_process("c/orphan", "(!nobody).<work>", &[]));
        let models = generate(&model, &GeneratorConfig::default());
        assert!(models.iter().all(|m| m.find("c/orphan").is_none()));
        assert_eq!(models[0].name, "c/a:base+c/b:base+main/entry:base");
    }

    #[test]
    fn required_orphans_stay() {
        let mut model = drivers();
        model.add_environment(build_process("c/orphan", "(!nobody).<work>", &[]));
        let a = model.find_mut("c/a").unwrap();
        let probe = a.action_id("probe_a").unwrap();
        a[probe].weak_requirements.require_process("c/orphan", true);
        let models = generate(&model, &GeneratorConfig::default());
        let orphan = models[0].find("c/orphan").unwrap();
        // the receive is kept as a stub
        assert_eq!(
            orphan.action("nobody").unwrap().comment.as_deref(),
            Some(STUB_COMMENT)
        );
    }

    #[test]
    fn inconsistent_models_are_skipped() {
        let mut model = drivers();
        let a = model.find_mut("c/a").unwrap();
        let id = a.action_id("reg_a").unwrap();
        a[id].savepoints[0]
            .requirements
            .require_process("c/b", false);
        let models = generate(&model, &GeneratorConfig::default());
        assert_eq!(
            names(&models),
            vec![
                "c/a:base+c/b:base+main/entry:base",
                "c/a:base+c/b:sb+main/entry:base",
            ]
        );
        for model in &models {
            assert!(model.consistent());
        }
    }

    #[test]
    fn source_model_is_untouched() {
        let model = drivers();
        let before = model.clone();
        let _ = generate(&model, &linear_combinations());
        assert_eq!(model, before);
    }
}
