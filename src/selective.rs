// Copyright 2025 Cornell University
// released under MIT License

use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SelectiveConfig;
use crate::errors::{GenerationError, Result};
use crate::ir::Process;
use crate::requirements::Requirements;
use crate::scenario::Scenario;
use crate::selectors::{
    Assignment, ScenarioCollection, Selection, SelectionContext, Selections, Selector,
};

/// Something a coverage target asks to appear in some model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Coverage {
    Action(String),
    Savepoint(String),
}

/// A way a process may appear in a model, with what it brings along
#[derive(Debug, Clone)]
struct Candidate<'a> {
    assignment: Assignment<'a>,
    actions: BTreeSet<String>,
    requirements: Requirements,
    savepoint: Option<&'a str>,
}

impl<'a> Candidate<'a> {
    fn kept(process: &Process) -> Self {
        Self {
            assignment: Assignment::Keep,
            actions: process.action_names(),
            requirements: process.requirements(),
            savepoint: None,
        }
    }

    fn scenario(scenario: &'a Scenario) -> Self {
        Self {
            assignment: Assignment::Use(scenario),
            actions: scenario.action_names(),
            requirements: scenario.process.requirements(),
            savepoint: scenario.savepoint_name(),
        }
    }

    fn covers(&self, item: &Coverage) -> bool {
        match item {
            Coverage::Action(action) => self.actions.contains(action),
            Coverage::Savepoint(savepoint) => self.savepoint == Some(savepoint.as_str()),
        }
    }
}

/// A process decided for the model under construction
struct Decision<'a> {
    /// `None` if the process is deleted
    candidate: Option<Candidate<'a>>,
}

impl Decision<'_> {
    fn actions(&self) -> Option<&BTreeSet<String>> {
        self.candidate.as_ref().map(|c| &c.actions)
    }
}

/// Builds models until every coverage target appeared in one of them,
/// respecting the "must (not) contain" filters and the requirements
/// between the chosen scenarios
pub struct SelectiveSelector<'a> {
    context: SelectionContext<'a>,
    config: &'a SelectiveConfig,
}

impl<'a> SelectiveSelector<'a> {
    pub fn new(context: SelectionContext<'a>, config: &'a SelectiveConfig) -> Self {
        Self { context, config }
    }

    fn mandatory(&self, key: &str) -> bool {
        self.config.must_contain.contains_key(key)
    }

    /// Coverage targets first, then processes that must be present, then the rest
    fn order(&self) -> Vec<String> {
        let mut order: Vec<String> = vec![];
        let keys = self
            .config
            .cover_scenarios
            .keys()
            .chain(self.config.must_contain.keys())
            .chain(self.context.keys());
        for key in keys {
            if self.context.scenarios.contains_key(key) && !order.contains(key) {
                order.push(key.clone());
            }
        }
        order
    }

    /// Candidates of `key` passing the "must (not) contain" filters
    fn candidates(&self, key: &str) -> Vec<Candidate<'a>> {
        let mut candidates: Vec<Candidate<'a>> = self
            .context
            .plain(key)
            .into_iter()
            .chain(self.context.anchored(key))
            .map(Candidate::scenario)
            .collect();
        if candidates.iter().all(|c| c.savepoint.is_some()) {
            if let Some(process) = self.context.model.find(key) {
                candidates.insert(0, Candidate::kept(process));
            }
        }

        if let Some(filter) = self.config.must_contain.get(key) {
            candidates.retain(|c| {
                filter.actions.is_subset(&c.actions)
                    && filter
                        .savepoint
                        .as_deref()
                        .is_none_or(|s| c.savepoint == Some(s))
            });
        }
        if let Some(filter) = self.config.must_not_contain.get(key) {
            if filter.removes_process() {
                return vec![];
            }
            candidates.retain(|c| {
                !filter.actions.iter().any(|a| a.is_subset(&c.actions))
                    && c.savepoint.is_none_or(|s| !filter.savepoints.contains(s))
            });
        }
        candidates
    }

    /// Items the coverage targets ask for which some candidate can provide
    fn coverage(&self, candidates: &BTreeMap<String, Vec<Candidate<'a>>>) -> BTreeSet<(String, Coverage)> {
        let mut items = BTreeSet::new();
        for (key, target) in &self.config.cover_scenarios {
            let Some(process) = self.context.model.find(key) else {
                warn!("coverage target {key} is not a process of the model");
                continue;
            };
            let actions = target
                .actions
                .clone()
                .unwrap_or_else(|| process.action_names());
            let mut wanted: Vec<Coverage> = actions
                .difference(&target.actions_except)
                .cloned()
                .map(Coverage::Action)
                .collect();
            if target.savepoints && !self.context.skip_savepoints {
                wanted.extend(
                    process
                        .savepoints()
                        .map(|(_, s)| Coverage::Savepoint(s.name.clone())),
                );
            }
            let available = candidates.get(key).map(Vec::as_slice).unwrap_or_default();
            for item in wanted {
                let coverable = available.iter().any(|c| {
                    c.covers(&item)
                        && candidates.iter().filter(|(other, _)| *other != key).all(
                            |(other, options)| {
                                satisfiable(&c.requirements, other, options, !self.mandatory(other))
                            },
                        )
                });
                if coverable {
                    items.insert((key.clone(), item));
                } else {
                    info!("{item:?} of {key} cannot be covered under the filters and requirements");
                }
            }
        }
        items
    }
}

/// Whether some option for process `key` meets `requirements`. A process
/// that may be deleted also meets requirements that do not need it.
fn satisfiable(
    requirements: &Requirements,
    key: &str,
    options: &[Candidate],
    deletable: bool,
) -> bool {
    (deletable && requirements.compatible(key, None))
        || options
            .iter()
            .any(|c| requirements.compatible(key, Some(&c.actions)))
}

/// Whether `candidate` for `key` agrees with the processes decided so far
/// and leaves every undecided process an option
fn admissible(
    key: &str,
    candidate: &Candidate,
    decided: &BTreeMap<String, Decision>,
    undecided: &BTreeSet<String>,
    candidates: &BTreeMap<String, Vec<Candidate>>,
    mandatory: &BTreeSet<String>,
) -> bool {
    let stranded = undecided.iter().any(|other| {
        let options = candidates.get(other).map(Vec::as_slice).unwrap_or_default();
        !satisfiable(&candidate.requirements, other, options, !mandatory.contains(other))
    });
    if stranded {
        return false;
    }
    if candidate.savepoint.is_some()
        && decided
            .values()
            .any(|d| d.candidate.as_ref().is_some_and(|c| c.savepoint.is_some()))
    {
        return false;
    }
    for (other, decision) in decided {
        let theirs = decision.candidate.as_ref();
        // what the decided process requires of this one
        if let Some(theirs) = theirs {
            if !theirs.requirements.compatible(key, Some(&candidate.actions)) {
                return false;
            }
        }
        // what this one requires of the decided process
        if !candidate.requirements.compatible(other, decision.actions()) {
            return false;
        }
        // contradicting demands on processes yet to be decided
        if let Some(theirs) = theirs {
            let conflicts = candidate.requirements.conflicts_with(&theirs.requirements);
            if conflicts.iter().any(|c| undecided.contains(c)) {
                return false;
            }
        }
    }
    true
}

impl<'a> Selector<'a> for SelectiveSelector<'a> {
    fn selections(&self) -> Selections<'a> {
        let order = self.order();
        let candidates: BTreeMap<String, Vec<Candidate<'a>>> = order
            .iter()
            .map(|key| (key.clone(), self.candidates(key)))
            .collect();
        let uncovered = self.coverage(&candidates);
        let mandatory = order.iter().filter(|k| self.mandatory(k)).cloned().collect();
        Box::new(SelectiveSelections {
            order,
            candidates,
            mandatory,
            uncovered,
            greedy: self.config.greedy,
            produced: 0,
            finished: false,
        })
    }
}

/// The lazy sequence of models of a `SelectiveSelector`
struct SelectiveSelections<'a> {
    order: Vec<String>,
    candidates: BTreeMap<String, Vec<Candidate<'a>>>,
    mandatory: BTreeSet<String>,
    uncovered: BTreeSet<(String, Coverage)>,
    greedy: bool,
    produced: usize,
    finished: bool,
}

impl<'a> SelectiveSelections<'a> {
    fn gain(&self, key: &str, candidate: &Candidate) -> usize {
        self.uncovered
            .iter()
            .filter(|(k, item)| k == key && candidate.covers(item))
            .count()
    }

    fn pick<'c>(&self, key: &str, admissible: &[&'c Candidate<'a>]) -> &'c Candidate<'a> {
        let gains: Vec<usize> = admissible.iter().map(|c| self.gain(key, c)).collect();
        let index = if self.greedy {
            // first of the candidates covering the most
            let best = gains.iter().copied().max().unwrap_or(0);
            gains.iter().position(|g| *g == best)
        } else {
            gains.iter().position(|g| *g > 0)
        };
        admissible[index.unwrap_or(0)]
    }

    fn build(&self) -> Result<Selection<'a>> {
        let mut decided: BTreeMap<String, Decision<'a>> = BTreeMap::new();
        let mut undecided: BTreeSet<String> = self.order.iter().cloned().collect();
        let mut related = None;
        for key in &self.order {
            undecided.remove(key);
            let admissible: Vec<&Candidate<'a>> = self.candidates[key]
                .iter()
                .filter(|c| {
                    admissible(
                        key,
                        c,
                        &decided,
                        &undecided,
                        &self.candidates,
                        &self.mandatory,
                    )
                })
                .collect();
            let candidate = if admissible.is_empty() {
                let required = decided.values().any(|d| {
                    d.candidate
                        .as_ref()
                        .is_some_and(|c| c.requirements.requires_presence(key))
                });
                if self.mandatory.contains(key) || required {
                    return Err(GenerationError::NoAdmissibleScenario {
                        process: key.clone(),
                    });
                }
                debug!("no admissible scenario of {key}, deleting it");
                None
            } else {
                let chosen = self.pick(key, &admissible);
                if related.is_none() && self.gain(key, chosen) > 0 {
                    related = Some(key.clone());
                }
                Some(chosen.clone())
            };
            decided.insert(key.clone(), Decision { candidate });
        }

        let assignments = decided
            .into_iter()
            .map(|(key, d)| {
                let assignment = d.candidate.map_or(Assignment::Delete, |c| c.assignment);
                (key, assignment)
            })
            .collect();
        Ok(Selection {
            scenarios: ScenarioCollection { assignments },
            related,
        })
    }

    fn covered_by(&self, selection: &Selection) -> Vec<(String, Coverage)> {
        self.uncovered
            .iter()
            .filter(|(key, item)| {
                let candidate = match selection.scenarios.assignments.get(key) {
                    Some(Assignment::Use(scenario)) => {
                        self.candidates[key].iter().find(|c| match c.assignment {
                            Assignment::Use(s) => std::ptr::eq(s, *scenario),
                            _ => false,
                        })
                    }
                    Some(Assignment::Keep) => self.candidates[key]
                        .iter()
                        .find(|c| c.assignment == Assignment::Keep),
                    _ => None,
                };
                candidate.is_some_and(|c| c.covers(item))
            })
            .cloned()
            .collect()
    }
}

impl<'a> Iterator for SelectiveSelections<'a> {
    type Item = Result<Selection<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || (self.produced > 0 && self.uncovered.is_empty()) {
            return None;
        }
        let selection = match self.build() {
            Ok(selection) => selection,
            Err(error) => {
                self.finished = true;
                return Some(Err(error));
            }
        };
        let covered = self.covered_by(&selection);
        if covered.is_empty() && !self.uncovered.is_empty() {
            self.finished = true;
            let process = self
                .uncovered
                .first()
                .map(|(key, _)| key.clone())
                .unwrap_or_default();
            return Some(Err(GenerationError::FixpointStalled {
                stage: "scenario coverage",
                process,
                remaining: self.uncovered.len(),
            }));
        }
        for item in &covered {
            self.uncovered.remove(item);
        }
        debug!(
            "selected model covers {} items, {} left",
            covered.len(),
            self.uncovered.len()
        );
        self.produced += 1;
        Some(Ok(selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ProcessCollection;
    use crate::config::{
        CoverScenarios, GeneratorConfig, MustContain, MustNotContain, SeparationStrategy,
    };
    use crate::ir::tests::build_process;
    use crate::selectors::tests::{describe, scenarios_of, with_savepoint};

    fn run(
        model: &ProcessCollection,
        strategy: SeparationStrategy,
        selective: &SelectiveConfig,
    ) -> Result<Vec<String>> {
        let scenarios = scenarios_of(model, strategy);
        let config = GeneratorConfig::default();
        let selector =
            SelectiveSelector::new(SelectionContext::new(model, &scenarios, &config), selective);
        selector
            .selections()
            .map(|s| s.map(|s| describe(&s)))
            .collect()
    }

    fn cover(key: &str) -> BTreeMap<String, CoverScenarios> {
        BTreeMap::from([(key.to_string(), CoverScenarios::default())])
    }

    fn model() -> ProcessCollection {
        let mut model = ProcessCollection::new("test");
        model.add_environment(build_process("c/a", "(!reg_a).(<x> | <y> | <z>)", &[]));
        model.add_environment(build_process("c/b", "(!reg_b).(<p> | <q>)", &[]));
        model
    }

    #[test]
    fn one_model_without_targets() {
        let selected = run(&model(), SeparationStrategy::Linear, &SelectiveConfig::default());
        assert_eq!(selected.unwrap(), vec!["c/a:x c/b:p"]);
    }

    #[test]
    fn cover_every_action() {
        let config = SelectiveConfig {
            cover_scenarios: cover("c/a"),
            ..Default::default()
        };
        let selected = run(&model(), SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:x c/b:p", "c/a:y c/b:p", "c/a:z c/b:p"]);
    }

    #[test]
    fn filters_restrict_candidates() {
        let config = SelectiveConfig {
            cover_scenarios: cover("c/a"),
            must_not_contain: BTreeMap::from([(
                "c/a".to_string(),
                MustNotContain {
                    actions: vec![BTreeSet::from(["y".to_string()])],
                    ..Default::default()
                },
            )]),
            must_contain: BTreeMap::from([(
                "c/b".to_string(),
                MustContain {
                    actions: BTreeSet::from(["q".to_string()]),
                    savepoint: None,
                },
            )]),
            greedy: false,
        };
        let selected = run(&model(), SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:x c/b:q", "c/a:z c/b:q"]);
    }

    #[test]
    fn removed_process_is_deleted() {
        let config = SelectiveConfig {
            must_not_contain: BTreeMap::from([("c/b".to_string(), MustNotContain::default())]),
            ..Default::default()
        };
        let selected = run(&model(), SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:x c/b:-"]);
    }

    #[test]
    fn mandatory_process_without_scenario() {
        let config = SelectiveConfig {
            must_contain: BTreeMap::from([(
                "c/b".to_string(),
                MustContain {
                    actions: BTreeSet::from(["missing".to_string()]),
                    savepoint: None,
                },
            )]),
            ..Default::default()
        };
        assert_eq!(
            run(&model(), SeparationStrategy::Linear, &config),
            Err(GenerationError::NoAdmissibleScenario {
                process: "c/b".to_string()
            })
        );
    }

    #[test]
    fn requirements_between_choices() {
        let mut model = model();
        // scenario y of c/a needs c/b to retain q
        let a = model.find_mut("c/a").unwrap();
        let y = a.action_id("y").unwrap();
        a[y].requirements.require_actions("c/b", ["q"]);

        let config = SelectiveConfig {
            cover_scenarios: cover("c/a"),
            ..Default::default()
        };
        let selected = run(&model, SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:x c/b:p", "c/a:y c/b:q", "c/a:z c/b:p"]);
    }

    #[test]
    fn requirement_excluded_by_filters_is_not_covered() {
        let mut model = ProcessCollection::new("test");
        model.add_environment(build_process("c/a", "(!reg_a).(<x> | <y>)", &[]));
        model.add_environment(build_process("c/b", "(!reg_b).(<p> | <r>)", &[]));
        // y needs c/b to retain r, which the filters remove
        let a = model.find_mut("c/a").unwrap();
        let y = a.action_id("y").unwrap();
        a[y].requirements.require_actions("c/b", ["r"]);

        let config = SelectiveConfig {
            cover_scenarios: cover("c/a"),
            must_not_contain: BTreeMap::from([(
                "c/b".to_string(),
                MustNotContain {
                    actions: vec![BTreeSet::from(["r".to_string()])],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        let selected = run(&model, SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:x c/b:p"]);
    }

    #[test]
    fn greedy_selection_covers_savepoints() {
        let mut model = ProcessCollection::new("test");
        model.add_environment(with_savepoint(
            build_process("c/a", "(!reg_a).(<x> | <y>)", &[]),
            "reg_a",
            "sa",
        ));
        let config = SelectiveConfig {
            cover_scenarios: BTreeMap::from([(
                "c/a".to_string(),
                CoverScenarios {
                    actions: Some(BTreeSet::from(["x".to_string(), "y".to_string()])),
                    savepoints: true,
                    ..Default::default()
                },
            )]),
            greedy: true,
            ..Default::default()
        };
        let selected = run(&model, SeparationStrategy::Linear, &config).unwrap();
        assert_eq!(selected, vec!["c/a:sa_x", "c/a:y"]);
    }

    #[test]
    fn default_separation_keeps_the_original() {
        let mut model = ProcessCollection::new("test");
        model.add_environment(with_savepoint(
            build_process("c/a", "(!reg_a).<x>", &[]),
            "reg_a",
            "sa",
        ));
        let config = SelectiveConfig {
            cover_scenarios: BTreeMap::from([(
                "c/a".to_string(),
                CoverScenarios {
                    savepoints: true,
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };
        let selected = run(&model, SeparationStrategy::Default, &config).unwrap();
        assert_eq!(selected, vec!["c/a:base", "c/a:sa"]);
    }
}
