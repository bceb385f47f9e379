// Copyright 2025 Cornell University
// released under MIT License

use itertools::Itertools;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::iter;

use crate::collection::ProcessCollection;
use crate::config::{GeneratorConfig, SelectionStrategy};
use crate::errors::Result;
use crate::scenario::Scenario;
use crate::selective::SelectiveSelector;

/// What a model does with one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment<'a> {
    /// The process of the original collection
    Keep,
    Delete,
    Use(&'a Scenario),
}

impl Assignment<'_> {
    /// The name recorded in the model's attributes
    pub fn label(&self) -> Option<&str> {
        match self {
            Assignment::Keep => Some("base"),
            Assignment::Delete => None,
            Assignment::Use(scenario) => Some(&scenario.name),
        }
    }
}

/// A per-process assignment describing one model to build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioCollection<'a> {
    pub assignments: BTreeMap<String, Assignment<'a>>,
}

impl<'a> ScenarioCollection<'a> {
    pub fn keep_all<'k>(keys: impl IntoIterator<Item = &'k String>) -> Self {
        Self {
            assignments: keys
                .into_iter()
                .map(|key| (key.clone(), Assignment::Keep))
                .collect(),
        }
    }

    /// Whether the model would be the original collection
    pub fn is_origin(&self) -> bool {
        self.assignments.values().all(|a| *a == Assignment::Keep)
    }

    /// At most one savepoint may start a model
    pub fn savepoint(&self) -> Option<&'a str> {
        self.assignments.values().find_map(|a| match *a {
            Assignment::Use(scenario) => scenario.savepoint_name(),
            _ => None,
        })
    }
}

/// One model to build and the process it was built around, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<'a> {
    pub scenarios: ScenarioCollection<'a>,
    pub related: Option<String>,
}

pub type Selections<'a> = Box<dyn Iterator<Item = Result<Selection<'a>>> + 'a>;

/// Everything a selector may look at
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub model: &'a ProcessCollection,
    /// Process key -> scenarios extracted from it
    pub scenarios: &'a BTreeMap<String, Vec<Scenario>>,
    pub skip_origin_model: bool,
    pub skip_savepoints: bool,
}

impl<'a> SelectionContext<'a> {
    pub fn new(
        model: &'a ProcessCollection,
        scenarios: &'a BTreeMap<String, Vec<Scenario>>,
        config: &GeneratorConfig,
    ) -> Self {
        Self {
            model,
            scenarios,
            skip_origin_model: config.skip_origin_model,
            skip_savepoints: config.skip_savepoints,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a String> {
        self.scenarios.keys()
    }

    pub fn origin(&self) -> ScenarioCollection<'a> {
        ScenarioCollection::keep_all(self.keys())
    }

    /// Scenarios of `key` that start from the process' own initial state
    pub fn plain(&self, key: &str) -> Vec<&'a Scenario> {
        self.scenarios
            .get(key)
            .into_iter()
            .flatten()
            .filter(|s| s.savepoint.is_none())
            .collect()
    }

    /// Scenarios of `key` that start from a savepoint
    pub fn anchored(&self, key: &str) -> Vec<&'a Scenario> {
        if self.skip_savepoints {
            return vec![];
        }
        self.scenarios
            .get(key)
            .into_iter()
            .flatten()
            .filter(|s| s.savepoint.is_some())
            .collect()
    }
}

pub trait Selector<'a> {
    /// Lazily produces the models to build, in a deterministic order
    fn selections(&self) -> Selections<'a>;
}

/// The original model and one model per distinct savepoint
pub struct DefaultSelector<'a> {
    context: SelectionContext<'a>,
}

impl<'a> DefaultSelector<'a> {
    pub fn new(context: SelectionContext<'a>) -> Self {
        Self { context }
    }
}

impl<'a> Selector<'a> for DefaultSelector<'a> {
    fn selections(&self) -> Selections<'a> {
        let context = self.context;
        let mut selections = vec![];
        if !context.skip_origin_model {
            selections.push(Ok(Selection {
                scenarios: context.origin(),
                related: None,
            }));
        }
        let mut seen = BTreeSet::new();
        for key in context.keys() {
            for scenario in context.anchored(key) {
                let Some(savepoint) = scenario.savepoint_name() else {
                    continue;
                };
                if !seen.insert(savepoint) {
                    continue;
                }
                let mut scenarios = context.origin();
                scenarios
                    .assignments
                    .insert(key.clone(), Assignment::Use(scenario));
                selections.push(Ok(Selection {
                    scenarios,
                    related: Some(key.clone()),
                }));
            }
        }
        Box::new(selections.into_iter())
    }
}

/// Every combination of plain scenarios, and every savepoint scenario
/// combined with every combination of the plain scenarios of the others
pub struct CombinatorialSelector<'a> {
    context: SelectionContext<'a>,
}

impl<'a> CombinatorialSelector<'a> {
    pub fn new(context: SelectionContext<'a>) -> Self {
        Self { context }
    }

    fn plain_choices(&self, key: &str) -> Vec<Assignment<'a>> {
        let plain = self.context.plain(key);
        if plain.is_empty() {
            vec![Assignment::Keep]
        } else {
            plain.into_iter().map(Assignment::Use).collect()
        }
    }
}

fn product<'a>(
    keys: Vec<&'a String>,
    choices: Vec<Vec<Assignment<'a>>>,
    related: Option<&'a String>,
) -> Box<dyn Iterator<Item = Selection<'a>> + 'a> {
    let selection = move |row: Vec<Assignment<'a>>| Selection {
        scenarios: ScenarioCollection {
            assignments: keys.iter().map(|key| (*key).clone()).zip(row).collect(),
        },
        related: related.cloned(),
    };
    if choices.is_empty() {
        return Box::new(iter::once(selection(vec![])));
    }
    Box::new(
        choices
            .into_iter()
            .map(Vec::into_iter)
            .multi_cartesian_product()
            .map(selection),
    )
}

impl<'a> Selector<'a> for CombinatorialSelector<'a> {
    fn selections(&self) -> Selections<'a> {
        let keys: Vec<&'a String> = self.context.keys().collect();
        let choices: Vec<Vec<Assignment<'a>>> =
            keys.iter().map(|key| self.plain_choices(key)).collect();
        let total: usize = choices.iter().map(Vec::len).product();
        debug!("{total} combinations of plain scenarios");

        let mut families = vec![product(keys.clone(), choices.clone(), None)];
        for (index, key) in keys.iter().enumerate() {
            for scenario in self.context.anchored(key) {
                let mut anchored = choices.clone();
                anchored[index] = vec![Assignment::Use(scenario)];
                families.push(product(keys.clone(), anchored, Some(*key)));
            }
        }

        let skip_origin = self.context.skip_origin_model;
        Box::new(
            families
                .into_iter()
                .flatten()
                .filter(move |selection| !(skip_origin && selection.scenarios.is_origin()))
                .map(Ok),
        )
    }
}

/// The selector configured by `strategy`
pub fn selector<'a>(
    strategy: &'a SelectionStrategy,
    context: SelectionContext<'a>,
) -> Box<dyn Selector<'a> + 'a> {
    match strategy {
        SelectionStrategy::Default => Box::new(DefaultSelector::new(context)),
        SelectionStrategy::Combinatorial => Box::new(CombinatorialSelector::new(context)),
        SelectionStrategy::Selective(config) => Box::new(SelectiveSelector::new(context, config)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::SeparationStrategy;
    use crate::ir::tests::build_process;
    use crate::ir::{Process, Savepoint};
    use crate::separation::separate;

    pub fn with_savepoint(mut process: Process, action: &str, savepoint: &str) -> Process {
        let id = process.action_id(action).unwrap();
        process[id]
            .savepoints
            .push(Savepoint::new(savepoint, vec![]));
        process
    }

    pub fn scenarios_of(
        model: &ProcessCollection,
        strategy: SeparationStrategy,
    ) -> BTreeMap<String, Vec<Scenario>> {
        model
            .environment
            .iter()
            .map(|(key, process)| (key.clone(), separate(strategy, process).unwrap()))
            .collect()
    }

    pub fn describe(selection: &Selection) -> String {
        selection
            .scenarios
            .assignments
            .iter()
            .map(|(key, a)| format!("{key}:{}", a.label().unwrap_or("-")))
            .join(" ")
    }

    fn run(selector: &dyn Selector<'_>) -> Vec<String> {
        selector
            .selections()
            .map(|s| describe(&s.unwrap()))
            .collect()
    }

    fn two_processes() -> ProcessCollection {
        let mut model = ProcessCollection::new("test");
        model.add_environment(with_savepoint(
            build_process("c/a", "(!reg_a).<x>", &[]),
            "reg_a",
            "sa",
        ));
        model.add_environment(with_savepoint(
            build_process("c/b", "(!reg_b).<y>", &[]),
            "reg_b",
            "sb",
        ));
        model
    }

    #[test]
    fn default_selection() {
        let model = two_processes();
        let scenarios = scenarios_of(&model, SeparationStrategy::Default);
        let config = GeneratorConfig::default();
        let selector = DefaultSelector::new(SelectionContext::new(&model, &scenarios, &config));
        assert_eq!(
            run(&selector),
            vec!["c/a:base c/b:base", "c/a:sa c/b:base", "c/a:base c/b:sb"]
        );

        let config = GeneratorConfig {
            skip_origin_model: true,
            skip_savepoints: true,
            ..Default::default()
        };
        let selector = DefaultSelector::new(SelectionContext::new(&model, &scenarios, &config));
        assert!(run(&selector).is_empty());
    }

    #[test]
    fn combinatorial_selection() {
        let mut model = two_processes();
        model.add_environment(build_process("c/c", "(!reg_c).(<p> | <q>)", &[]));
        let scenarios = scenarios_of(&model, SeparationStrategy::Linear);
        let config = GeneratorConfig::default();
        let selector =
            CombinatorialSelector::new(SelectionContext::new(&model, &scenarios, &config));
        assert_eq!(
            run(&selector),
            vec![
                "c/a:base c/b:base c/c:p",
                "c/a:base c/b:base c/c:q",
                "c/a:sa c/b:base c/c:p",
                "c/a:sa c/b:base c/c:q",
                "c/a:base c/b:sb c/c:p",
                "c/a:base c/b:sb c/c:q",
            ]
        );
        let related: Vec<Option<String>> = selector
            .selections()
            .map(|s| s.unwrap().related)
            .collect();
        assert_eq!(related[0], None);
        assert_eq!(related[2].as_deref(), Some("c/a"));
    }

    #[test]
    fn combinatorial_without_scenarios_keeps_processes() {
        let model = two_processes();
        let scenarios = scenarios_of(&model, SeparationStrategy::Default);
        let config = GeneratorConfig {
            skip_origin_model: true,
            ..Default::default()
        };
        let selector =
            CombinatorialSelector::new(SelectionContext::new(&model, &scenarios, &config));
        assert_eq!(run(&selector), vec!["c/a:sa c/b:base", "c/a:base c/b:sb"]);
    }

    #[test]
    fn empty_model_has_one_selection() {
        let model = ProcessCollection::new("empty");
        let scenarios = BTreeMap::new();
        let config = GeneratorConfig::default();
        let selector =
            CombinatorialSelector::new(SelectionContext::new(&model, &scenarios, &config));
        assert_eq!(run(&selector), vec![""]);
    }

    #[test]
    fn at_most_one_savepoint() {
        let model = two_processes();
        let scenarios = scenarios_of(&model, SeparationStrategy::Linear);
        let config = GeneratorConfig::default();
        let selector =
            CombinatorialSelector::new(SelectionContext::new(&model, &scenarios, &config));
        for selection in selector.selections() {
            let selection = selection.unwrap();
            let count = selection
                .scenarios
                .assignments
                .values()
                .filter(|a| matches!(a, Assignment::Use(s) if s.savepoint.is_some()))
                .count();
            assert!(count <= 1);
        }
    }
}
