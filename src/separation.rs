// Copyright 2025 Cornell University
// released under MIT License

use log::{debug, info};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SeparationStrategy;
use crate::errors::{GenerationError, Result};
use crate::ir::{ActionId, ActionKind, Node, NodeId, OperatorKind, Process, Savepoint};
use crate::scenario::{savepoint_block, Path, Scenario};

/// Splits a process into scenarios. Never modifies `process`.
pub fn separate(strategy: SeparationStrategy, process: &Process) -> Result<Vec<Scenario>> {
    let scenarios = match strategy {
        SeparationStrategy::Default => savepoint_copies(process)?,
        SeparationStrategy::Linear => LinearSeparation::new(process).scenarios()?,
    };
    info!(
        "{} scenarios extracted from {}",
        scenarios.len(),
        process.identity()
    );
    Ok(scenarios)
}

/// Starts `process` from `savepoint`: the savepoint block replaces the
/// initial receive or goes in front of the initial action. When several
/// actions may start the process, the one declaring the savepoint is used.
pub fn start_from_savepoint(
    process: &mut Process,
    declared_by: Option<&str>,
    savepoint: &Savepoint,
) -> Result<()> {
    let initial = process.initial_actions();
    let declaring: Vec<NodeId> = initial
        .iter()
        .copied()
        .filter(|node| Some(process.described(*node).name.as_str()) == declared_by)
        .collect();
    let targets = if declaring.is_empty() { initial } else { declaring };
    let [target] = targets[..] else {
        return Err(GenerationError::InitialAction {
            process: process.identity(),
            found: targets.len(),
        });
    };

    let mut block = savepoint_block(savepoint);
    block.name = fresh_action_name(process, &savepoint.name);
    let block = process.add_action(block);
    if matches!(process.described(target).kind, ActionKind::Receive { .. }) {
        process.replace_action(target, block);
    } else {
        process.insert_action(target, block, false);
    }
    Ok(())
}

fn fresh_action_name(process: &Process, base: &str) -> String {
    let mut name = base.to_string();
    let mut counter = 1;
    while process.action(&name).is_some() {
        name = format!("{base}_{counter}");
        counter += 1;
    }
    name
}

/// Whole-process copies, one per savepoint
fn savepoint_copies(process: &Process) -> Result<Vec<Scenario>> {
    let mut scenarios = vec![];
    for (declaring, savepoint) in process.savepoints() {
        let mut copy = process.clone();
        copy.peers.clear();
        let ids: Vec<ActionId> = copy.actions().map(|(id, _)| id).collect();
        for id in ids {
            copy[id].savepoints.clear();
        }
        start_from_savepoint(&mut copy, Some(&process[declaring].name), savepoint)?;
        scenarios.push(Scenario {
            name: savepoint.name.clone(),
            savepoint: Some(savepoint.clone()),
            process: copy,
        });
    }
    Ok(scenarios)
}

/// The tree a group of paths starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PathSet {
    Root,
    Body(ActionId),
}

/// Extraction of choice-free scenarios: every alternative of every choice
/// becomes a separate sequential scenario, subprocess jumps are unrolled
/// once and loops are cut at their exits.
struct LinearSeparation<'a> {
    process: &'a Process,
    sets: BTreeMap<PathSet, Vec<Path>>,
}

impl<'a> LinearSeparation<'a> {
    fn new(process: &'a Process) -> Self {
        let mut sets = BTreeMap::new();
        if let Some(root) = process.root() {
            sets.insert(PathSet::Root, Self::paths(process, root));
        }
        for id in process.reachable_actions() {
            if let Some(body) = process[id].body() {
                sets.insert(PathSet::Body(id), Self::paths(process, body));
            }
        }
        Self { process, sets }
    }

    /// Paths through the subtree at `node`, each ending at the end of the
    /// subtree or at the first subprocess jump
    fn paths(process: &Process, node: NodeId) -> Vec<Path> {
        match &process[node] {
            Node::Behaviour { action, .. } => {
                let mut path = Path::default();
                path.push(node, *action);
                vec![path]
            }
            Node::Operator {
                kind: OperatorKind::Parentheses,
                children,
                ..
            } => match children.first() {
                Some(child) => Self::paths(process, *child),
                None => vec![Path::default()],
            },
            Node::Operator {
                kind: OperatorKind::Choice,
                children,
                ..
            } => {
                let mut result = vec![];
                for child in children {
                    let first = process.first_actions(*child);
                    for mut path in Self::paths(process, *child) {
                        if let [head] = first[..] {
                            path.prefix_name(&process.described(head).name);
                        }
                        result.push(path);
                    }
                }
                result
            }
            Node::Operator {
                kind: OperatorKind::Concatenation,
                children,
                ..
            } => {
                let mut result = vec![Path::default()];
                for child in children {
                    let continuations = Self::paths(process, *child);
                    let mut extended = vec![];
                    for path in result {
                        if !path.is_terminal(process) {
                            extended.push(path);
                            continue;
                        }
                        for continuation in &continuations {
                            let mut joined = path.clone();
                            joined += continuation;
                            extended.push(joined);
                        }
                    }
                    result = extended;
                }
                result
            }
        }
    }

    fn unresolved(&self) -> usize {
        self.sets
            .values()
            .flatten()
            .filter(|path| !path.is_terminal(self.process))
            .count()
    }

    fn terminal_paths(&self, set: PathSet) -> Vec<Path> {
        self.sets
            .get(&set)
            .map(|paths| {
                paths
                    .iter()
                    .filter(|path| path.is_terminal(self.process))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces every jumping path of `set` for which `continuation` offers
    /// paths by its concatenation with each of them
    fn substitute<F>(&mut self, set: PathSet, mut continuation: F) -> bool
    where
        F: FnMut(&Self, ActionId) -> Option<Vec<Path>>,
    {
        let mut progress = false;
        let mut result: Vec<Path> = vec![];
        for path in self.sets[&set].clone() {
            let continuations = path
                .last_jump(self.process)
                .and_then(|target| continuation(self, target))
                .filter(|paths| !paths.is_empty());
            let Some(continuations) = continuations else {
                if !result.contains(&path) {
                    result.push(path);
                }
                continue;
            };
            progress = true;
            for tail in &continuations {
                let mut joined = path.clone();
                joined += tail;
                debug_assert!(joined.includes(&path, self.process));
                if !result.contains(&joined) {
                    result.push(joined);
                }
            }
        }
        self.sets.insert(set, result);
        progress
    }

    /// Whether some path of `set` jumps into another subprocess
    fn has_foreign_jumps(&self, set: PathSet) -> bool {
        self.sets[&set].iter().any(|path| {
            path.last_jump(self.process)
                .is_some_and(|target| PathSet::Body(target) != set)
        })
    }

    /// Strictly decreases (lexicographically) with every successful round
    fn measure(&self) -> (usize, usize) {
        let foreign = self
            .sets
            .keys()
            .filter(|set| self.has_foreign_jumps(**set))
            .count();
        (foreign, self.unresolved())
    }

    /// Paths of `target` that may follow a jump out of the subprocess `own`
    /// while the two recurse into each other: the exits of `target` and its
    /// paths jumping straight back into `own`
    fn cycle_continuation(&self, own: ActionId, target: ActionId) -> Vec<Path> {
        self.sets
            .get(&PathSet::Body(target))
            .map(|paths| {
                paths
                    .iter()
                    .filter(|path| {
                        path.last_jump(self.process)
                            .is_none_or(|back| back == own)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Turns the jumps of the first subprocess whose every foreign jump has
    /// a cycle continuation into self-recursion
    fn break_cycle(&mut self, keys: &[PathSet]) -> bool {
        for set in keys {
            let PathSet::Body(own) = *set else {
                continue;
            };
            if !self.has_foreign_jumps(*set) {
                continue;
            }
            let breakable = self.sets[set].iter().all(|path| {
                match path.last_jump(self.process) {
                    Some(target) if target != own => {
                        !self.cycle_continuation(own, target).is_empty()
                    }
                    _ => true,
                }
            });
            if breakable {
                debug!(
                    "breaking the recursion through {} in {}",
                    self.process[own].name,
                    self.process.identity()
                );
                return self.substitute(*set, |this, target| {
                    (target != own).then(|| this.cycle_continuation(own, target))
                });
            }
        }
        false
    }

    /// Substitutes jumps until every path ends without a jump
    fn resolve(&mut self) -> Result<()> {
        let mut measure = self.measure();
        while measure.1 > 0 {
            let keys: Vec<PathSet> = self.sets.keys().copied().collect();
            let resolved: BTreeSet<ActionId> = keys
                .iter()
                .filter_map(|set| match set {
                    PathSet::Body(id) if self.terminal_paths(*set).len() == self.sets[set].len() => {
                        Some(*id)
                    }
                    _ => None,
                })
                .collect();

            let mut progress = false;
            for set in &keys {
                let own_exits = self.terminal_paths(*set);
                progress |= self.substitute(*set, |this, target| {
                    if PathSet::Body(target) == *set {
                        Some(own_exits.clone())
                    } else if resolved.contains(&target) {
                        this.sets.get(&PathSet::Body(target)).cloned()
                    } else {
                        None
                    }
                });
            }
            if !progress {
                progress = self.break_cycle(&keys);
            }
            if !progress {
                return Err(GenerationError::NonTerminatingRecursion {
                    process: self.process.identity(),
                    subprocesses: self.recursive_subprocesses(),
                });
            }

            let next = self.measure();
            if next >= measure {
                return Err(GenerationError::FixpointStalled {
                    stage: "subprocess substitution",
                    process: self.process.identity(),
                    remaining: next.1,
                });
            }
            measure = next;
        }
        Ok(())
    }

    fn recursive_subprocesses(&self) -> Vec<String> {
        self.sets
            .iter()
            .filter(|(_, paths)| paths.iter().any(|p| !p.is_terminal(self.process)))
            .filter_map(|(set, _)| match set {
                PathSet::Body(id) => Some(self.process[*id].name.clone()),
                PathSet::Root => None,
            })
            .collect()
    }

    fn scenarios(mut self) -> Result<Vec<Scenario>> {
        self.resolve()?;
        let process = self.process;
        let paths = self.sets.remove(&PathSet::Root).unwrap_or_default();

        let mut names: FxHashMap<String, usize> = FxHashMap::default();
        let mut unique = |name: String| -> String {
            let count = names.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                format!("{name}_{count}")
            }
        };

        let mut scenarios = vec![];
        for path in &paths {
            let name = unique(path.name.clone().unwrap_or_else(|| "base".to_string()));
            scenarios.push(Scenario::from_path(name, process, path));
        }

        let mut anchored = vec![];
        for (path, base) in paths.iter().zip(&scenarios) {
            let mut seen = BTreeSet::new();
            for step in &path.steps {
                let declaring = &process[step.action];
                for savepoint in &declaring.savepoints {
                    if !seen.insert(savepoint.name.clone()) {
                        continue;
                    }
                    let name = match &path.name {
                        Some(path_name) => format!("{}_{path_name}", savepoint.name),
                        None => savepoint.name.clone(),
                    };
                    let mut scenario = base.clone();
                    scenario.name = unique(name);
                    scenario.savepoint = Some(savepoint.clone());
                    start_from_savepoint(&mut scenario.process, Some(&declaring.name), savepoint)?;
                    anchored.push(scenario);
                }
            }
        }
        scenarios.extend(anchored);
        Ok(scenarios)
    }
}
