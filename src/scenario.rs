// Copyright 2025 Cornell University
// released under MIT License

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::AddAssign;

use crate::ir::{Action, ActionId, ActionKind, NodeId, OperatorKind, Process, Savepoint};

/// One executed behaviour: its position in the original tree and the
/// action it shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub node: NodeId,
    pub action: ActionId,
}

/// A named action sequence of the original process, from a root or
/// subprocess body up to its end or to the jump into another subprocess.
/// Two paths are equal if they execute the same actions in the same order.
#[derive(Debug, Clone, Default)]
pub struct Path {
    pub name: Option<String>,
    pub steps: Vec<Step>,
}

impl Path {
    pub fn push(&mut self, node: NodeId, action: ActionId) {
        self.steps.push(Step { node, action });
    }

    pub fn actions(&self) -> impl Iterator<Item = ActionId> + '_ {
        self.steps.iter().map(|s| s.action)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The subprocess this path jumps into at its end, if any
    pub fn last_jump(&self, process: &Process) -> Option<ActionId> {
        self.steps
            .last()
            .filter(|step| process[step.action].body().is_some())
            .map(|step| step.action)
    }

    pub fn is_terminal(&self, process: &Process) -> bool {
        self.last_jump(process).is_none()
    }

    /// Whether this path starts with all of `other` except its final jump
    pub fn includes(&self, other: &Path, process: &Process) -> bool {
        let prefix = match other.last_jump(process) {
            Some(_) => other.len() - 1,
            None => other.len(),
        };
        self.len() >= prefix && self.actions().zip(other.actions()).take(prefix).all(|(a, b)| a == b)
    }

    /// Puts the first action of an enclosing branch in front of the name
    pub fn prefix_name(&mut self, prefix: &str) {
        self.name = Some(match self.name.take() {
            Some(name) => format!("{prefix}_{name}"),
            None => prefix.to_string(),
        });
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.actions().eq(other.actions())
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for action in self.actions() {
            action.hash(state);
        }
    }
}

/// Appends a continuation, joining the names with `_`
impl AddAssign<&Path> for Path {
    fn add_assign(&mut self, rhs: &Path) {
        self.steps.extend_from_slice(&rhs.steps);
        self.name = match (self.name.take(), &rhs.name) {
            (Some(first), Some(second)) => Some(format!("{first}_{second}")),
            (first, second) => first.or_else(|| second.clone()),
        };
    }
}

/// One linear way of executing a process, optionally starting from a savepoint.
/// The scenario owns its process copy; nothing is shared with the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub savepoint: Option<Savepoint>,
    pub process: Process,
}

impl Scenario {
    /// An empty scenario with the identity, comment and labels of `original`
    pub fn new(name: impl Into<String>, original: &Process) -> Self {
        let mut process = Process::new(original.category.clone(), original.name.clone());
        process.comment = original.comment.clone();
        process.labels = original.labels.clone();
        Self {
            name: name.into(),
            savepoint: None,
            process,
        }
    }

    /// Copies an action description into the scenario unless an action of
    /// that name is there already. Subprocesses lose their body and
    /// savepoint declarations are dropped.
    pub fn add_action_copy(&mut self, original: &Action) -> ActionId {
        if let Some(id) = self.process.action_id(&original.name) {
            return id;
        }
        let mut copy = original.clone();
        copy.savepoints.clear();
        if let ActionKind::Subprocess { body } = &mut copy.kind {
            *body = None;
        }
        self.process.add_action(copy)
    }

    /// Builds the sequential tree of a path of `original`. A guarded block
    /// met both at a branch head and elsewhere gets a second copy, so that
    /// only the branch head occurrences assume the guard.
    pub fn from_path(name: impl Into<String>, original: &Process, path: &Path) -> Self {
        let mut scenario = Self::new(name, original);
        let root = scenario.process.add_operator(OperatorKind::Concatenation);
        scenario.process.set_root(root);
        let mut copies: BTreeMap<(ActionId, bool), ActionId> = BTreeMap::new();
        for step in &path.steps {
            let action = &original[step.action];
            let assumed = original.is_branch_head(step.node)
                && !action.condition.is_empty()
                && matches!(action.kind, ActionKind::Block { .. });
            let id = match copies.get(&(step.action, assumed)) {
                Some(id) => *id,
                None => {
                    let id = if scenario.process.action_id(&action.name).is_some() {
                        let suffix = if assumed { "assumed" } else { "guarded" };
                        let mut renamed = action.clone();
                        renamed.name = format!("{}_{suffix}", action.name);
                        scenario.add_action_copy(&renamed)
                    } else {
                        scenario.add_action_copy(action)
                    };
                    if assumed {
                        assume_condition(&mut scenario.process[id]);
                    }
                    copies.insert((step.action, assumed), id);
                    id
                }
            };
            let node = scenario.process.add_behaviour(id);
            scenario.process.attach(root, node);
        }
        scenario
    }

    pub fn action_names(&self) -> std::collections::BTreeSet<String> {
        self.process.action_names()
    }

    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_ref().map(|s| s.name.as_str())
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process.identity(), self.name)
    }
}

/// A guard of a block without alternative branches turns into an assumption
pub fn assume_condition(action: &mut Action) {
    if action.condition.is_empty() {
        return;
    }
    if let ActionKind::Block { statements } = &mut action.kind {
        let assumption = format!("ldv_assume({});", action.condition.join(" && "));
        statements.insert(0, assumption);
        action.condition.clear();
    }
}

/// The block executing the initialization of `savepoint`
pub fn savepoint_block(savepoint: &Savepoint) -> Action {
    let mut block = Action::block(savepoint.name.clone(), savepoint.statements.clone());
    block.comment = Some(
        savepoint
            .comment
            .clone()
            .unwrap_or_else(|| format!("Start from the savepoint {}.", savepoint.name)),
    );
    block.requirements = savepoint.requirements.clone();
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::tests::build_process;
    use crate::serialize::serialize_process;

    fn path_of(process: &Process, names: &[&str]) -> Path {
        let mut path = Path::default();
        for name in names {
            let id = process.action_id(name).unwrap();
            let node = process.behaviours(id)[0];
            path.push(node, id);
        }
        path
    }

    #[test]
    fn path_equality_ignores_names() {
        let process = build_process("c/p", "<a>.<b> | <c>", &[]);
        let mut first = path_of(&process, &["a", "b"]);
        first.name = Some("a".to_string());
        let second = path_of(&process, &["a", "b"]);
        assert_eq!(first, second);
        assert_ne!(first, path_of(&process, &["a"]));
    }

    #[test]
    fn joining_paths() {
        let process = build_process("c/p", "<a>.{s}", &[("s", "<b> | <c>")]);
        let mut head = path_of(&process, &["a", "s"]);
        head.name = Some("s".to_string());
        let mut tail = path_of(&process, &["b"]);
        tail.name = Some("b".to_string());
        assert!(!head.is_terminal(&process));
        assert!(tail.is_terminal(&process));

        let jump = head.clone();
        head += &tail;
        assert_eq!(head.name.as_deref(), Some("s_b"));
        assert!(head.is_terminal(&process));
        assert!(head.includes(&jump, &process));
        assert!(!tail.includes(&jump, &process));

        let mut anonymous = path_of(&process, &["a"]);
        anonymous += &tail;
        assert_eq!(anonymous.name.as_deref(), Some("b"));
        anonymous.prefix_name("a");
        assert_eq!(anonymous.name.as_deref(), Some("a_b"));
    }

    #[test]
    fn scenario_owns_its_copy() {
        let mut process = build_process("c/p", "<a>.(<b> | <c>)", &[]);
        let b = process.action_id("b").unwrap();
        process[b].condition = vec!["x > 0".into(), "y".into()];
        let path = path_of(&process, &["a", "b"]);
        let scenario = Scenario::from_path("b", &process, &path);
        assert_eq!(serialize_process(&scenario.process), "<a>.<b>");
        assert_eq!(scenario.to_string(), "c/p:b");

        let copied = scenario.process.action("b").unwrap();
        assert!(copied.condition.is_empty());
        assert_eq!(copied.statements(), ["ldv_assume(x > 0 && y);"]);
        assert_eq!(process[b].condition.len(), 2);
    }

    #[test]
    fn conditions_inside_sequences_stay_guards() {
        let mut process = build_process("c/p", "<a>.<b>", &[]);
        let b = process.action_id("b").unwrap();
        process[b].condition = vec!["x".into()];
        let scenario = Scenario::from_path("base", &process, &path_of(&process, &["a", "b"]));
        assert_eq!(scenario.process.action("b").unwrap().condition, ["x"]);
    }

    #[test]
    fn guard_is_assumed_only_at_branch_heads() {
        let mut process = build_process("c/p", "<a>.(<b> | <c>).<b>", &[]);
        let b = process.action_id("b").unwrap();
        process[b].condition = vec!["x".into()];
        let nodes = process.behaviours(b);
        let mut path = path_of(&process, &["a"]);
        path.push(nodes[0], b);
        path.push(nodes[1], b);

        let scenario = Scenario::from_path("b", &process, &path);
        assert_eq!(serialize_process(&scenario.process), "<a>.<b>.<b_guarded>");
        let head = scenario.process.action("b").unwrap();
        assert_eq!(head.statements(), ["ldv_assume(x);"]);
        assert!(head.condition.is_empty());
        let tail = scenario.process.action("b_guarded").unwrap();
        assert_eq!(tail.condition, ["x"]);
        assert!(tail.statements().is_empty());
    }

    #[test]
    fn repeated_steps_share_a_copy() {
        let process = build_process("c/p", "<a>.{s}", &[("s", "<b>.{s} | <c>")]);
        let path = path_of(&process, &["a", "s", "b", "s", "b", "c"]);
        let scenario = Scenario::from_path("loop", &process, &path);
        assert_eq!(
            serialize_process(&scenario.process),
            "<a>.{s}.<b>.{s}.<b>.<c>"
        );
        assert_eq!(scenario.process.actions().count(), 4);
    }

    #[test]
    fn savepoint_blocks() {
        let mut savepoint = Savepoint::new("s1", vec!["init();".into()]);
        savepoint.requirements.require_process("c/B", true);
        let block = savepoint_block(&savepoint);
        assert_eq!(block.name, "s1");
        assert_eq!(block.statements(), ["init();"]);
        assert!(block.requirements.requires_presence("c/B"));
        assert_eq!(block.comment.as_deref(), Some("Start from the savepoint s1."));
    }
}
