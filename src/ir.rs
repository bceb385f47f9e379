// Copyright 2025 Cornell University
// released under MIT License

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Index, IndexMut};

use crate::requirements::Requirements;

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ActionId(u32);
entity_impl!(ActionId, "action");

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct NodeId(u32);
entity_impl!(NodeId, "node");

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum OperatorKind {
    Concatenation,
    Choice,
    /// Makes precedence explicit, holds zero or one child
    Parentheses,
}

/// A position in the action tree of a `Process`.
/// Behaviours refer to a shared `Action` description by its `ActionId`,
/// so several positions may show the same description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Behaviour {
        action: ActionId,
        parent: Option<NodeId>,
    },
    Operator {
        kind: OperatorKind,
        children: Vec<NodeId>,
        parent: Option<NodeId>,
    },
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        match self {
            Node::Behaviour { parent, .. } | Node::Operator { parent, .. } => *parent,
        }
    }

    fn set_parent(&mut self, new_parent: Option<NodeId>) {
        match self {
            Node::Behaviour { parent, .. } | Node::Operator { parent, .. } => *parent = new_parent,
        }
    }

    /// The described action if this node is a behaviour
    pub fn action(&self) -> Option<ActionId> {
        match self {
            Node::Behaviour { action, .. } => Some(*action),
            Node::Operator { .. } => None,
        }
    }

    pub fn operator(&self) -> Option<OperatorKind> {
        match self {
            Node::Operator { kind, .. } => Some(*kind),
            Node::Behaviour { .. } => None,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Operator { children, .. } => children,
            Node::Behaviour { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Block {
        statements: Vec<String>,
    },
    Dispatch {
        parameters: Vec<String>,
        broadcast: bool,
    },
    Receive {
        parameters: Vec<String>,
        replicative: bool,
    },
    /// Jumps to the operator subtree `body` (which may lead back to an ancestor)
    Subprocess {
        body: Option<NodeId>,
    },
}

impl ActionKind {
    pub fn describe(&self) -> &'static str {
        match self {
            ActionKind::Block { .. } => "block",
            ActionKind::Dispatch { .. } => "dispatch",
            ActionKind::Receive { .. } => "receive",
            ActionKind::Subprocess { .. } => "subprocess",
        }
    }
}

/// Description of a named unit of process behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub comment: Option<String>,
    /// Guard: conjunction of boolean expressions
    pub condition: Vec<String>,
    /// Alternative initial states, only meaningful on initial actions
    pub savepoints: Vec<Savepoint>,
    pub requirements: Requirements,
    /// Only used to decide whether a process is visible to its peers
    pub weak_requirements: Requirements,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            comment: None,
            condition: vec![],
            savepoints: vec![],
            requirements: Requirements::default(),
            weak_requirements: Requirements::default(),
        }
    }

    pub fn block(name: impl Into<String>, statements: Vec<String>) -> Self {
        Self::new(name, ActionKind::Block { statements })
    }

    pub fn dispatch(name: impl Into<String>, parameters: Vec<String>) -> Self {
        Self::new(
            name,
            ActionKind::Dispatch {
                parameters,
                broadcast: false,
            },
        )
    }

    pub fn receive(name: impl Into<String>, parameters: Vec<String>) -> Self {
        Self::new(
            name,
            ActionKind::Receive {
                parameters,
                replicative: false,
            },
        )
    }

    pub fn subprocess(name: impl Into<String>) -> Self {
        Self::new(name, ActionKind::Subprocess { body: None })
    }

    /// Dispatches and receives are the actions exchanged between peers
    pub fn is_signal(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Dispatch { .. } | ActionKind::Receive { .. }
        )
    }

    pub fn is_replicative_receive(&self) -> bool {
        matches!(
            self.kind,
            ActionKind::Receive {
                replicative: true,
                ..
            }
        )
    }

    pub fn parameters(&self) -> &[String] {
        match &self.kind {
            ActionKind::Dispatch { parameters, .. } | ActionKind::Receive { parameters, .. } => {
                parameters
            }
            _ => &[],
        }
    }

    pub fn statements(&self) -> &[String] {
        match &self.kind {
            ActionKind::Block { statements } => statements,
            _ => &[],
        }
    }

    /// The subtree a subprocess jumps to
    pub fn body(&self) -> Option<NodeId> {
        match &self.kind {
            ActionKind::Subprocess { body } => *body,
            _ => None,
        }
    }
}

/// An alternative initial state of a process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    pub comment: Option<String>,
    pub statements: Vec<String>,
    pub requirements: Requirements,
}

impl Savepoint {
    pub fn new(name: impl Into<String>, statements: Vec<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            statements,
            requirements: Requirements::default(),
        }
    }
}

/// A process variable. The declaration is an opaque C type which may be
/// unknown until it is adopted from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Label {
    pub name: String,
    pub declaration: Option<String>,
    pub value: Option<String>,
    pub resource: bool,
    pub callback: bool,
    pub parameter: bool,
}

impl Label {
    pub fn new(name: impl Into<String>, declaration: Option<String>) -> Self {
        Self {
            name: name.into(),
            declaration,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub name: String,
    pub category: String,
    pub comment: Option<String>,
    pub labels: BTreeMap<String, Label>,
    /// Peer process identity -> names of the signals exchanged with it
    pub peers: BTreeMap<String, BTreeSet<String>>,
    root: Option<NodeId>,
    actions: PrimaryMap<ActionId, Action>,
    by_name: FxHashMap<String, ActionId>,
    nodes: PrimaryMap<NodeId, Node>,
}

impl Process {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            comment: None,
            labels: BTreeMap::new(),
            peers: BTreeMap::new(),
            root: None,
            actions: PrimaryMap::new(),
            by_name: FxHashMap::default(),
            nodes: PrimaryMap::new(),
        }
    }

    /// The key of an environment process in a `ProcessCollection`
    pub fn identity(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    pub fn add_label(&mut self, label: Label) {
        assert!(
            !self.labels.contains_key(&label.name),
            "label {} is already declared in {}",
            label.name,
            self.identity()
        );
        self.labels.insert(label.name.clone(), label);
    }

    pub fn add_action(&mut self, action: Action) -> ActionId {
        assert!(
            !self.by_name.contains_key(&action.name),
            "action {} is already declared in {}",
            action.name,
            self.identity()
        );
        let name = action.name.clone();
        let id = self.actions.push(action);
        self.by_name.insert(name, id);
        id
    }

    pub fn action_id(&self, name: &str) -> Option<ActionId> {
        self.by_name.get(name).copied()
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.action_id(name).map(|id| &self.actions[id])
    }

    /// All declared action descriptions in declaration order
    pub fn actions(&self) -> impl Iterator<Item = (ActionId, &Action)> {
        self.actions.iter()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn set_root(&mut self, node: NodeId) {
        assert!(
            self.nodes[node].parent().is_none(),
            "{node} has a parent and cannot become the root of {}",
            self.identity()
        );
        self.root = Some(node);
    }

    pub fn add_operator(&mut self, kind: OperatorKind) -> NodeId {
        self.nodes.push(Node::Operator {
            kind,
            children: vec![],
            parent: None,
        })
    }

    pub fn add_behaviour(&mut self, action: ActionId) -> NodeId {
        self.nodes.push(Node::Behaviour {
            action,
            parent: None,
        })
    }

    /// Appends `child` to the operator `parent`.
    /// Panics if this would give a node a second parent or make it its own ancestor.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        assert_ne!(parent, child, "{child} cannot be its own parent");
        if let Some(existing) = self.nodes[child].parent() {
            panic!("{child} already has the parent {existing}");
        }
        assert!(
            !self.is_ancestor(child, parent),
            "{child} is an ancestor of {parent}"
        );
        assert!(
            self.root != Some(child) && !self.is_body(child),
            "{child} is a tree root and cannot be attached to {parent}"
        );
        match &mut self.nodes[parent] {
            Node::Operator { kind, children, .. } => {
                assert!(
                    *kind != OperatorKind::Parentheses || children.is_empty(),
                    "parentheses {parent} already hold a child"
                );
                children.push(child);
            }
            Node::Behaviour { .. } => panic!("behaviour {parent} cannot have children"),
        }
        self.nodes[child].set_parent(Some(parent));
    }

    /// Makes `body` the subtree the subprocess `action` jumps to
    pub fn set_body(&mut self, action: ActionId, body: NodeId) {
        assert!(
            self.nodes[body].parent().is_none(),
            "subprocess body {body} must not have a parent"
        );
        match &mut self.actions[action].kind {
            ActionKind::Subprocess { body: target } => *target = Some(body),
            kind => panic!("{action} is a {}, not a subprocess", kind.describe()),
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent()
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes[node].children()
    }

    /// The action description of a behaviour node
    pub fn described(&self, node: NodeId) -> &Action {
        match self.nodes[node].action() {
            Some(action) => &self.actions[action],
            None => panic!("{node} is an operator, not a behaviour"),
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes[node].parent();
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.nodes[p].parent();
        }
        false
    }

    fn is_body(&self, node: NodeId) -> bool {
        self.actions.values().any(|a| a.body() == Some(node))
    }

    /// Behaviour nodes that can be executed first when entering `node`
    pub fn first_actions(&self, node: NodeId) -> Vec<NodeId> {
        match &self.nodes[node] {
            Node::Behaviour { .. } => vec![node],
            Node::Operator {
                kind: OperatorKind::Choice,
                children,
                ..
            } => children
                .iter()
                .flat_map(|child| self.first_actions(*child))
                .collect(),
            Node::Operator { children, .. } => children
                .iter()
                .map(|child| self.first_actions(*child))
                .find(|first| !first.is_empty())
                .unwrap_or_default(),
        }
    }

    pub fn initial_actions(&self) -> Vec<NodeId> {
        self.root
            .map(|root| self.first_actions(root))
            .unwrap_or_default()
    }

    /// Tree nodes reachable from the root, following subprocess jumps,
    /// in depth-first order
    pub fn reachable_nodes(&self) -> Vec<NodeId> {
        let mut order = vec![];
        let mut visited_bodies = FxHashSet::default();
        let mut pending: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(start) = pending.pop() {
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                order.push(node);
                match &self.nodes[node] {
                    Node::Behaviour { action, .. } => {
                        if let Some(body) = self.actions[*action].body() {
                            if visited_bodies.insert(body) {
                                pending.push(body);
                            }
                        }
                    }
                    Node::Operator { children, .. } => stack.extend(children.iter().rev()),
                }
            }
        }
        order
    }

    /// Actions that occur in the tree (declared but unused descriptions are skipped)
    pub fn reachable_actions(&self) -> BTreeSet<ActionId> {
        self.reachable_nodes()
            .into_iter()
            .filter_map(|node| self.nodes[node].action())
            .collect()
    }

    pub fn action_names(&self) -> BTreeSet<String> {
        self.reachable_actions()
            .into_iter()
            .map(|id| self.actions[id].name.clone())
            .collect()
    }

    /// Reachable behaviour nodes showing `action`
    pub fn behaviours(&self, action: ActionId) -> Vec<NodeId> {
        self.reachable_nodes()
            .into_iter()
            .filter(|node| self.nodes[*node].action() == Some(action))
            .collect()
    }

    /// Union of the hard requirements of all actions in the tree
    pub fn requirements(&self) -> Requirements {
        self.reachable_actions()
            .into_iter()
            .fold(Requirements::default(), |acc, id| {
                acc.union(&self.actions[id].requirements)
            })
    }

    pub fn weak_requirements(&self) -> Requirements {
        self.reachable_actions()
            .into_iter()
            .fold(Requirements::default(), |acc, id| {
                acc.union(&self.actions[id].weak_requirements)
            })
    }

    /// Savepoints declared by any action, in declaration order
    pub fn savepoints(&self) -> impl Iterator<Item = (ActionId, &Savepoint)> {
        self.actions
            .iter()
            .flat_map(|(id, action)| action.savepoints.iter().map(move |s| (id, s)))
    }

    /// Whether `node` starts a choice branch or a concatenation (looking
    /// through parentheses), i.e. nothing inside its operator precedes it
    pub fn is_branch_head(&self, node: NodeId) -> bool {
        let mut current = node;
        loop {
            let Some(parent) = self.nodes[current].parent() else {
                return true;
            };
            match self.nodes[parent].operator() {
                Some(OperatorKind::Parentheses) => current = parent,
                Some(OperatorKind::Choice) => return true,
                Some(OperatorKind::Concatenation) => {
                    return self.children(parent).first() == Some(&current)
                }
                None => unreachable!("behaviour {parent} has children"),
            }
        }
    }

    /// Puts the detached node `new` at the position of `old` (child slot,
    /// root or subprocess body) and detaches `old`
    fn substitute(&mut self, old: NodeId, new: NodeId) {
        assert!(
            self.nodes[new].parent().is_none(),
            "{new} is already placed in the tree"
        );
        match self.nodes[old].parent() {
            Some(parent) => {
                if let Node::Operator { children, .. } = &mut self.nodes[parent] {
                    for child in children.iter_mut().filter(|c| **c == old) {
                        *child = new;
                    }
                }
                self.nodes[new].set_parent(Some(parent));
                self.nodes[old].set_parent(None);
            }
            None => {
                if self.root == Some(old) {
                    self.root = Some(new);
                }
                for action in self.actions.values_mut() {
                    if let ActionKind::Subprocess { body } = &mut action.kind {
                        if *body == Some(old) {
                            *body = Some(new);
                        }
                    }
                }
            }
        }
    }

    /// Inserts a new behaviour of `action` right before (or after) `target`
    /// in sequence, creating a concatenation when `target` is not part of one
    pub fn insert_action(&mut self, target: NodeId, action: ActionId, after: bool) -> NodeId {
        let new = self.add_behaviour(action);
        match self.nodes[target].parent() {
            Some(parent)
                if self.nodes[parent].operator() == Some(OperatorKind::Concatenation) =>
            {
                if let Node::Operator { children, .. } = &mut self.nodes[parent] {
                    let position = children
                        .iter()
                        .position(|c| *c == target)
                        .expect("child is listed by its parent");
                    let position = if after { position + 1 } else { position };
                    children.insert(position, new);
                }
                self.nodes[new].set_parent(Some(parent));
            }
            _ => {
                let concatenation = self.add_operator(OperatorKind::Concatenation);
                self.substitute(target, concatenation);
                let (first, second) = if after { (target, new) } else { (new, target) };
                self.attach(concatenation, first);
                self.attach(concatenation, second);
            }
        }
        new
    }

    /// Replaces the behaviour `target` by a new behaviour of `action`
    pub fn replace_action(&mut self, target: NodeId, action: ActionId) -> NodeId {
        assert!(
            self.nodes[target].action().is_some(),
            "{target} is an operator, only behaviours can be replaced"
        );
        let new = self.add_behaviour(action);
        self.substitute(target, new);
        new
    }

    /// Adds a new behaviour of `action` as an alternative to `target`
    pub fn insert_alternative_action(&mut self, target: NodeId, action: ActionId) -> NodeId {
        let new = self.add_behaviour(action);
        match self.nodes[target].parent() {
            Some(parent) if self.nodes[parent].operator() == Some(OperatorKind::Choice) => {
                if let Node::Operator { children, .. } = &mut self.nodes[parent] {
                    let position = children
                        .iter()
                        .position(|c| *c == target)
                        .expect("child is listed by its parent");
                    children.insert(position + 1, new);
                }
                self.nodes[new].set_parent(Some(parent));
            }
            parent => {
                let choice = self.add_operator(OperatorKind::Choice);
                let in_sequence = parent.is_some_and(|p| {
                    self.nodes[p].operator() == Some(OperatorKind::Concatenation)
                });
                if in_sequence {
                    let parentheses = self.add_operator(OperatorKind::Parentheses);
                    self.substitute(target, parentheses);
                    self.attach(parentheses, choice);
                } else {
                    self.substitute(target, choice);
                }
                self.attach(choice, target);
                self.attach(choice, new);
            }
        }
        new
    }
}

impl Index<ActionId> for Process {
    type Output = Action;

    fn index(&self, index: ActionId) -> &Self::Output {
        &self.actions[index]
    }
}

/// Writing through an `ActionId` changes the description at every position showing it
impl IndexMut<ActionId> for Process {
    fn index_mut(&mut self, index: ActionId) -> &mut Self::Output {
        &mut self.actions[index]
    }
}

impl Index<NodeId> for Process {
    type Output = Node;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index]
    }
}
