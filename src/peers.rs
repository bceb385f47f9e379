// Copyright 2025 Cornell University
// released under MIT License

use log::debug;
use std::collections::BTreeSet;

use crate::ir::{Action, ActionId, ActionKind, Process};

/// The label a signal parameter refers to: `%name%` -> `name`
pub fn label_reference(parameter: &str) -> Option<&str> {
    parameter
        .strip_prefix('%')
        .and_then(|p| p.strip_suffix('%'))
        .filter(|name| !name.is_empty())
}

fn normalize_declaration(declaration: &str) -> String {
    declaration.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Whether two C declarations may describe the same value. Unknown
/// declarations match anything and `void *` matches any pointer.
pub fn compatible_declarations(first: Option<&str>, second: Option<&str>) -> bool {
    match (first, second) {
        (None, _) | (_, None) => true,
        (Some(first), Some(second)) => {
            let first = normalize_declaration(first);
            let second = normalize_declaration(second);
            first == second
                || (first == "void*" && second.ends_with('*'))
                || (second == "void*" && first.ends_with('*'))
        }
    }
}

fn opposite_kinds(first: &Action, second: &Action) -> bool {
    matches!(
        (&first.kind, &second.kind),
        (ActionKind::Dispatch { .. }, ActionKind::Receive { .. })
            | (ActionKind::Receive { .. }, ActionKind::Dispatch { .. })
    )
}

impl Process {
    /// Label pairs `(ours, theirs)` passed through matching signal parameters,
    /// or `None` if some parameter pair is incompatible
    fn matching_labels(
        &self,
        ours: &Action,
        other: &Process,
        theirs: &Action,
    ) -> Option<Vec<(String, String)>> {
        if ours.parameters().len() != theirs.parameters().len() {
            return None;
        }
        let mut pairs = vec![];
        for (mine, foreign) in ours.parameters().iter().zip(theirs.parameters()) {
            let mine = self.labels.get(label_reference(mine)?)?;
            let foreign = other.labels.get(label_reference(foreign)?)?;
            if !compatible_declarations(mine.declaration.as_deref(), foreign.declaration.as_deref())
            {
                return None;
            }
            pairs.push((mine.name.clone(), foreign.name.clone()));
        }
        Some(pairs)
    }

    /// Fills a label with an unknown declaration from its counterpart
    fn adopt_declaration(&mut self, label: &str, declaration: Option<&String>) {
        if let (Some(label), Some(declaration)) = (self.labels.get_mut(label), declaration) {
            if label.declaration.is_none() {
                label.declaration = Some(declaration.clone());
            }
        }
    }

    /// Links the dispatches of one process with the equally named receives
    /// of the other (and vice versa). Both processes record the signal names
    /// under the identity of their peer. Unknown label declarations are
    /// adopted from the peer.
    pub fn establish_peers(&mut self, other: &mut Process) {
        let reachable = other.reachable_actions();
        let mut matched: Vec<(String, Vec<(String, String)>)> = vec![];
        for id in self.reachable_actions() {
            let ours = &self[id];
            let Some(theirs) = other
                .action_id(&ours.name)
                .filter(|id| reachable.contains(id))
                .map(|id: ActionId| &other[id])
            else {
                continue;
            };
            if !opposite_kinds(ours, theirs) {
                continue;
            }
            match self.matching_labels(ours, other, theirs) {
                Some(pairs) => matched.push((ours.name.clone(), pairs)),
                None => debug!(
                    "signal {} of {} and {} have incompatible parameters",
                    ours.name,
                    self.identity(),
                    other.identity()
                ),
            }
        }

        for (signal, pairs) in matched {
            for (mine, theirs) in pairs {
                let our_declaration = self.labels[&mine].declaration.clone();
                let their_declaration = other.labels[&theirs].declaration.clone();
                self.adopt_declaration(&mine, their_declaration.as_ref());
                other.adopt_declaration(&theirs, our_declaration.as_ref());
            }
            self.peers
                .entry(other.identity())
                .or_default()
                .insert(signal.clone());
            other
                .peers
                .entry(self.identity())
                .or_default()
                .insert(signal);
        }
    }

    /// Names of the signals that have a peer in some process
    pub fn peered_signals(&self) -> BTreeSet<&str> {
        self.peers
            .values()
            .flat_map(|signals| signals.iter().map(String::as_str))
            .collect()
    }

    /// Reachable dispatches and receives without any peer
    pub fn unmatched_signals(&self) -> Vec<ActionId> {
        let peered = self.peered_signals();
        self.reachable_actions()
            .into_iter()
            .filter(|id| self[*id].is_signal() && !peered.contains(self[*id].name.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Label, OperatorKind};

    /// `<name>` of kind `kind` with one parameter `%label%` as the whole tree
    fn signal_process(identity: &str, kind: ActionKind, label: Label) -> Process {
        let (category, name) = identity.split_once('/').unwrap();
        let mut process = Process::new(category, name);
        let parameter = format!("%{}%", label.name);
        process.add_label(label);
        let kind = match kind {
            ActionKind::Dispatch { broadcast, .. } => ActionKind::Dispatch {
                parameters: vec![parameter],
                broadcast,
            },
            ActionKind::Receive { replicative, .. } => ActionKind::Receive {
                parameters: vec![parameter],
                replicative,
            },
            other => other,
        };
        let signal = process.add_action(Action::new("register", kind));
        let idle = process.add_action(Action::block("idle", vec![]));
        let root = process.add_operator(OperatorKind::Concatenation);
        let signal_node = process.add_behaviour(signal);
        let idle_node = process.add_behaviour(idle);
        process.attach(root, signal_node);
        process.attach(root, idle_node);
        process.set_root(root);
        process
    }

    fn dispatcher(declaration: Option<&str>) -> Process {
        signal_process(
            "main/entry",
            ActionKind::Dispatch {
                parameters: vec![],
                broadcast: false,
            },
            Label::new("device", declaration.map(String::from)),
        )
    }

    fn receiver(declaration: Option<&str>) -> Process {
        signal_process(
            "platform/driver",
            ActionKind::Receive {
                parameters: vec![],
                replicative: true,
            },
            Label::new("dev", declaration.map(String::from)),
        )
    }

    #[test]
    fn label_references() {
        assert_eq!(label_reference("%device%"), Some("device"));
        assert_eq!(label_reference("%%"), None);
        assert_eq!(label_reference("device"), None);
    }

    #[test]
    fn declaration_compatibility() {
        assert!(compatible_declarations(None, Some("int")));
        assert!(compatible_declarations(Some("struct device *"), Some("struct device*")));
        assert!(compatible_declarations(Some("void *"), Some("struct device *")));
        assert!(!compatible_declarations(Some("void *"), Some("int")));
        assert!(!compatible_declarations(Some("int"), Some("long")));
    }

    #[test]
    fn peers_are_symmetric_and_idempotent() {
        let mut entry = dispatcher(Some("struct device *"));
        let mut driver = receiver(Some("struct device *"));
        entry.establish_peers(&mut driver);
        entry.establish_peers(&mut driver);
        assert_eq!(
            entry.peers["platform/driver"],
            BTreeSet::from(["register".to_string()])
        );
        assert_eq!(entry.peers.len(), 1);
        assert_eq!(driver.peers["main/entry"].len(), 1);
        assert!(driver.unmatched_signals().is_empty());
    }

    #[test]
    fn unknown_declaration_is_adopted() {
        let mut entry = dispatcher(Some("struct device *"));
        let mut driver = receiver(None);
        driver.establish_peers(&mut entry);
        assert_eq!(
            driver.labels["dev"].declaration.as_deref(),
            Some("struct device *")
        );
    }

    #[test]
    fn incompatible_parameters_do_not_peer() {
        let mut entry = dispatcher(Some("int"));
        let mut driver = receiver(Some("struct device *"));
        entry.establish_peers(&mut driver);
        assert!(entry.peers.is_empty());
        assert!(driver.peers.is_empty());
        let register = driver.action_id("register").unwrap();
        assert_eq!(driver.unmatched_signals(), vec![register]);
    }

    #[test]
    fn equal_kinds_do_not_peer() {
        let mut first = receiver(None);
        let mut second = receiver(None);
        second.category = "other".to_string();
        first.establish_peers(&mut second);
        assert!(first.peers.is_empty());
    }
}
