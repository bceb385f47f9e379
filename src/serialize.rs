// Copyright 2025 Cornell University
// released under MIT License

use itertools::Itertools;

use crate::ir::*;

/// Pretty-prints an action in the syntax of its kind
pub fn serialize_action(action: &Action) -> String {
    let name = &action.name;
    match &action.kind {
        ActionKind::Block { .. } => format!("<{name}>"),
        ActionKind::Dispatch { broadcast, .. } => {
            format!("[{}{name}]", if *broadcast { "@" } else { "" })
        }
        ActionKind::Receive { replicative, .. } => {
            format!("({}{name})", if *replicative { "!" } else { "" })
        }
        ActionKind::Subprocess { .. } => format!("{{{name}}}"),
    }
}

/// Pretty-prints the subtree at `node` as a process expression
pub fn serialize_node(process: &Process, node: NodeId) -> String {
    match &process[node] {
        Node::Behaviour { action, .. } => serialize_action(&process[*action]),
        Node::Operator {
            kind: OperatorKind::Parentheses,
            children,
            ..
        } => match children.first() {
            Some(child) => format!("({})", serialize_node(process, *child)),
            None => "()".to_string(),
        },
        Node::Operator {
            kind: OperatorKind::Concatenation,
            children,
            ..
        } => children
            .iter()
            .map(|child| {
                let text = serialize_node(process, *child);
                // choice binds weaker than concatenation
                if process[*child].operator() == Some(OperatorKind::Choice) {
                    format!("({text})")
                } else {
                    text
                }
            })
            .join("."),
        Node::Operator {
            kind: OperatorKind::Choice,
            children,
            ..
        } => children
            .iter()
            .map(|child| serialize_node(process, *child))
            .join(" | "),
    }
}

/// Pretty-prints the action tree of `process`, empty if it has none
pub fn serialize_process(process: &Process) -> String {
    process
        .root()
        .map(|root| serialize_node(process, root))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::tests::{build_process, build_register_process};

    #[test]
    fn serialize_all_action_kinds() {
        let process = build_process("c/p", "(!a).(b).[@c].[d].<e>.{f}", &[("f", "<g>")]);
        insta::assert_snapshot!(serialize_process(&process), @"(!a).(b).[@c].[d].<e>.{f}");
    }

    #[test]
    fn choice_inside_sequence_gets_parentheses() {
        let mut process = Process::new("c", "p");
        let a = process.add_action(Action::block("a", vec![]));
        let b = process.add_action(Action::block("b", vec![]));
        let c = process.add_action(Action::block("c", vec![]));
        let sequence = process.add_operator(OperatorKind::Concatenation);
        let choice = process.add_operator(OperatorKind::Choice);
        let nodes: Vec<NodeId> = [a, b, c].map(|id| process.add_behaviour(id)).to_vec();
        process.attach(sequence, nodes[0]);
        process.attach(sequence, choice);
        process.attach(choice, nodes[1]);
        process.attach(choice, nodes[2]);
        process.set_root(sequence);
        insta::assert_snapshot!(serialize_process(&process), @"<a>.(<b> | <c>)");
    }

    #[test]
    fn reparse_is_identical() {
        let original = build_register_process();
        let text = serialize_process(&original);
        let mut description = crate::description::ProcessDescription::encode(&original);
        description.process = text.clone();
        let decoded = description.decode(&original.identity()).unwrap();
        assert_eq!(serialize_process(&decoded), text);
        assert_eq!(serialize_process(&Process::new("c", "empty")), "");
    }
}
