// Copyright 2025 Cornell University
// released under MIT License

use pest::error::InputLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::PrattParser;
use pest::Parser;
use pest_derive::Parser;

use crate::errors::ParseError;
use crate::ir::*;

#[derive(Parser)]
#[grammar = "process.pest"]
struct ProcessParser;

lazy_static::lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = {
        use pest::pratt_parser::{Assoc::*, Op};
        use Rule::*;

        // Precedence is defined lowest to highest
        PrattParser::new()
            .op(Op::infix(choice, Left))
            .op(Op::infix(concat, Left))
    };
}

/// The way an action is written in a process expression, which also
/// determines its kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Block,
    Receive { replicative: bool },
    Dispatch { broadcast: bool },
    Subprocess,
}

impl Syntax {
    pub fn describe(&self) -> &'static str {
        match self {
            Syntax::Block => "block",
            Syntax::Receive { .. } => "receive",
            Syntax::Dispatch { .. } => "dispatch",
            Syntax::Subprocess => "subprocess",
        }
    }

    /// A fresh action kind for this syntax
    pub fn kind(&self) -> ActionKind {
        match *self {
            Syntax::Block => ActionKind::Block { statements: vec![] },
            Syntax::Receive { replicative } => ActionKind::Receive {
                parameters: vec![],
                replicative,
            },
            Syntax::Dispatch { broadcast } => ActionKind::Dispatch {
                parameters: vec![],
                broadcast,
            },
            Syntax::Subprocess => ActionKind::Subprocess { body: None },
        }
    }
}

/// Owned syntax tree of a process expression with byte spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxedExpr {
    Action(Syntax, String, usize, usize),
    Binary(OperatorKind, Box<BoxedExpr>, Box<BoxedExpr>, usize, usize),
    Group(Box<BoxedExpr>, usize, usize),
}

impl BoxedExpr {
    pub fn start(&self) -> usize {
        match self {
            BoxedExpr::Action(_, _, start, _)
            | BoxedExpr::Binary(_, _, _, start, _)
            | BoxedExpr::Group(_, start, _) => *start,
        }
    }

    pub fn end(&self) -> usize {
        match self {
            BoxedExpr::Action(_, _, _, end)
            | BoxedExpr::Binary(_, _, _, _, end)
            | BoxedExpr::Group(_, _, end) => *end,
        }
    }

    /// Referenced actions in the order they are written
    pub fn references(&self) -> Vec<(&str, Syntax, usize, usize)> {
        let mut out = vec![];
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'e>(&'e self, out: &mut Vec<(&'e str, Syntax, usize, usize)>) {
        match self {
            BoxedExpr::Action(syntax, name, start, end) => out.push((name, *syntax, *start, *end)),
            BoxedExpr::Binary(_, lhs, rhs, _, _) => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
            BoxedExpr::Group(inner, _, _) => inner.collect_references(out),
        }
    }

    /// Operands of a chain of the same operator, e.g. `a.b.c` -> `[a, b, c]`
    fn operands(&self, kind: OperatorKind) -> Vec<&BoxedExpr> {
        match self {
            BoxedExpr::Binary(k, lhs, rhs, _, _) if *k == kind => {
                let mut operands = lhs.operands(kind);
                operands.extend(rhs.operands(kind));
                operands
            }
            other => vec![other],
        }
    }
}

fn syntax_error(err: pest::error::Error<Rule>) -> ParseError {
    let (start, end) = match err.location {
        InputLocation::Pos(start) => (start, start),
        InputLocation::Span(span) => span,
    };
    ParseError::Syntax {
        message: format!("Lexing failed: {}", err.variant.message()),
        start,
        end,
    }
}

fn parse_action(primary: Pair<Rule>, syntax: fn(bool) -> Syntax) -> BoxedExpr {
    let span = primary.as_span();
    let mut flag = false;
    let mut name = String::new();
    for inner in primary.into_inner() {
        match inner.as_rule() {
            Rule::replicative | Rule::broadcast => flag = true,
            Rule::name => name = inner.as_str().to_string(),
            rule => unreachable!("expected an action name, found {:?}", rule),
        }
    }
    BoxedExpr::Action(syntax(flag), name, span.start(), span.end())
}

fn parse_boxed_expr(pairs: Pairs<Rule>) -> BoxedExpr {
    PRATT_PARSER
        .map_primary(|primary| match primary.as_rule() {
            Rule::block => parse_action(primary, |_| Syntax::Block),
            Rule::receive => parse_action(primary, |replicative| Syntax::Receive { replicative }),
            Rule::dispatch => parse_action(primary, |broadcast| Syntax::Dispatch { broadcast }),
            Rule::subprocess => parse_action(primary, |_| Syntax::Subprocess),
            Rule::group => {
                let span = primary.as_span();
                let inner = primary
                    .into_inner()
                    .next()
                    .map(|expr| parse_boxed_expr(expr.into_inner()));
                match inner {
                    Some(inner) => BoxedExpr::Group(Box::new(inner), span.start(), span.end()),
                    None => unreachable!("group without an expression"),
                }
            }
            rule => unreachable!("expected an action or a group, found {:?}", rule),
        })
        .map_infix(|lhs, op, rhs| {
            let kind = match op.as_rule() {
                Rule::concat => OperatorKind::Concatenation,
                Rule::choice => OperatorKind::Choice,
                rule => unreachable!("expected an operator, found {:?}", rule),
            };
            let (start, end) = (lhs.start(), rhs.end());
            BoxedExpr::Binary(kind, Box::new(lhs), Box::new(rhs), start, end)
        })
        .parse(pairs)
}

/// Parses a process expression; `None` if it is empty
pub fn parse_expression(text: &str) -> Result<Option<BoxedExpr>, ParseError> {
    let pairs = ProcessParser::parse(Rule::process, text).map_err(syntax_error)?;
    let expr = pairs
        .flat_map(|process| process.into_inner())
        .find(|pair| pair.as_rule() == Rule::expr);
    Ok(expr.map(|expr| parse_boxed_expr(expr.into_inner())))
}

/// Builds the tree of `expr` in `process`, whose actions must already be
/// declared with kinds matching their syntax. Chains of the same operator
/// become a single operator node, explicit parentheses are kept.
pub fn link(process: &mut Process, expr: &BoxedExpr) -> Result<NodeId, ParseError> {
    match expr {
        BoxedExpr::Action(syntax, name, start, end) => {
            let Some(id) = process.action_id(name) else {
                return Err(ParseError::UndeclaredAction {
                    process: process.identity(),
                    name: name.clone(),
                    start: *start,
                    end: *end,
                });
            };
            let declared = process[id].kind.describe();
            if declared != syntax.describe() {
                return Err(ParseError::KindMismatch {
                    process: process.identity(),
                    name: name.clone(),
                    declared,
                    used: syntax.describe(),
                    start: *start,
                    end: *end,
                });
            }
            Ok(process.add_behaviour(id))
        }
        BoxedExpr::Group(inner, _, _) => {
            let child = link(process, inner)?;
            let parentheses = process.add_operator(OperatorKind::Parentheses);
            process.attach(parentheses, child);
            Ok(parentheses)
        }
        BoxedExpr::Binary(kind, _, _, _, _) => {
            let mut children = vec![];
            for operand in expr.operands(*kind) {
                children.push(link(process, operand)?);
            }
            let operator = process.add_operator(*kind);
            for child in children {
                process.attach(operator, child);
            }
            Ok(operator)
        }
    }
}
