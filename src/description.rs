// Copyright 2025 Cornell University
// released under MIT License

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use crate::collection::ProcessCollection;
use crate::errors::DecodeError;
use crate::ir::*;
use crate::parser::{link, parse_expression, BoxedExpr};
use crate::requirements::Requirements;
use crate::serialize::{serialize_node, serialize_process};

/// Category given to function models, which are keyed by name alone
pub const MODELS_CATEGORY: &str = "functions models";
const ENTRY_CATEGORY: &str = "entry_point";
const ENTRY_NAME: &str = "main";

fn is_false(value: &bool) -> bool {
    !value
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub resource: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub callback: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub parameter: bool,
}

impl LabelDescription {
    fn decode(&self, name: &str) -> Label {
        Label {
            name: name.to_string(),
            declaration: self.declaration.clone(),
            value: self.value.clone(),
            resource: self.resource,
            callback: self.callback,
            parameter: self.parameter,
        }
    }

    fn encode(label: &Label) -> Self {
        Self {
            declaration: label.declaration.clone(),
            value: label.value.clone(),
            resource: label.resource,
            callback: label.callback,
            parameter: label.parameter,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SavepointDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
    #[serde(rename = "require", default, skip_serializing_if = "Requirements::is_empty")]
    pub requirements: Requirements,
}

/// Attributes of an action. Its kind is not written here but follows from
/// the syntax used to reference it in process expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    /// Body of a subprocess
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub savepoints: BTreeMap<String, SavepointDescription>,
    #[serde(rename = "require", default, skip_serializing_if = "Requirements::is_empty")]
    pub requirements: Requirements,
    #[serde(
        rename = "weak require",
        default,
        skip_serializing_if = "Requirements::is_empty"
    )]
    pub weak_requirements: Requirements,
}

impl ActionDescription {
    /// Fills the declared `action` from this description
    fn apply(&self, action: &mut Action, process: &str) {
        action.comment = self.comment.clone();
        action.condition = self.condition.clone();
        action.requirements = self.requirements.clone();
        action.weak_requirements = self.weak_requirements.clone();
        action.savepoints = self
            .savepoints
            .iter()
            .map(|(name, savepoint)| Savepoint {
                name: name.clone(),
                comment: savepoint.comment.clone(),
                statements: savepoint.statements.clone(),
                requirements: savepoint.requirements.clone(),
            })
            .collect();

        match &mut action.kind {
            ActionKind::Block { statements } => *statements = self.statements.clone(),
            ActionKind::Dispatch { parameters, .. } | ActionKind::Receive { parameters, .. } => {
                *parameters = self.parameters.clone()
            }
            ActionKind::Subprocess { .. } => {}
        }
        if !self.statements.is_empty() && !matches!(action.kind, ActionKind::Block { .. }) {
            warn!(
                "ignoring statements of {} {} in {process}",
                action.kind.describe(),
                action.name
            );
        }
        if !self.parameters.is_empty() && !action.is_signal() {
            warn!(
                "ignoring parameters of {} {} in {process}",
                action.kind.describe(),
                action.name
            );
        }
    }

    fn encode(process: &Process, action: &Action) -> Self {
        let body = match &action.kind {
            ActionKind::Subprocess { body } => Some(
                body.map(|body| serialize_node(process, body))
                    .unwrap_or_default(),
            ),
            _ => None,
        };
        Self {
            comment: action.comment.clone(),
            condition: action.condition.clone(),
            statements: action.statements().to_vec(),
            parameters: action.parameters().to_vec(),
            process: body,
            savepoints: action
                .savepoints
                .iter()
                .map(|savepoint| {
                    let description = SavepointDescription {
                        comment: savepoint.comment.clone(),
                        statements: savepoint.statements.clone(),
                        requirements: savepoint.requirements.clone(),
                    };
                    (savepoint.name.clone(), description)
                })
                .collect(),
            requirements: action.requirements.clone(),
            weak_requirements: action.weak_requirements.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, LabelDescription>,
    /// Process expression of the whole process
    #[serde(default)]
    pub process: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, ActionDescription>,
}

impl ProcessDescription {
    fn parse(&self, identity: &str, text: &str) -> Result<Option<BoxedExpr>, DecodeError> {
        parse_expression(text).map_err(|source| DecodeError::Expression {
            process: identity.to_string(),
            expression: text.to_string(),
            source,
        })
    }

    /// Builds the process `category/name`. Actions are declared in the
    /// order they are first referenced, walking subprocess bodies breadth
    /// first from the process expression.
    pub fn decode(&self, identity: &str) -> Result<Process, DecodeError> {
        let (category, name) = identity.split_once('/').unwrap_or(("", identity));
        let declared = (
            self.category.as_deref().unwrap_or(category),
            self.name.as_deref().unwrap_or(name),
        );
        if declared != (category, name) {
            return Err(DecodeError::KeyMismatch {
                key: identity.to_string(),
                identity: format!("{}/{}", declared.0, declared.1),
            });
        }

        let mut process = Process::new(category, name);
        process.comment = self.comment.clone();
        for (label, description) in &self.labels {
            process.add_label(description.decode(label));
        }

        let root = self.parse(identity, &self.process)?;
        let mut bodies: Vec<(ActionId, String, Option<BoxedExpr>)> = vec![];
        let mut queue: VecDeque<BoxedExpr> = root.iter().cloned().collect();
        while let Some(expr) = queue.pop_front() {
            for (reference, syntax, _, _) in expr.references() {
                if let Some(id) = process.action_id(reference) {
                    let first = process[id].kind.describe();
                    if first != syntax.describe() {
                        return Err(DecodeError::ConflictingUse {
                            process: identity.to_string(),
                            action: reference.to_string(),
                            first,
                            second: syntax.describe(),
                        });
                    }
                    continue;
                }

                let mut action = Action::new(reference, syntax.kind());
                let description = self.actions.get(reference);
                if let Some(description) = description {
                    description.apply(&mut action, identity);
                }
                let id = process.add_action(action);
                if let ActionKind::Subprocess { .. } = process[id].kind {
                    let Some(text) = description.and_then(|d| d.process.as_ref()) else {
                        return Err(DecodeError::MissingBody {
                            process: identity.to_string(),
                            action: reference.to_string(),
                        });
                    };
                    let body = self.parse(identity, text)?;
                    queue.extend(body.iter().cloned());
                    bodies.push((id, text.clone(), body));
                }
            }
        }

        let linked = |process: &mut Process, text: &str, expr: &BoxedExpr| {
            link(process, expr).map_err(|source| DecodeError::Expression {
                process: identity.to_string(),
                expression: text.to_string(),
                source,
            })
        };
        if let Some(root) = &root {
            let node = linked(&mut process, &self.process, root)?;
            process.set_root(node);
        }
        for (id, text, body) in &bodies {
            let node = match body {
                Some(body) => linked(&mut process, text, body)?,
                None => process.add_operator(OperatorKind::Concatenation),
            };
            process.set_body(*id, node);
        }

        for unused in self.actions.keys() {
            if process.action_id(unused).is_none() {
                warn!("action {unused} of {identity} is described but never used");
            }
        }
        Ok(process)
    }

    /// Describes the reachable part of `process`
    pub fn encode(process: &Process) -> Self {
        let reachable = process.reachable_actions();
        Self {
            category: Some(process.category.clone()),
            name: Some(process.name.clone()),
            comment: process.comment.clone(),
            labels: process
                .labels
                .iter()
                .map(|(name, label)| (name.clone(), LabelDescription::encode(label)))
                .collect(),
            process: serialize_process(process),
            actions: process
                .actions()
                .filter(|(id, _)| reachable.contains(id))
                .map(|(_, action)| {
                    (
                        action.name.clone(),
                        ActionDescription::encode(process, action),
                    )
                })
                .collect(),
        }
    }
}

/// JSON form of a `ProcessCollection`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionDescription {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Scenario each process was built from, present on generated models
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(rename = "functions models", default)]
    pub models: BTreeMap<String, ProcessDescription>,
    #[serde(rename = "environment processes", default)]
    pub environment: BTreeMap<String, ProcessDescription>,
    #[serde(
        rename = "main process",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub entry: Option<ProcessDescription>,
}

impl CollectionDescription {
    pub fn from_json(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, DecodeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn decode(&self) -> Result<ProcessCollection, DecodeError> {
        let mut collection = ProcessCollection::new(self.name.clone());
        collection.attributes = self.attributes.clone();
        for (name, description) in &self.models {
            let category = description.category.as_deref().unwrap_or(MODELS_CATEGORY);
            collection.add_model(description.decode(&format!("{category}/{name}"))?);
        }
        for (key, description) in &self.environment {
            collection.add_environment(description.decode(key)?);
        }
        if let Some(description) = &self.entry {
            let identity = format!(
                "{}/{}",
                description.category.as_deref().unwrap_or(ENTRY_CATEGORY),
                description.name.as_deref().unwrap_or(ENTRY_NAME)
            );
            collection.entry = Some(description.decode(&identity)?);
        }
        Ok(collection)
    }

    pub fn encode(collection: &ProcessCollection) -> Self {
        Self {
            name: collection.name.clone(),
            attributes: collection.attributes.clone(),
            models: collection
                .models
                .iter()
                .map(|(name, process)| (name.clone(), ProcessDescription::encode(process)))
                .collect(),
            environment: collection
                .environment
                .iter()
                .map(|(key, process)| (key.clone(), ProcessDescription::encode(process)))
                .collect(),
            entry: collection.entry.as_ref().map(ProcessDescription::encode),
        }
    }
}
