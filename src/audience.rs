use std::collections::HashMap;

use crate::{
    conditions::{evaluate_tree, AttributeLeaves, LeafResolver},
    datafile::{Audience, ConditionNode, Experiment},
    error::ConditionError,
    reasons::{DecisionReasons, EvaluationKind, Reason},
    Attributes, TriState,
};

/// Evaluates audience expressions against the audience table of one snapshot.
///
/// An audience expression is a condition tree whose leaves are audience ids. Each id is
/// resolved by evaluating that audience's own condition tree.
#[derive(Debug, Clone, Copy)]
pub struct AudienceResolver<'a> {
    audiences: &'a HashMap<String, Audience>,
}

impl<'a> AudienceResolver<'a> {
    /// Resolver over `audiences`, keyed by audience id.
    pub fn new(audiences: &'a HashMap<String, Audience>) -> Self {
        AudienceResolver { audiences }
    }

    /// Evaluate a single audience. An unknown id is `Unknown`.
    pub fn evaluate_audience_id(&self, id: &str, attributes: &Attributes) -> TriState {
        self.evaluate_expression(&ConditionNode::audience(id), attributes)
    }

    /// Evaluate an expression whose leaves are audience ids.
    pub fn evaluate_expression(&self, node: &ConditionNode, attributes: &Attributes) -> TriState {
        let mut errors = Vec::new();
        self.evaluate_expression_collecting(node, attributes, &mut errors)
    }

    pub(crate) fn evaluate_expression_collecting(
        &self,
        node: &ConditionNode,
        attributes: &Attributes,
        errors: &mut Vec<ConditionError>,
    ) -> TriState {
        evaluate_tree(
            node,
            &mut AudienceLeaves {
                audiences: self.audiences,
                attributes,
                errors,
            },
        )
    }

    /// Audience gate of an experiment or rollout rule.
    ///
    /// `audience_conditions`, when present, is used even if it is empty (an empty expression
    /// admits everyone). Otherwise the legacy `audience_ids` list is an implicit OR, and an
    /// empty list admits everyone. Only `True` admits the user; the combined result, including
    /// `Unknown`, is recorded in `reasons`.
    pub fn evaluate_experiment_audiences(
        &self,
        experiment: &Experiment,
        attributes: &Attributes,
        kind: EvaluationKind,
        logging_key: &str,
        reasons: &mut DecisionReasons,
    ) -> bool {
        let mut errors = Vec::new();
        let result = match &experiment.audience_conditions {
            Some(ConditionNode::Group(children)) if children.is_empty() => TriState::True,
            Some(conditions) => {
                self.evaluate_expression_collecting(conditions, attributes, &mut errors)
            }
            None if experiment.audience_ids.is_empty() => TriState::True,
            None => {
                let legacy = ConditionNode::or(
                    experiment
                        .audience_ids
                        .iter()
                        .map(|id| ConditionNode::audience(id.as_str())),
                );
                self.evaluate_expression_collecting(&legacy, attributes, &mut errors)
            }
        };

        for error in errors {
            reasons.add(Reason::ConditionUnevaluable(error));
        }
        reasons.add(Reason::AudienceEvaluationResult {
            kind,
            logging_key: logging_key.to_owned(),
            result,
        });

        result.is_true()
    }
}

struct AudienceLeaves<'a, 'e> {
    audiences: &'a HashMap<String, Audience>,
    attributes: &'a Attributes,
    errors: &'e mut Vec<ConditionError>,
}

impl<'a, 'e> LeafResolver for AudienceLeaves<'a, 'e> {
    fn resolve(&mut self, leaf: &ConditionNode) -> Result<TriState, ConditionError> {
        match leaf {
            ConditionNode::AudienceId(id) => {
                let audience = self
                    .audiences
                    .get(id)
                    .ok_or_else(|| ConditionError::AudienceNotFound(id.clone()))?;

                let result = evaluate_tree(
                    &audience.conditions,
                    &mut AttributeLeaves {
                        attributes: self.attributes,
                        errors: &mut *self.errors,
                    },
                );
                log::trace!(target: "feature_decide",
                            audience_id = id.as_str(),
                            result:display = result;
                            "evaluated audience ({})", audience.name);
                Ok(result)
            }
            ConditionNode::Attribute(attribute) => {
                attribute.evaluate(self.attributes).map(Into::into)
            }
            _ => Ok(TriState::Unknown),
        }
    }

    fn on_error(&mut self, error: ConditionError) {
        self.errors.push(error);
    }
}
