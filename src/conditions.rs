//! Tri-state evaluation of audience condition trees.
//!
//! Leaves either match (`True`), do not match (`False`), or cannot be evaluated (`Unknown`).
//! Groups combine their operands with Kleene logic. Evaluation never fails: every problem is
//! folded into `Unknown` and reported as a [`ConditionError`].
use std::cmp::Ordering;

use derive_more::Display;

use crate::{
    datafile::{ConditionNode, ConditionType, LogicalOperator, MatchType, UserAttribute},
    error::ConditionError,
    semantic_version::SemanticVersion,
    AttributeValue, Attributes,
};

/// Result of evaluating a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum TriState {
    /// The condition matches.
    #[display("TRUE")]
    True,
    /// The condition does not match.
    #[display("FALSE")]
    False,
    /// The condition cannot be evaluated.
    #[display("UNKNOWN")]
    Unknown,
}

impl TriState {
    /// Kleene conjunction: `False` dominates.
    pub fn and(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Unknown,
        }
    }

    /// Kleene disjunction: `True` dominates.
    pub fn or(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    /// Only `True` admits a user; `Unknown` counts as a non-match.
    pub fn is_true(self) -> bool {
        self == TriState::True
    }
}

impl std::ops::Not for TriState {
    type Output = TriState;

    fn not(self) -> TriState {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        value.map_or(TriState::Unknown, TriState::from)
    }
}

impl From<TriState> for Option<bool> {
    fn from(value: TriState) -> Self {
        match value {
            TriState::True => Some(true),
            TriState::False => Some(false),
            TriState::Unknown => None,
        }
    }
}

/// Evaluate a tree of attribute conditions against `attributes`.
///
/// Audience references cannot be resolved here and evaluate to `Unknown`; use
/// [`AudienceResolver`](crate::AudienceResolver) for audience expressions.
pub fn evaluate(node: &ConditionNode, attributes: &Attributes) -> TriState {
    let mut errors = Vec::new();
    evaluate_collecting(node, attributes, &mut errors)
}

/// Same as [`evaluate`], appending the reason for every `Unknown` leaf or group to `errors`.
pub fn evaluate_collecting(
    node: &ConditionNode,
    attributes: &Attributes,
    errors: &mut Vec<ConditionError>,
) -> TriState {
    evaluate_tree(node, &mut AttributeLeaves { attributes, errors })
}

/// Resolves leaves of a condition tree during [`evaluate_tree`].
pub(crate) trait LeafResolver {
    /// Called for `AudienceId` and `Attribute` nodes.
    fn resolve(&mut self, leaf: &ConditionNode) -> Result<TriState, ConditionError>;

    fn on_error(&mut self, error: ConditionError);
}

pub(crate) struct AttributeLeaves<'a> {
    pub attributes: &'a Attributes,
    pub errors: &'a mut Vec<ConditionError>,
}

impl<'a> LeafResolver for AttributeLeaves<'a> {
    fn resolve(&mut self, leaf: &ConditionNode) -> Result<TriState, ConditionError> {
        match leaf {
            ConditionNode::Attribute(attribute) => {
                attribute.evaluate(self.attributes).map(Into::into)
            }
            ConditionNode::AudienceId(id) => Err(ConditionError::UnresolvedAudience(id.clone())),
            _ => Ok(TriState::Unknown),
        }
    }

    fn on_error(&mut self, error: ConditionError) {
        self.errors.push(error);
    }
}

/// A group whose operands are being evaluated.
struct Frame<'a> {
    op: LogicalOperator,
    operands: &'a [ConditionNode],
    next: usize,
    acc: TriState,
}

impl<'a> Frame<'a> {
    /// Fold one operand result in. Returns the group result once it is decided.
    fn absorb(&mut self, value: TriState) -> Option<TriState> {
        self.acc = match self.op {
            LogicalOperator::And => self.acc.and(value),
            LogicalOperator::Or => self.acc.or(value),
            LogicalOperator::Not => !value,
        };
        self.next += 1;

        let decided = match self.op {
            LogicalOperator::And => self.acc == TriState::False,
            LogicalOperator::Or => self.acc == TriState::True,
            LogicalOperator::Not => true,
        };
        (decided || self.next == self.operands.len()).then_some(self.acc)
    }
}

enum Step<'a> {
    Value(TriState),
    Enter(Frame<'a>),
}

fn start<'a, R: LeafResolver + ?Sized>(node: &'a ConditionNode, resolver: &mut R) -> Step<'a> {
    match node {
        ConditionNode::Attribute(_) | ConditionNode::AudienceId(_) => {
            Step::Value(resolver.resolve(node).unwrap_or_else(|err| {
                resolver.on_error(err);
                TriState::Unknown
            }))
        }
        ConditionNode::Operator(_) => {
            resolver.on_error(ConditionError::InvalidFormat("operator without operands"));
            Step::Value(TriState::Unknown)
        }
        ConditionNode::Group(children) => match children.split_first() {
            Some((ConditionNode::Operator(op), operands)) => {
                if operands.is_empty() {
                    resolver.on_error(ConditionError::InvalidFormat("empty group"));
                    return Step::Value(TriState::Unknown);
                }
                if *op == LogicalOperator::Not && operands.len() != 1 {
                    resolver.on_error(ConditionError::InvalidFormat(
                        "not expects exactly one operand",
                    ));
                    return Step::Value(TriState::Unknown);
                }
                Step::Enter(Frame {
                    op: *op,
                    operands,
                    next: 0,
                    acc: match op {
                        LogicalOperator::Or => TriState::False,
                        _ => TriState::True,
                    },
                })
            }
            _ => {
                resolver.on_error(ConditionError::InvalidFormat(
                    "group does not start with an operator",
                ));
                Step::Value(TriState::Unknown)
            }
        },
    }
}

/// Evaluate `root` with an explicit frame stack, so deeply nested trees do not grow the call
/// stack.
pub(crate) fn evaluate_tree<R: LeafResolver + ?Sized>(
    root: &ConditionNode,
    resolver: &mut R,
) -> TriState {
    let mut stack: Vec<Frame> = Vec::new();
    let mut node = root;

    loop {
        match start(node, resolver) {
            Step::Enter(frame) => stack.push(frame),
            // Propagate the value up through every group it completes.
            Step::Value(mut value) => loop {
                let Some(frame) = stack.last_mut() else {
                    return value;
                };
                match frame.absorb(value) {
                    Some(done) => {
                        stack.pop();
                        value = done;
                    }
                    None => break,
                }
            },
        }

        let Some(frame) = stack.last() else {
            return TriState::Unknown;
        };
        let operands = frame.operands;
        node = &operands[frame.next];
    }
}

impl UserAttribute {
    /// Evaluate this leaf against `attributes`.
    ///
    /// `exists` only checks that the attribute is present. Every other match type needs both a
    /// condition value and an attribute value of a compatible type.
    pub fn evaluate(&self, attributes: &Attributes) -> Result<bool, ConditionError> {
        if self.condition_type != Some(ConditionType::CustomAttribute) {
            return Err(ConditionError::UnsupportedConditionType {
                condition: self.to_string(),
            });
        }

        let match_type = self.effective_match_type();
        if match_type == MatchType::Unsupported {
            return Err(ConditionError::UnsupportedMatchType {
                condition: self.to_string(),
            });
        }

        let Some(name) = self.name.as_deref() else {
            return Err(ConditionError::MissingAttributeName {
                condition: self.to_string(),
            });
        };

        let attribute = attributes.get(name);
        if match_type == MatchType::Exists {
            return Ok(attribute.is_some());
        }

        let Some(attribute) = attribute else {
            return Err(ConditionError::MissingAttribute {
                condition: self.to_string(),
                name: name.to_owned(),
            });
        };
        let Some(value) = &self.value else {
            return Err(ConditionError::NullConditionValue {
                condition: self.to_string(),
            });
        };

        match match_type {
            MatchType::Exact => self.exact(name, value, attribute),
            MatchType::Substring => {
                let needle = value.as_str().ok_or_else(|| self.invalid_value())?;
                let haystack = attribute
                    .as_str()
                    .ok_or_else(|| self.type_mismatch(name, attribute))?;
                Ok(haystack.contains(needle))
            }
            MatchType::GreaterThan
            | MatchType::GreaterThanOrEqual
            | MatchType::LessThan
            | MatchType::LessThanOrEqual => {
                let ordering = self.compare_numbers(name, value, attribute)?;
                Ok(match match_type {
                    MatchType::GreaterThan => ordering == Ordering::Greater,
                    MatchType::GreaterThanOrEqual => ordering != Ordering::Less,
                    MatchType::LessThan => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }
            MatchType::SemverEq
            | MatchType::SemverLt
            | MatchType::SemverLe
            | MatchType::SemverGt
            | MatchType::SemverGe => {
                let ordering = self.compare_versions(name, value, attribute)?;
                Ok(match match_type {
                    MatchType::SemverEq => ordering == Ordering::Equal,
                    MatchType::SemverLt => ordering == Ordering::Less,
                    MatchType::SemverLe => ordering != Ordering::Greater,
                    MatchType::SemverGt => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                })
            }
            MatchType::Exists | MatchType::Unsupported => {
                Err(ConditionError::UnsupportedMatchType {
                    condition: self.to_string(),
                })
            }
        }
    }

    fn exact(
        &self,
        name: &str,
        value: &AttributeValue,
        attribute: &AttributeValue,
    ) -> Result<bool, ConditionError> {
        if !value.is_within_numeric_bounds() {
            return Err(self.invalid_value());
        }
        if !value.is_comparable_with(attribute) {
            return Err(self.type_mismatch(name, attribute));
        }
        if !attribute.is_within_numeric_bounds() {
            return Err(self.out_of_range(name));
        }

        Ok(match (value.as_f64(), attribute.as_f64()) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => value == attribute,
        })
    }

    /// Ordering of the attribute relative to the condition value.
    fn compare_numbers(
        &self,
        name: &str,
        value: &AttributeValue,
        attribute: &AttributeValue,
    ) -> Result<Ordering, ConditionError> {
        let expected = value
            .as_f64()
            .filter(|_| value.is_within_numeric_bounds())
            .ok_or_else(|| self.invalid_value())?;
        let actual = attribute
            .as_f64()
            .ok_or_else(|| self.type_mismatch(name, attribute))?;
        if !attribute.is_within_numeric_bounds() {
            return Err(self.out_of_range(name));
        }

        actual
            .partial_cmp(&expected)
            .ok_or_else(|| self.out_of_range(name))
    }

    fn compare_versions(
        &self,
        name: &str,
        value: &AttributeValue,
        attribute: &AttributeValue,
    ) -> Result<Ordering, ConditionError> {
        let target = value.as_str().ok_or_else(|| self.invalid_value())?;
        let actual = attribute
            .as_str()
            .ok_or_else(|| self.type_mismatch(name, attribute))?;

        let invalid = || ConditionError::InvalidSemanticVersion {
            condition: self.to_string(),
            name: name.to_owned(),
        };
        let target = SemanticVersion::parse(target).ok_or_else(invalid)?;
        let actual = SemanticVersion::parse(actual).ok_or_else(invalid)?;

        Ok(actual.compare(&target))
    }

    fn invalid_value(&self) -> ConditionError {
        ConditionError::InvalidConditionValue {
            condition: self.to_string(),
        }
    }

    fn type_mismatch(&self, name: &str, attribute: &AttributeValue) -> ConditionError {
        ConditionError::TypeMismatch {
            condition: self.to_string(),
            name: name.to_owned(),
            attribute: attribute.clone(),
        }
    }

    fn out_of_range(&self, name: &str) -> ConditionError {
        ConditionError::OutOfRange {
            condition: self.to_string(),
            name: name.to_owned(),
        }
    }
}
