//! Datafile models.
//!
//! The datafile is the JSON snapshot of a project: experiments, mutual-exclusion groups,
//! rollouts, feature flags and audiences. These types mirror its camelCase schema.
use std::collections::HashMap;

use serde::{de::Error as _, ser::SerializeSeq, Deserialize, Deserializer, Serialize, Serializer};

use crate::AttributeValue;

/// Decoded datafile, as published by the configuration service.
///
/// Only the entities needed for decisions are kept; events, attributes, and other sections are
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    /// Schema version, see [`SUPPORTED_DATAFILE_VERSIONS`](crate::SUPPORTED_DATAFILE_VERSIONS).
    pub version: String,
    /// Project the datafile belongs to.
    #[serde(default)]
    pub project_id: String,
    /// Account owning the project.
    #[serde(default)]
    pub account_id: String,
    /// Revision of the datafile, increasing with every change.
    #[serde(default)]
    pub revision: String,
    /// Experiments outside any group.
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    /// Groups, each carrying its member experiments.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Audiences with legacy, string-encoded conditions.
    #[serde(default)]
    pub audiences: Vec<Audience>,
    /// Audiences with structured conditions. They take precedence over `audiences` with the
    /// same id.
    #[serde(default)]
    pub typed_audiences: Vec<Audience>,
    /// Rollouts referenced by feature flags.
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
    /// Feature flags.
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
}

/// Lifecycle state of an experiment. Only [`ExperimentStatus::Running`] buckets users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    /// Live.
    Running,
    /// A winning variation was launched.
    Launched,
    /// Temporarily stopped.
    Paused,
    /// Not started yet.
    #[serde(rename = "Not started")]
    NotStarted,
    /// Finished and archived.
    Archived,
    /// Status not known to this version of the crate. Treated as not running.
    #[serde(other)]
    Unknown,
}

/// An experiment, or a rule of a rollout (rules share the experiment shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Unique id, also the entity id used for bucketing.
    pub id: String,
    /// Unique key used by hosts.
    pub key: String,
    /// Lifecycle state. Rollout rules are not gated on it.
    pub status: ExperimentStatus,
    /// Layer (campaign) id.
    #[serde(default)]
    pub layer_id: String,
    /// Variations users can be bucketed into.
    #[serde(default)]
    pub variations: Vec<Variation>,
    /// Cumulative slices mapping bucket values to variation ids.
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Legacy audience list, used only when `audience_conditions` is absent.
    #[serde(default)]
    pub audience_ids: Vec<String>,
    /// Audience expression over audience ids. An empty expression admits everyone.
    #[serde(default)]
    pub audience_conditions: Option<ConditionNode>,
    /// Whitelist: user id -> variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    /// Id of the mutual-exclusion group. Filled in when the datafile is indexed.
    #[serde(skip)]
    pub group_id: Option<String>,
}

impl Experiment {
    /// Only running experiments produce decisions.
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    /// Variation with the given id.
    pub fn get_variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.id == id)
    }

    /// Variation with the given key.
    pub fn get_variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.key == key)
    }
}

/// A variation of an experiment or rollout rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    /// Id referenced by traffic allocations and user profiles.
    pub id: String,
    /// Key returned to hosts.
    pub key: String,
    /// Whether the feature is on in this variation. Absent means off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_enabled: Option<bool>,
    /// Feature variable values of this variation.
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

impl Variation {
    /// `featureEnabled` missing from the datafile means disabled.
    pub fn is_feature_enabled(&self) -> bool {
        self.feature_enabled.unwrap_or(false)
    }
}

/// Value of a feature variable in a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUsage {
    /// Id of the [`FeatureVariable`].
    pub id: String,
    /// Value, encoded as a string.
    pub value: String,
}

/// One cumulative slice of a traffic allocation: `[previous.end_of_range, end_of_range)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    /// Variation or experiment id. Empty means the slice is unallocated.
    pub entity_id: String,
    /// Exclusive end of the slice, at most 10000.
    pub end_of_range: u32,
}

/// How members of a group share traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Members are mutually exclusive; users are first bucketed into one member.
    Random,
    /// No group-level bucketing.
    Overlapping,
}

/// A group of experiments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group id, also the entity id of the group-level bucketing.
    pub id: String,
    /// Traffic sharing policy.
    pub policy: GroupPolicy,
    /// Slices mapping bucket values to member experiment ids.
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
    /// Member experiments. Empty once indexed by [`ProjectConfig`](crate::ProjectConfig).
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

/// Ordered list of targeting rules. The last rule is the "everyone else" rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    /// Rollout id referenced by feature flags.
    pub id: String,
    /// Targeting rules, in evaluation order.
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

/// A feature flag: feature tests first, then a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    /// Flag id.
    pub id: String,
    /// Key used by hosts.
    pub key: String,
    /// Feature tests, tried in order.
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    /// Rollout id. Empty means no rollout.
    #[serde(default)]
    pub rollout_id: String,
    /// Variables declared by the flag.
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

/// A variable declared by a feature flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    /// Variable id.
    pub id: String,
    /// Variable key.
    pub key: String,
    /// Declared type, e.g. `string` or `integer`.
    #[serde(rename = "type")]
    pub variable_type: String,
    /// Value used when no variation overrides it.
    #[serde(default)]
    pub default_value: Option<String>,
}

/// A named condition tree over user attributes.
///
/// Legacy datafiles carry `conditions` as a JSON-encoded string; typed audiences carry the tree
/// itself. Both decode to the same [`ConditionNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAudience")]
pub struct Audience {
    /// Id referenced by audience expressions.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Condition tree over user attributes.
    pub conditions: ConditionNode,
}

#[derive(Deserialize)]
struct RawAudience {
    id: String,
    name: String,
    conditions: RawConditions,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawConditions {
    Legacy(String),
    Typed(ConditionNode),
}

impl TryFrom<RawAudience> for Audience {
    type Error = serde_json::Error;

    fn try_from(raw: RawAudience) -> Result<Self, Self::Error> {
        let conditions = match raw.conditions {
            RawConditions::Legacy(encoded) => serde_json::from_str(&encoded)?,
            RawConditions::Typed(conditions) => conditions,
        };
        Ok(Audience {
            id: raw.id,
            name: raw.name,
            conditions,
        })
    }
}

/// Operator heading a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    /// All operands.
    And,
    /// Any operand.
    Or,
    /// Negation of exactly one operand.
    Not,
}

impl LogicalOperator {
    /// JSON spelling of the operator.
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
            LogicalOperator::Not => "not",
        }
    }
}

/// Audience condition tree.
///
/// In JSON, `"and"`, `"or"`, and `"not"` are operators, any other string is an audience id,
/// an object is a user attribute condition, and an array is a group whose first element is
/// expected to be an operator (prefix notation).
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    /// Operator heading a group.
    Operator(LogicalOperator),
    /// Reference to an audience.
    AudienceId(String),
    /// Leaf condition.
    Attribute(UserAttribute),
    /// `[operator, operands...]`.
    Group(Vec<ConditionNode>),
}

impl ConditionNode {
    /// `[op, operands...]`
    pub fn group(op: LogicalOperator, operands: impl IntoIterator<Item = ConditionNode>) -> Self {
        ConditionNode::Group(
            std::iter::once(ConditionNode::Operator(op))
                .chain(operands)
                .collect(),
        )
    }

    /// `["and", operands...]`
    pub fn and(operands: impl IntoIterator<Item = ConditionNode>) -> Self {
        Self::group(LogicalOperator::And, operands)
    }

    /// `["or", operands...]`
    pub fn or(operands: impl IntoIterator<Item = ConditionNode>) -> Self {
        Self::group(LogicalOperator::Or, operands)
    }

    /// `["not", operand]`
    pub fn not(operand: ConditionNode) -> Self {
        Self::group(LogicalOperator::Not, [operand])
    }

    /// Audience reference.
    pub fn audience(id: impl Into<String>) -> Self {
        ConditionNode::AudienceId(id.into())
    }
}

impl TryFrom<serde_json::Value> for ConditionNode {
    type Error = serde_json::Error;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(match s.as_str() {
                "and" => ConditionNode::Operator(LogicalOperator::And),
                "or" => ConditionNode::Operator(LogicalOperator::Or),
                "not" => ConditionNode::Operator(LogicalOperator::Not),
                _ => ConditionNode::AudienceId(s),
            }),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(ConditionNode::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(ConditionNode::Group),
            serde_json::Value::Object(_) => {
                serde_json::from_value(value).map(ConditionNode::Attribute)
            }
            other => Err(serde_json::Error::custom(format!(
                "invalid condition node: {other}"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ConditionNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ConditionNode::try_from(value).map_err(D::Error::custom)
    }
}

impl Serialize for ConditionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConditionNode::Operator(op) => serializer.serialize_str(op.as_str()),
            ConditionNode::AudienceId(id) => serializer.serialize_str(id),
            ConditionNode::Attribute(attribute) => attribute.serialize(serializer),
            ConditionNode::Group(children) => {
                let mut seq = serializer.serialize_seq(Some(children.len()))?;
                for child in children {
                    seq.serialize_element(child)?;
                }
                seq.end()
            }
        }
    }
}

impl std::fmt::Display for ConditionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// Kind of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Compares a host-provided attribute.
    CustomAttribute,
    /// Parsed for forward compatibility; never evaluable.
    #[serde(other)]
    Unsupported,
}

/// Comparison applied by a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Equal value of a compatible type.
    Exact,
    /// Attribute is present.
    Exists,
    /// Attribute string contains the condition string.
    Substring,
    /// Attribute `>` condition value.
    #[serde(rename = "gt")]
    GreaterThan,
    /// Attribute `>=` condition value.
    #[serde(rename = "ge")]
    GreaterThanOrEqual,
    /// Attribute `<` condition value.
    #[serde(rename = "lt")]
    LessThan,
    /// Attribute `<=` condition value.
    #[serde(rename = "le")]
    LessThanOrEqual,
    /// Version equal, at the precision of the condition value.
    SemverEq,
    /// Version lower.
    SemverLt,
    /// Version lower or equal.
    SemverLe,
    /// Version greater.
    SemverGt,
    /// Version greater or equal.
    SemverGe,
    /// Parsed for forward compatibility; never evaluable.
    #[serde(other)]
    Unsupported,
}

/// Leaf condition comparing one user attribute with a condition value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAttribute {
    /// Attribute name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Only [`ConditionType::CustomAttribute`] is evaluable.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<ConditionType>,
    /// Legacy audiences omit `match`, which means [`MatchType::Exact`].
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    /// Condition value. Absent for `null` and non-scalar JSON.
    #[serde(
        default,
        deserialize_with = "deserialize_condition_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<AttributeValue>,
}

impl UserAttribute {
    /// A `custom_attribute` condition.
    pub fn new(
        name: impl Into<String>,
        match_type: MatchType,
        value: Option<AttributeValue>,
    ) -> Self {
        UserAttribute {
            name: Some(name.into()),
            condition_type: Some(ConditionType::CustomAttribute),
            match_type: Some(match_type),
            value,
        }
    }

    /// Match type, defaulting to [`MatchType::Exact`].
    pub fn effective_match_type(&self) -> MatchType {
        self.match_type.unwrap_or(MatchType::Exact)
    }
}

impl std::fmt::Display for UserAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

/// `null`, arrays, and objects are accepted but carry no usable value.
fn deserialize_condition_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<AttributeValue>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(AttributeValue::try_from(value).ok())
}
