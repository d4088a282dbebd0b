use std::sync::Arc;

use thiserror::Error;

use crate::AttributeValue;

/// Result type for host-level operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Host-level errors.
///
/// None of these is produced by a decision itself: "no decision" is represented by an absent
/// variation, and unevaluable conditions by [`ConditionError`] entries in the reason trail.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No configuration snapshot has been published yet.
    #[error("configuration missing")]
    ConfigurationMissing,

    /// The datafile is not valid JSON or does not follow the datafile schema.
    #[error("error parsing datafile")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    DatafileParseError(#[source] Arc<serde_json::Error>),

    /// The datafile declares a schema version this crate cannot evaluate.
    #[error("unsupported datafile version: {0}")]
    UnsupportedDatafileVersion(String),

    /// No experiment with the given key exists in the snapshot.
    #[error("experiment ({0}) not found")]
    ExperimentNotFound(String),

    /// No feature flag with the given key exists in the snapshot.
    #[error("feature flag ({0}) not found")]
    FeatureFlagNotFound(String),

    /// The experiment has no variation with the given key.
    #[error("variation ({variation_key}) not found in experiment ({experiment_key})")]
    VariationNotFound {
        /// Key of the experiment.
        experiment_key: String,
        /// Requested variation key.
        variation_key: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::DatafileParseError(Arc::new(value))
    }
}

/// Reason a condition could not be evaluated. Evaluation folds every one of these into
/// [`TriState::Unknown`](crate::TriState::Unknown).
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConditionError {
    /// The attribute referenced by the condition is not present.
    #[error("condition ({condition}) evaluated to UNKNOWN because no value was passed for user attribute ({name})")]
    MissingAttribute {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// The condition has no value but its match type needs one.
    #[error("condition ({condition}) evaluated to UNKNOWN because the condition value is null")]
    NullConditionValue {
        /// Serialized condition.
        condition: String,
    },

    /// The condition value cannot be used with the match type.
    #[error("condition ({condition}) has an unsupported value for its match type")]
    InvalidConditionValue {
        /// Serialized condition.
        condition: String,
    },

    /// Attribute and condition values have incompatible types.
    #[error("condition ({condition}) evaluated to UNKNOWN because a value of type ({attribute}) was passed for user attribute ({name})")]
    TypeMismatch {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
        /// Value passed for the attribute.
        attribute: AttributeValue,
    },

    /// A numeric value is outside `[-2^53, 2^53]` or not finite.
    #[error("condition ({condition}) evaluated to UNKNOWN because the number value for user attribute ({name}) is not in the range [-2^53, +2^53]")]
    OutOfRange {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// Either the attribute or the condition value is not a valid semantic version.
    #[error("condition ({condition}) evaluated to UNKNOWN because of an invalid semantic version for user attribute ({name})")]
    InvalidSemanticVersion {
        /// Serialized condition.
        condition: String,
        /// Attribute name.
        name: String,
    },

    /// The condition type is not `custom_attribute`.
    #[error("condition ({condition}) uses an unknown condition type")]
    UnsupportedConditionType {
        /// Serialized condition.
        condition: String,
    },

    /// The match type is not known to this version.
    #[error("condition ({condition}) uses an unknown match type")]
    UnsupportedMatchType {
        /// Serialized condition.
        condition: String,
    },

    /// The condition does not name an attribute.
    #[error("condition ({condition}) has no attribute name")]
    MissingAttributeName {
        /// Serialized condition.
        condition: String,
    },

    /// The condition tree is structurally invalid.
    #[error("condition has invalid format: {0}")]
    InvalidFormat(&'static str),

    /// An audience expression references an audience that is not in the snapshot.
    #[error("audience ({0}) not found")]
    AudienceNotFound(String),

    /// An audience reference was found in a tree that is evaluated without an audience table.
    #[error("audience ({0}) cannot be evaluated outside of an audience expression")]
    UnresolvedAudience(String),
}
