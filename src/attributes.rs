use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing user attributes.
///
/// # Examples
/// ```
/// # use feature_decide::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.into()),
///     ("country".to_owned(), "us".into()),
///     ("is_premium".to_owned(), true.into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Largest magnitude accepted for numeric comparisons (2^53).
const MAX_NUMERIC_MAGNITUDE: f64 = 9_007_199_254_740_992.0;
const MAX_INTEGER_MAGNITUDE: u64 = 1 << 53;

/// Typed value of a user attribute or of a condition.
///
/// Integers and doubles compare with each other; strings and booleans only compare with their
/// own type.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// An integer value. Only `[-2^53, 2^53]` is usable in comparisons.
    Integer(i64),
    /// A floating-point value.
    Double(f64),
    /// A boolean value.
    Boolean(bool),
}

impl AttributeValue {
    /// Return the string slice if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value, treating integers and doubles alike.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns `true` if the value is not a number or is a finite number within `[-2^53, 2^53]`.
    ///
    /// Integers are checked before conversion: `2^53 + 1` rounds to `2^53` as an `f64`.
    pub(crate) fn is_within_numeric_bounds(&self) -> bool {
        match self {
            AttributeValue::Integer(i) => i.unsigned_abs() <= MAX_INTEGER_MAGNITUDE,
            AttributeValue::Double(d) => d.is_finite() && d.abs() <= MAX_NUMERIC_MAGNITUDE,
            _ => true,
        }
    }

    /// Whether two values may be compared for equality or order.
    pub(crate) fn is_comparable_with(&self, other: &AttributeValue) -> bool {
        matches!(
            (self, other),
            (AttributeValue::String(_), AttributeValue::String(_))
                | (AttributeValue::Boolean(_), AttributeValue::Boolean(_))
                | (
                    AttributeValue::Integer(_) | AttributeValue::Double(_),
                    AttributeValue::Integer(_) | AttributeValue::Double(_)
                )
        )
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

/// Conversion from untyped JSON. `null`, arrays, and objects have no attribute representation.
impl TryFrom<serde_json::Value> for AttributeValue {
    type Error = serde_json::Value;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::String(s) => Ok(Self::String(s)),
            serde_json::Value::Bool(b) => Ok(Self::Boolean(b)),
            serde_json::Value::Number(ref n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Double(f))
                } else {
                    Err(value)
                }
            }
            other => Err(other),
        }
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "string({s})"),
            AttributeValue::Integer(i) => write!(f, "int({i})"),
            AttributeValue::Double(d) => write!(f, "double({d})"),
            AttributeValue::Boolean(b) => write!(f, "bool({b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AttributeValue;

    #[test]
    fn deserializes_integers_and_doubles_separately() {
        let values: Vec<AttributeValue> =
            serde_json::from_value(json!(["us", 30, 30.5, true])).unwrap();
        assert_eq!(
            values,
            vec![
                AttributeValue::String("us".into()),
                AttributeValue::Integer(30),
                AttributeValue::Double(30.5),
                AttributeValue::Boolean(true),
            ]
        );
    }

    #[test]
    fn integer_and_double_are_comparable() {
        assert!(AttributeValue::from(1).is_comparable_with(&AttributeValue::from(1.0)));
        assert!(AttributeValue::from(1.0).is_comparable_with(&AttributeValue::from(1)));
        assert!(!AttributeValue::from("1").is_comparable_with(&AttributeValue::from(1)));
        assert!(!AttributeValue::from(true).is_comparable_with(&AttributeValue::from(1)));
    }

    #[test]
    fn numeric_bounds() {
        assert!(AttributeValue::from(2f64.powi(53)).is_within_numeric_bounds());
        assert!(AttributeValue::from(-(2f64.powi(53))).is_within_numeric_bounds());
        assert!(!AttributeValue::from(2f64.powi(53) + 2.0).is_within_numeric_bounds());
        assert!(!AttributeValue::from(f64::INFINITY).is_within_numeric_bounds());
        assert!(!AttributeValue::from(f64::NAN).is_within_numeric_bounds());
        assert!(!AttributeValue::Integer(i64::MAX).is_within_numeric_bounds());
        assert!(!AttributeValue::Integer(i64::MIN).is_within_numeric_bounds());
        assert!(AttributeValue::Integer(1 << 53).is_within_numeric_bounds());
        assert!(AttributeValue::Integer(-(1 << 53)).is_within_numeric_bounds());
        assert!(!AttributeValue::Integer((1 << 53) + 1).is_within_numeric_bounds());
        assert!(!AttributeValue::Integer(-(1 << 53) - 1).is_within_numeric_bounds());
        assert!(AttributeValue::from("not a number").is_within_numeric_bounds());
    }

    #[test]
    fn converts_from_json() {
        assert_eq!(
            AttributeValue::try_from(json!(42)),
            Ok(AttributeValue::Integer(42))
        );
        assert_eq!(
            AttributeValue::try_from(json!(4.2)),
            Ok(AttributeValue::Double(4.2))
        );
        assert!(AttributeValue::try_from(json!(null)).is_err());
        assert!(AttributeValue::try_from(json!({"a": 1})).is_err());
        assert!(AttributeValue::try_from(json!([1])).is_err());
    }
}
