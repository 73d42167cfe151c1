//! Property values
//!
//! The small value enum stored on vertex and edge properties. The substrate
//! indexes vertices by `(key, value)` pairs, so `PropertyValue` implements
//! `Eq` and `Hash`; doubles compare and hash by their bit pattern.

use serde::{Deserialize, Serialize};

/// A value stored on a vertex or edge property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    /// UTF-8 string
    Str(String),
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Bool(bool),
}

impl PropertyValue {
    /// The string value, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer value, if this is a `Long`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The float value, if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::Long(a), PropertyValue::Long(b)) => a == b,
            (PropertyValue::Double(a), PropertyValue::Double(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl std::hash::Hash for PropertyValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            PropertyValue::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            PropertyValue::Long(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            PropertyValue::Double(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            PropertyValue::Bool(v) => {
                3u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl std::fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Str(s) => write!(f, "{}", s),
            PropertyValue::Long(v) => write!(f, "{}", v),
            PropertyValue::Double(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Str(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(v: &PropertyValue) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn doubles_compare_by_bits() {
        assert_eq!(PropertyValue::Double(1.5), PropertyValue::Double(1.5));
        assert_ne!(PropertyValue::Double(0.0), PropertyValue::Double(-0.0));
        assert_eq!(
            hash_of(&PropertyValue::Double(2.25)),
            hash_of(&PropertyValue::Double(2.25))
        );
    }

    #[test]
    fn cross_variant_values_differ() {
        assert_ne!(PropertyValue::Long(1), PropertyValue::Bool(true));
        assert_ne!(
            PropertyValue::Str("1".into()),
            PropertyValue::Long(1),
        );
    }

    #[test]
    fn accessors_match_variant() {
        assert_eq!(PropertyValue::from("x").as_str(), Some("x"));
        assert_eq!(PropertyValue::from(7i64).as_long(), Some(7));
        assert_eq!(PropertyValue::from(true).as_bool(), Some(true));
        assert_eq!(PropertyValue::from(7i64).as_str(), None);
    }
}
