//! Resource datatypes
//!
//! The closed set of value datatypes a resource type may declare, and the
//! runtime value representation. A resource type's datatype is immutable
//! once created and decides which datatype-specific vertex property holds
//! its instances' values.

use crate::schema::VertexProp;
use crate::value::PropertyValue;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The declared datatype of a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// Calendar date
    Date,
}

impl Datatype {
    /// All supported datatypes.
    pub const ALL: [Datatype; 5] = [
        Datatype::String,
        Datatype::Long,
        Datatype::Double,
        Datatype::Boolean,
        Datatype::Date,
    ];

    /// The canonical string persisted under the `DATA_TYPE` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::String => "string",
            Datatype::Long => "long",
            Datatype::Double => "double",
            Datatype::Boolean => "boolean",
            Datatype::Date => "date",
        }
    }

    /// Parse a datatype from its persisted string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Datatype::String),
            "long" => Some(Datatype::Long),
            "double" => Some(Datatype::Double),
            "boolean" => Some(Datatype::Boolean),
            "date" => Some(Datatype::Date),
            _ => None,
        }
    }

    /// The vertex property holding values of this datatype.
    pub fn value_property(&self) -> VertexProp {
        match self {
            Datatype::String => VertexProp::ValueString,
            Datatype::Long => VertexProp::ValueLong,
            Datatype::Double => VertexProp::ValueDouble,
            Datatype::Boolean => VertexProp::ValueBoolean,
            Datatype::Date => VertexProp::ValueDate,
        }
    }

    /// Comma-separated list of all supported datatype names, for error
    /// messages.
    pub fn supported() -> String {
        Self::ALL
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for Datatype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A runtime resource value.
///
/// Dates persist as ISO-8601 strings under `VALUE_DATE`; every other variant
/// persists as the matching `PropertyValue` variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Boolean(bool),
    /// Calendar date
    Date(NaiveDate),
}

impl DataValue {
    /// The datatype of this value.
    pub fn datatype(&self) -> Datatype {
        match self {
            DataValue::String(_) => Datatype::String,
            DataValue::Long(_) => Datatype::Long,
            DataValue::Double(_) => Datatype::Double,
            DataValue::Boolean(_) => Datatype::Boolean,
            DataValue::Date(_) => Datatype::Date,
        }
    }

    /// The property value persisted on the substrate.
    pub fn persisted(&self) -> PropertyValue {
        match self {
            DataValue::String(s) => PropertyValue::Str(s.clone()),
            DataValue::Long(v) => PropertyValue::Long(*v),
            DataValue::Double(v) => PropertyValue::Double(*v),
            DataValue::Boolean(v) => PropertyValue::Bool(*v),
            DataValue::Date(d) => PropertyValue::Str(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Rebuild a value of `datatype` from its persisted representation.
    ///
    /// Returns `None` when the stored property does not conform to the
    /// datatype (a corrupt vertex).
    pub fn from_persisted(datatype: Datatype, value: &PropertyValue) -> Option<DataValue> {
        match (datatype, value) {
            (Datatype::String, PropertyValue::Str(s)) => Some(DataValue::String(s.clone())),
            (Datatype::Long, PropertyValue::Long(v)) => Some(DataValue::Long(*v)),
            (Datatype::Double, PropertyValue::Double(v)) => Some(DataValue::Double(*v)),
            (Datatype::Boolean, PropertyValue::Bool(v)) => Some(DataValue::Boolean(*v)),
            (Datatype::Date, PropertyValue::Str(s)) => {
                NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(DataValue::Date)
            }
            _ => None,
        }
    }

    /// Canonical string form used in fingerprints.
    ///
    /// Must be stable: two equal values always render identically. Doubles
    /// render their bit pattern to avoid formatting ambiguity.
    pub fn canonical(&self) -> String {
        match self {
            DataValue::String(s) => format!("s:{}", s),
            DataValue::Long(v) => format!("l:{}", v),
            DataValue::Double(v) => format!("d:{}", v.to_bits()),
            DataValue::Boolean(v) => format!("b:{}", v),
            DataValue::Date(d) => format!("t:{}", d.format("%Y-%m-%d")),
        }
    }
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::String(s) => write!(f, "{}", s),
            DataValue::Long(v) => write!(f, "{}", v),
            DataValue::Double(v) => write!(f, "{}", v),
            DataValue::Boolean(v) => write!(f, "{}", v),
            DataValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Long(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Double(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Boolean(v)
    }
}

impl From<NaiveDate> for DataValue {
    fn from(d: NaiveDate) -> Self {
        DataValue::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_round_trips() {
        for dt in Datatype::ALL {
            assert_eq!(Datatype::parse(dt.as_str()), Some(dt));
        }
        assert_eq!(Datatype::parse("float"), None);
    }

    #[test]
    fn value_property_is_datatype_specific() {
        assert_eq!(Datatype::String.value_property(), VertexProp::ValueString);
        assert_eq!(Datatype::Date.value_property(), VertexProp::ValueDate);
    }

    #[test]
    fn persisted_round_trip() {
        let date = NaiveDate::from_ymd_opt(1988, 3, 14).unwrap();
        let values = [
            DataValue::from("alice"),
            DataValue::from(42i64),
            DataValue::from(2.5f64),
            DataValue::from(true),
            DataValue::from(date),
        ];
        for value in values {
            let restored = DataValue::from_persisted(value.datatype(), &value.persisted());
            assert_eq!(restored, Some(value));
        }
    }

    #[test]
    fn from_persisted_rejects_mismatched_property() {
        assert_eq!(
            DataValue::from_persisted(Datatype::Long, &PropertyValue::Str("42".into())),
            None
        );
        assert_eq!(
            DataValue::from_persisted(Datatype::Date, &PropertyValue::Str("not-a-date".into())),
            None
        );
    }

    #[test]
    fn canonical_distinguishes_datatypes() {
        assert_ne!(
            DataValue::from("1").canonical(),
            DataValue::from(1i64).canonical()
        );
    }
}
