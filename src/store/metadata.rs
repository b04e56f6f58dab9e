//! Typed metadata values and the predicate language evaluated by the store
//!
//! Metadata attached to a row is a flat map of scalar values. Callers build
//! typed predicates over those values; heterogeneous dictionaries never cross
//! the store boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar metadata value
///
/// Serialized as plain JSON scalars, so a persisted metadata map reads as an
/// ordinary JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetaValue::Null)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Str(value)
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Num(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(MetaValue::Null)
    }
}

/// Flat scalar metadata map attached to every stored row
pub type Metadata = BTreeMap<String, MetaValue>;

/// One end of a numeric range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub value: f64,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }
}

/// Metadata predicate evaluated against a row's metadata map
///
/// Supports equality, set membership, numeric ranges, and logical AND/OR.
/// A missing key evaluates like `Null` for equality and fails any range.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row
    True,
    Eq(String, MetaValue),
    In(String, Vec<MetaValue>),
    Range {
        key: String,
        min: Option<Bound>,
        max: Option<Bound>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Predicate::Eq(key.into(), value.into())
    }

    pub fn is_in(key: impl Into<String>, values: Vec<MetaValue>) -> Self {
        Predicate::In(key.into(), values)
    }

    pub fn range(key: impl Into<String>, min: Option<Bound>, max: Option<Bound>) -> Self {
        Predicate::Range {
            key: key.into(),
            min,
            max,
        }
    }

    /// Collapses trivial conjunctions so an empty filter set compiles to `True`
    pub fn and(clauses: Vec<Predicate>) -> Self {
        let mut clauses: Vec<Predicate> = clauses
            .into_iter()
            .filter(|p| !matches!(p, Predicate::True))
            .collect();
        match clauses.len() {
            0 => Predicate::True,
            1 => clauses.remove(0),
            _ => Predicate::And(clauses),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    /// Evaluate against a metadata map
    pub fn matches(&self, meta: &Metadata) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Eq(key, expected) => {
                let actual = meta.get(key).unwrap_or(&MetaValue::Null);
                actual == expected
            }
            Predicate::In(key, values) => {
                let actual = meta.get(key).unwrap_or(&MetaValue::Null);
                values.iter().any(|v| v == actual)
            }
            Predicate::Range { key, min, max } => {
                let Some(value) = meta.get(key).and_then(MetaValue::as_f64) else {
                    return false;
                };
                if let Some(b) = min {
                    let ok = if b.inclusive {
                        value >= b.value
                    } else {
                        value > b.value
                    };
                    if !ok {
                        return false;
                    }
                }
                if let Some(b) = max {
                    let ok = if b.inclusive {
                        value <= b.value
                    } else {
                        value < b.value
                    };
                    if !ok {
                        return false;
                    }
                }
                true
            }
            Predicate::And(clauses) => clauses.iter().all(|c| c.matches(meta)),
            Predicate::Or(clauses) => clauses.iter().any(|c| c.matches(meta)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(entries: &[(&str, MetaValue)]) -> Metadata {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eq_predicate() {
        let m = meta(&[
            ("direction", MetaValue::from("incoming")),
            ("is_noise", MetaValue::from(false)),
        ]);

        assert!(Predicate::eq("direction", "incoming").matches(&m));
        assert!(!Predicate::eq("direction", "outgoing").matches(&m));
        assert!(Predicate::eq("is_noise", false).matches(&m));
    }

    #[test]
    fn test_missing_key_is_null() {
        let m = meta(&[]);
        assert!(Predicate::Eq("app".to_string(), MetaValue::Null).matches(&m));
        assert!(!Predicate::eq("app", "sms").matches(&m));
    }

    #[test]
    fn test_range_predicate() {
        let m = meta(&[("timestamp", MetaValue::from(100.0))]);

        let p = Predicate::range(
            "timestamp",
            Some(Bound::inclusive(100.0)),
            Some(Bound::inclusive(200.0)),
        );
        assert!(p.matches(&m));

        let p = Predicate::range("timestamp", Some(Bound::exclusive(100.0)), None);
        assert!(!p.matches(&m));

        // Null or missing timestamps never satisfy a range
        let p = Predicate::range("timestamp", Some(Bound::inclusive(0.0)), None);
        assert!(!p.matches(&meta(&[("timestamp", MetaValue::Null)])));
        assert!(!p.matches(&meta(&[])));
    }

    #[test]
    fn test_in_predicate() {
        let m = meta(&[("app", MetaValue::from("sms"))]);
        let p = Predicate::is_in(
            "app",
            vec![MetaValue::from("sms"), MetaValue::from("whatsapp")],
        );
        assert!(p.matches(&m));
        assert!(!Predicate::is_in("app", vec![MetaValue::from("email")]).matches(&m));
    }

    #[test]
    fn test_and_or() {
        let m = meta(&[
            ("direction", MetaValue::from("incoming")),
            ("timestamp", MetaValue::from(50.0)),
        ]);

        let p = Predicate::and(vec![
            Predicate::eq("direction", "incoming"),
            Predicate::range("timestamp", Some(Bound::inclusive(0.0)), None),
        ]);
        assert!(p.matches(&m));

        let p = Predicate::Or(vec![
            Predicate::eq("direction", "outgoing"),
            Predicate::eq("direction", "incoming"),
        ]);
        assert!(p.matches(&m));
    }

    #[test]
    fn test_empty_and_is_true() {
        assert!(Predicate::and(vec![]).is_true());
        assert!(Predicate::and(vec![Predicate::True, Predicate::True]).is_true());
    }

    #[test]
    fn test_metavalue_json_round_trip() {
        let m = meta(&[
            ("contact", MetaValue::from("+33612345678")),
            ("gps_lat", MetaValue::from(48.85)),
            ("is_noise", MetaValue::from(false)),
            ("app", MetaValue::Null),
        ]);

        let json = serde_json::to_string(&m).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
    }
}
