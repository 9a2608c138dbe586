use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// A value in the evaluation domain.
///
/// Document attributes, literals, and intermediate results all live in this
/// domain. Numbers are uniformly [`Decimal`], so integer and decimal
/// literals compare numerically: `3 = 3.0` holds.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Value {
    /// The sentinel returned when identifier resolution fails.
    Undefined,
    Null,
    /// The empty collection constant; equals any zero-length sequence, set,
    /// or string under `=`.
    Empty,
    Bool(bool),
    Number(Decimal),
    String(String),
    List(Vec<Value>),
    Set(BTreeSet<Value>),
    /// Nested mapping, reachable through dotted-path identifiers. Maps are
    /// navigable, not comparable operands.
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Truthiness of a value standing alone in boolean position.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null | Self::Empty => false,
            Self::Bool(value) => *value,
            Self::Number(value) => !value.is_zero(),
            Self::String(value) => !value.is_empty(),
            Self::List(values) => !values.is_empty(),
            Self::Set(values) => !values.is_empty(),
            Self::Map(values) => !values.is_empty(),
        }
    }

    /// Length of a sequence, set, or string; `None` for anything else.
    fn collection_len(&self) -> Option<usize> {
        match self {
            Self::String(value) => Some(value.len()),
            Self::List(values) => Some(values.len()),
            Self::Set(values) => Some(values.len()),
            _ => None,
        }
    }

    /// Equality under the `=` operator.
    ///
    /// `empty` matches any zero-length collection or string; values of
    /// different kinds are never equal. `Undefined` never equals anything,
    /// including itself; the `is` operator layers its own rule on top.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, _) | (_, Self::Undefined) => false,
            (Self::Empty, Self::Empty) => true,
            (Self::Empty, other) => other.collection_len() == Some(0),
            (other, Self::Empty) => other.collection_len() == Some(0),
            (a, b) => a == b,
        }
    }

    /// Ordering under `<`, `<=`, `>`, `>=`.
    ///
    /// Only numbers order against numbers and strings against strings;
    /// everything else is incomparable and the comparison evaluates false.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(formatter, "undefined"),
            Self::Null => write!(formatter, "null"),
            Self::Empty => write!(formatter, "empty"),
            Self::Bool(value) => write!(formatter, "{value}"),
            Self::Number(value) => write!(formatter, "{value}"),
            Self::String(value) => write!(formatter, "'{value}'"),
            Self::List(values) => {
                write!(formatter, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(formatter, ", ")?;
                    }
                    write!(formatter, "{value}")?;
                }
                write!(formatter, "]")
            }
            Self::Set(values) => {
                write!(formatter, "{{")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(formatter, " ")?;
                    }
                    write!(formatter, "{value}")?;
                }
                write!(formatter, "}}")
            }
            Self::Map(values) => {
                write!(formatter, "{{")?;
                for (i, (key, value)) in values.iter().enumerate() {
                    if i > 0 {
                        write!(formatter, ", ")?;
                    }
                    write!(formatter, "{key}: {value}")?;
                }
                write!(formatter, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(values: Vec<V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// An attribute-keyed input document.
///
/// Identifiers resolve against the top-level keys first; names containing
/// dots additionally walk nested [`Value::Map`] entries, so `req.sdk.version`
/// reaches `{"req": {"sdk": {"version": …}}}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    attributes: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Resolves a dotted path, preferring an exact top-level key.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        if !name.contains('.') {
            return None;
        }
        let mut parts = name.split('.');
        let mut current = self.attributes.get(parts.next()?)?;
        for part in parts {
            match current {
                Value::Map(entries) => current = entries.get(part)?,
                _ => return None,
            }
        }
        Some(current.clone())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(entries: I) -> Self {
        Self {
            attributes: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}
