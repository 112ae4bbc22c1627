// ── Document model ──
//
// Store-agnostic representation of documents, field values, and paths.
// Both the Firestore adapter and the in-memory store speak these types.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Map of top-level field name to value.
pub type Fields = BTreeMap<String, Value>;

// ── Value ────────────────────────────────────────────────────────────

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
    String(String),
    Array(Vec<Value>),
    Map(Fields),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            Self::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Compare two values the way range filters do: only values of the
    /// same kind are comparable (integers and doubles count as one kind).
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total order across kinds, used for `ORDER BY` on mixed data.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    /// Equality as seen by `==` and `IN` filters.
    pub(crate) fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Array(a), Self::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loosely_equals(vb))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) | Self::Double(_) => 2,
            Self::Timestamp(_) => 3,
            Self::String(_) => 4,
            Self::Array(_) => 5,
            Self::Map(_) => 6,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<Fields> for Value {
    fn from(m: Fields) -> Self {
        Self::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ── FieldPath ────────────────────────────────────────────────────────

/// A path to a (possibly nested) field, e.g. `roles.<uid>`.
///
/// Segments are kept separate so map keys containing arbitrary
/// characters never need escaping until they hit the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// A top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Extend this path by one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` equals `other` or is one of its ancestors.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl From<&str> for FieldPath {
    /// Split a dotted path. Use [`FieldPath::child`] for keys that may contain dots.
    fn from(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_owned).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

// ── Nested field helpers ─────────────────────────────────────────────

/// Look up the value at `path`, descending through maps.
pub fn lookup<'a>(fields: &'a Fields, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = fields.get(first)?;
    for segment in rest {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

/// Set the value at `path`, creating (or replacing non-map) intermediates.
pub fn set_path(fields: &mut Fields, path: &FieldPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };
    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Map(Fields::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(Fields::new());
        }
        let Value::Map(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

/// Remove the value at `path`. Missing intermediates are a no-op.
pub fn remove_path(fields: &mut Fields, path: &FieldPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = fields;
    for segment in parents {
        match current.get_mut(segment) {
            Some(Value::Map(next)) => current = next,
            _ => return None,
        }
    }
    current.remove(last)
}

// ── DocumentPath ─────────────────────────────────────────────────────

/// Address of a document: `<collection>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    pub collection: String,
    pub id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

// ── Document ─────────────────────────────────────────────────────────

/// A snapshot of one stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    pub create_time: Option<DateTime<Utc>>,
    pub update_time: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            create_time: None,
            update_time: None,
        }
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        lookup(&self.fields, path)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(Value::as_i64)
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(Value::as_timestamp)
    }

    pub fn get_map(&self, field: &str) -> Option<&Fields> {
        self.fields.get(field).and_then(Value::as_map)
    }

    /// String elements of an array field; non-string elements are skipped.
    pub fn get_string_array(&self, field: &str) -> Vec<String> {
        self.fields
            .get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn nested_set_lookup_remove() {
        let mut fields = Fields::new();
        let path = FieldPath::field("roles").child("user.with.dots");

        set_path(&mut fields, &path, Value::from("guest"));
        assert_eq!(lookup(&fields, &path), Some(&Value::from("guest")));
        assert_eq!(fields.get("roles").and_then(Value::as_map).unwrap().len(), 1);

        assert_eq!(remove_path(&mut fields, &path), Some(Value::from("guest")));
        assert!(lookup(&fields, &path).is_none());
        // The parent map stays behind, empty.
        assert!(fields.get("roles").and_then(Value::as_map).unwrap().is_empty());
    }

    #[test]
    fn set_path_replaces_scalar_intermediate() {
        let mut fields = Fields::new();
        fields.insert("health".into(), Value::from("n/a"));
        set_path(&mut fields, &FieldPath::from("health.uptime"), Value::from(12_i64));
        assert_eq!(
            lookup(&fields, &FieldPath::from("health.uptime")),
            Some(&Value::Integer(12))
        );
    }

    #[test]
    fn compare_only_within_kind() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("2").compare(&Value::Integer(2)), None);
        assert!(Value::Integer(3).loosely_equals(&Value::Double(3.0)));
        assert_eq!(
            Value::Null.total_cmp(&Value::from("a")),
            Ordering::Less,
            "null sorts before strings"
        );
    }

    #[test]
    fn string_array_skips_other_kinds() {
        let mut fields = Fields::new();
        fields.insert(
            "registeredUsers".into(),
            Value::Array(vec![Value::from("u1"), Value::Integer(4), Value::from("u2")]),
        );
        let doc = Document::new("d1", fields);
        assert_eq!(doc.get_string_array("registeredUsers"), vec!["u1", "u2"]);
        assert!(doc.get_string_array("missing").is_empty());
    }

    #[test]
    fn dotted_field_path_display() {
        let path = FieldPath::from("roles.abc");
        assert_eq!(path.segments(), ["roles", "abc"]);
        assert_eq!(path.to_string(), "roles.abc");
        assert!(FieldPath::field("roles").is_prefix_of(&path));
    }
}
