// ── Structured queries ──
//
// A query names one collection, a conjunction of filters, an ordering,
// and an optional limit. `matches` / `apply` give the reference
// semantics the in-memory store uses; the Firestore adapter encodes the
// same structure into a `structuredQuery`.

use std::cmp::Ordering;

use crate::document::{Document, FieldPath, Value};
use crate::error::Error;

/// Maximum number of values in an `IN` (or document-ID `IN`) filter.
pub const IN_FILTER_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A single filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(FieldPath, Value),
    Gt(FieldPath, Value),
    Gte(FieldPath, Value),
    Lt(FieldPath, Value),
    Lte(FieldPath, Value),
    /// Field value is one of the listed values.
    In(FieldPath, Vec<Value>),
    /// Field exists and is not null.
    NotNull(FieldPath),
    /// Document ID is one of the listed IDs.
    DocumentIdIn(Vec<String>),
}

impl Filter {
    pub fn matches(&self, doc: &Document) -> bool {
        let range = |path: &FieldPath, bound: &Value, accept: fn(Ordering) -> bool| {
            doc.get(path)
                .and_then(|v| v.compare(bound))
                .is_some_and(accept)
        };

        match self {
            Self::Eq(path, value) => doc.get(path).is_some_and(|v| v.loosely_equals(value)),
            Self::Gt(path, bound) => range(path, bound, Ordering::is_gt),
            Self::Gte(path, bound) => range(path, bound, Ordering::is_ge),
            Self::Lt(path, bound) => range(path, bound, Ordering::is_lt),
            Self::Lte(path, bound) => range(path, bound, Ordering::is_le),
            Self::In(path, values) => doc
                .get(path)
                .is_some_and(|v| values.iter().any(|candidate| v.loosely_equals(candidate))),
            Self::NotNull(path) => doc.get(path).is_some_and(|v| !v.is_null()),
            Self::DocumentIdIn(ids) => ids.iter().any(|id| *id == doc.id),
        }
    }

    fn in_len(&self) -> Option<usize> {
        match self {
            Self::In(_, values) => Some(values.len()),
            Self::DocumentIdIn(ids) => Some(ids.len()),
            _ => None,
        }
    }
}

/// A query against a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Vec<(FieldPath, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn where_eq(self, path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Eq(path.into(), value.into()))
    }

    pub fn order_by(mut self, path: impl Into<FieldPath>, direction: Direction) -> Self {
        self.order_by.push((path.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject queries the store would refuse: empty or oversized `IN` lists.
    pub fn validate(&self) -> Result<(), Error> {
        for filter in &self.filters {
            match filter.in_len() {
                Some(0) => {
                    return Err(Error::InvalidRequest(format!(
                        "empty IN filter on '{}'",
                        self.collection
                    )));
                }
                Some(n) if n > IN_FILTER_LIMIT => {
                    return Err(Error::InvalidRequest(format!(
                        "IN filter on '{}' has {n} values (limit {IN_FILTER_LIMIT})",
                        self.collection
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter, order, and limit a set of candidate documents.
    ///
    /// Documents missing an ordered-by field are excluded, as the store does.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.matches(d))
            .filter(|d| self.order_by.iter().all(|(path, _)| d.get(path).is_some()))
            .collect();

        out.sort_by(|a, b| self.compare_docs(a, b));

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }

    fn compare_docs(&self, a: &Document, b: &Document) -> Ordering {
        for (path, direction) in &self.order_by {
            let ord = match (a.get(path), b.get(path)) {
                (Some(x), Some(y)) => x.total_cmp(y),
                (x, y) => x.is_some().cmp(&y.is_some()),
            };
            let ord = match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    }
}
