// ── Writes and batches ──
//
// Every mutation is a `Write` against one document. Field-level
// transforms (server timestamp, array union/remove, field delete) are
// applied atomically by the store; a `WriteBatch` commits all-or-nothing.

use chrono::{DateTime, Utc};

use crate::document::{DocumentPath, FieldPath, Value};

/// The value written to one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Set(Value),
    /// Remove the field (distinct from setting it to null).
    Delete,
    /// The commit time assigned by the store.
    ServerTimestamp,
    /// Append each element not already present.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each element.
    ArrayRemove(Vec<Value>),
}

impl FieldValue {
    pub fn set(value: impl Into<Value>) -> Self {
        Self::Set(value.into())
    }
}

/// Condition the target document must satisfy for the write to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Exists(bool),
    /// The document was last written at exactly this time.
    UpdateTime(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteKind {
    /// Replace the whole document with these fields.
    Set(Vec<(FieldPath, FieldValue)>),
    /// Patch only the named fields.
    Update(Vec<(FieldPath, FieldValue)>),
    Delete,
}

/// A single-document write.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub path: DocumentPath,
    pub kind: WriteKind,
    pub precondition: Option<Precondition>,
}

impl Write {
    /// Create a document that must not exist yet.
    pub fn create(path: DocumentPath, fields: Vec<(FieldPath, FieldValue)>) -> Self {
        Self {
            path,
            kind: WriteKind::Set(fields),
            precondition: Some(Precondition::Exists(false)),
        }
    }

    /// Create or overwrite a document.
    pub fn set(path: DocumentPath, fields: Vec<(FieldPath, FieldValue)>) -> Self {
        Self {
            path,
            kind: WriteKind::Set(fields),
            precondition: None,
        }
    }

    /// Patch fields of a document that must exist.
    pub fn update(path: DocumentPath, fields: Vec<(FieldPath, FieldValue)>) -> Self {
        Self {
            path,
            kind: WriteKind::Update(fields),
            precondition: Some(Precondition::Exists(true)),
        }
    }

    pub fn delete(path: DocumentPath) -> Self {
        Self {
            path,
            kind: WriteKind::Delete,
            precondition: None,
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }
}

/// An ordered set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl From<Write> for WriteBatch {
    fn from(write: Write) -> Self {
        Self {
            writes: vec![write],
        }
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Write>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}
