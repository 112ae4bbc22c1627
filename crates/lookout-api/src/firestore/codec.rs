// Firestore REST wire format.
//
// Typed values travel as single-key objects (`{"stringValue": "x"}`),
// queries as `structuredQuery`, writes as `Write` messages with update
// masks, field transforms, and `currentDocument` preconditions.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, json};

use crate::document::{Document, FieldPath, Fields, Value, set_path};
use crate::error::Error;
use crate::query::{Direction, Filter, Query};
use crate::write::{FieldValue, Precondition, Write, WriteKind};

// ── Values ───────────────────────────────────────────────────────────

pub(crate) fn encode_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        // int64 travels as a decimal string
        Value::Integer(i) => json!({ "integerValue": i.to_string() }),
        Value::Double(d) if d.is_finite() => json!({ "doubleValue": d }),
        Value::Double(d) => {
            let text = if d.is_nan() {
                "NaN"
            } else if d.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            json!({ "doubleValue": text })
        }
        Value::Timestamp(t) => json!({ "timestampValue": encode_timestamp(*t) }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Map(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub(crate) fn encode_fields(fields: &Fields) -> serde_json::Value {
    let map: Map<String, serde_json::Value> = fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    serde_json::Value::Object(map)
}

pub(crate) fn encode_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub(crate) fn decode_value(raw: &serde_json::Value) -> Result<Value, Error> {
    let invalid = || Error::Deserialization {
        message: "unrecognized Firestore value".into(),
        body: raw.to_string(),
    };

    let (kind, inner) = raw
        .as_object()
        .and_then(|obj| obj.iter().next())
        .ok_or_else(invalid)?;

    let value = match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().ok_or_else(invalid)?),
        "integerValue" => {
            let parsed = match inner {
                serde_json::Value::String(s) => s.parse().ok(),
                other => other.as_i64(),
            };
            Value::Integer(parsed.ok_or_else(invalid)?)
        }
        "doubleValue" => {
            let parsed = match inner {
                serde_json::Value::String(s) => match s.as_str() {
                    "NaN" => Some(f64::NAN),
                    "Infinity" => Some(f64::INFINITY),
                    "-Infinity" => Some(f64::NEG_INFINITY),
                    _ => None,
                },
                other => other.as_f64(),
            };
            Value::Double(parsed.ok_or_else(invalid)?)
        }
        "timestampValue" => {
            let text = inner.as_str().ok_or_else(invalid)?;
            let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| invalid())?;
            Value::Timestamp(parsed.with_timezone(&Utc))
        }
        // References and bytes surface as their string form.
        "stringValue" | "referenceValue" | "bytesValue" => {
            Value::String(inner.as_str().ok_or_else(invalid)?.to_owned())
        }
        "geoPointValue" => {
            let mut point = Fields::new();
            for axis in ["latitude", "longitude"] {
                let coord = inner.get(axis).and_then(serde_json::Value::as_f64);
                point.insert(axis.into(), Value::Double(coord.unwrap_or_default()));
            }
            Value::Map(point)
        }
        "arrayValue" => {
            let items = match inner.get("values").and_then(serde_json::Value::as_array) {
                Some(values) => values.iter().map(decode_value).collect::<Result<_, _>>()?,
                None => Vec::new(),
            };
            Value::Array(items)
        }
        "mapValue" => Value::Map(decode_fields(inner.get("fields"))?),
        _ => return Err(invalid()),
    };
    Ok(value)
}

fn decode_fields(raw: Option<&serde_json::Value>) -> Result<Fields, Error> {
    let Some(obj) = raw.and_then(serde_json::Value::as_object) else {
        return Ok(Fields::new());
    };
    obj.iter()
        .map(|(k, v)| Ok((k.clone(), decode_value(v)?)))
        .collect()
}

// ── Documents ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireDocument {
    pub name: String,
    #[serde(default)]
    pub fields: Option<serde_json::Value>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl WireDocument {
    pub(crate) fn into_document(self) -> Result<Document, Error> {
        let id = self
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_owned();
        Ok(Document {
            id,
            fields: decode_fields(self.fields.as_ref())?,
            create_time: self.create_time,
            update_time: self.update_time,
        })
    }
}

/// One element of the `:runQuery` response stream.
#[derive(Debug, Deserialize)]
pub(crate) struct RunQueryItem {
    #[serde(default)]
    pub document: Option<WireDocument>,
}

// ── Field paths ──────────────────────────────────────────────────────

/// Render a field path, backtick-quoting segments that are not plain identifiers.
pub(crate) fn encode_field_path(path: &FieldPath) -> String {
    path.segments()
        .iter()
        .map(|segment| {
            let simple = segment
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if simple {
                segment.clone()
            } else {
                let escaped = segment.replace('\\', "\\\\").replace('`', "\\`");
                format!("`{escaped}`")
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

// ── Queries ──────────────────────────────────────────────────────────

/// Encode a query as a `:runQuery` request body.
///
/// `documents_root` is `projects/<p>/databases/<db>/documents`, needed to
/// turn document IDs into reference values.
pub(crate) fn encode_query(query: &Query, documents_root: &str) -> serde_json::Value {
    let mut structured = Map::new();
    structured.insert(
        "from".into(),
        json!([{ "collectionId": query.collection }]),
    );

    let mut filters: Vec<serde_json::Value> = query
        .filters
        .iter()
        .map(|f| encode_filter(f, &query.collection, documents_root))
        .collect();
    match filters.len() {
        0 => {}
        1 => {
            structured.insert("where".into(), filters.remove(0));
        }
        _ => {
            structured.insert(
                "where".into(),
                json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
            );
        }
    }

    if !query.order_by.is_empty() {
        let orders: Vec<serde_json::Value> = query
            .order_by
            .iter()
            .map(|(path, direction)| {
                json!({
                    "field": { "fieldPath": encode_field_path(path) },
                    "direction": match direction {
                        Direction::Ascending => "ASCENDING",
                        Direction::Descending => "DESCENDING",
                    },
                })
            })
            .collect();
        structured.insert("orderBy".into(), serde_json::Value::Array(orders));
    }

    if let Some(limit) = query.limit {
        structured.insert("limit".into(), json!(limit));
    }

    json!({ "structuredQuery": structured })
}

fn encode_filter(filter: &Filter, collection: &str, documents_root: &str) -> serde_json::Value {
    let field = |path: &FieldPath, op: &str, value: serde_json::Value| {
        json!({
            "fieldFilter": {
                "field": { "fieldPath": encode_field_path(path) },
                "op": op,
                "value": value,
            }
        })
    };

    match filter {
        Filter::Eq(path, Value::Null) => json!({
            "unaryFilter": { "op": "IS_NULL", "field": { "fieldPath": encode_field_path(path) } }
        }),
        Filter::Eq(path, v) => field(path, "EQUAL", encode_value(v)),
        Filter::Gt(path, v) => field(path, "GREATER_THAN", encode_value(v)),
        Filter::Gte(path, v) => field(path, "GREATER_THAN_OR_EQUAL", encode_value(v)),
        Filter::Lt(path, v) => field(path, "LESS_THAN", encode_value(v)),
        Filter::Lte(path, v) => field(path, "LESS_THAN_OR_EQUAL", encode_value(v)),
        Filter::In(path, values) => field(path, "IN", encode_value(&Value::Array(values.clone()))),
        Filter::NotNull(path) => json!({
            "unaryFilter": { "op": "IS_NOT_NULL", "field": { "fieldPath": encode_field_path(path) } }
        }),
        Filter::DocumentIdIn(ids) => {
            let refs: Vec<serde_json::Value> = ids
                .iter()
                .map(|id| json!({ "referenceValue": format!("{documents_root}/{collection}/{id}") }))
                .collect();
            json!({
                "fieldFilter": {
                    "field": { "fieldPath": "__name__" },
                    "op": "IN",
                    "value": { "arrayValue": { "values": refs } },
                }
            })
        }
    }
}

// ── Writes ───────────────────────────────────────────────────────────

/// Encode one write for a `:commit` request.
pub(crate) fn encode_write(write: &Write, documents_root: &str) -> Result<serde_json::Value, Error> {
    let name = format!(
        "{documents_root}/{}/{}",
        write.path.collection, write.path.id
    );

    let mut out = Map::new();
    match &write.kind {
        WriteKind::Delete => {
            out.insert("delete".into(), json!(name));
        }
        WriteKind::Set(fields) | WriteKind::Update(fields) => {
            let is_update = matches!(write.kind, WriteKind::Update(_));
            let mut plain = Fields::new();
            let mut mask = Vec::new();
            let mut transforms = Vec::new();

            for (path, value) in fields {
                let encoded_path = encode_field_path(path);
                match value {
                    FieldValue::Set(v) => {
                        set_path(&mut plain, path, v.clone());
                        mask.push(encoded_path);
                    }
                    FieldValue::Delete if is_update => mask.push(encoded_path),
                    FieldValue::Delete => {
                        return Err(Error::InvalidRequest(format!(
                            "field delete of '{path}' inside a full set of {}",
                            write.path
                        )));
                    }
                    FieldValue::ServerTimestamp => transforms.push(json!({
                        "fieldPath": encoded_path,
                        "setToServerValue": "REQUEST_TIME",
                    })),
                    FieldValue::ArrayUnion(values) => transforms.push(json!({
                        "fieldPath": encoded_path,
                        "appendMissingElements": { "values": values.iter().map(encode_value).collect::<Vec<_>>() },
                    })),
                    FieldValue::ArrayRemove(values) => transforms.push(json!({
                        "fieldPath": encoded_path,
                        "removeAllFromArray": { "values": values.iter().map(encode_value).collect::<Vec<_>>() },
                    })),
                }
            }

            out.insert(
                "update".into(),
                json!({ "name": name, "fields": encode_fields(&plain) }),
            );
            // Without a mask an update would replace the whole document.
            if is_update {
                out.insert("updateMask".into(), json!({ "fieldPaths": mask }));
            }
            if !transforms.is_empty() {
                out.insert("updateTransforms".into(), serde_json::Value::Array(transforms));
            }
        }
    }

    match write.precondition {
        Some(Precondition::Exists(exists)) => {
            out.insert("currentDocument".into(), json!({ "exists": exists }));
        }
        Some(Precondition::UpdateTime(at)) => {
            out.insert(
                "currentDocument".into(),
                json!({ "updateTime": encode_timestamp(at) }),
            );
        }
        None => {}
    }

    Ok(serde_json::Value::Object(out))
}
