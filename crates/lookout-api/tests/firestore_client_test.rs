#![allow(clippy::unwrap_used)]
// Integration tests for `FirestoreClient` using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lookout_api::{
    Direction, DocumentPath, DocumentStore, Error, FieldPath, FieldValue, FirestoreClient,
    Precondition, Query, Value, Write, WriteBatch,
};

const ROOT: &str = "/v1/projects/demo/databases/(default)/documents";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, FirestoreClient) {
    let server = MockServer::start().await;
    let endpoint = Url::parse(&server.uri()).unwrap();
    let client = FirestoreClient::with_client(reqwest::Client::new(), &endpoint, "demo", "(default)")
        .with_poll_interval(Duration::from_millis(100));
    (server, client)
}

fn device_json(id: &str, name: &str) -> serde_json::Value {
    json!({
        "name": format!("projects/demo/databases/(default)/documents/devices/{id}"),
        "fields": {
            "name": { "stringValue": name },
            "ownerId": { "stringValue": "u1" },
            "ownerType": { "stringValue": "user" },
            "status": { "stringValue": "active" },
            "createdAt": { "timestampValue": "2025-03-01T10:00:00.123456Z" },
            "registeredUsers": { "arrayValue": { "values": [ { "stringValue": "u1" } ] } },
            "health": { "mapValue": { "fields": {
                "uptime": { "integerValue": "3600" },
                "latency": { "doubleValue": 12.5 }
            } } }
        },
        "createTime": "2025-03-01T10:00:00.123456Z",
        "updateTime": "2025-03-02T08:30:00.000001Z"
    })
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_document() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/devices/d1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json("d1", "Front Door")))
        .mount(&server)
        .await;

    let doc = client
        .get(&DocumentPath::new("devices", "d1"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(doc.id, "d1");
    assert_eq!(doc.get_str("name"), Some("Front Door"));
    assert_eq!(doc.get_string_array("registeredUsers"), vec!["u1".to_owned()]);
    assert_eq!(
        doc.get(&FieldPath::field("health").child("uptime")),
        Some(&Value::Integer(3600))
    );
    assert!(doc.update_time.is_some());
}

#[tokio::test]
async fn test_get_missing_document_is_none() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/devices/nope")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "Document not found", "status": "NOT_FOUND" }
        })))
        .mount(&server)
        .await;

    let doc = client.get(&DocumentPath::new("devices", "nope")).await.unwrap();
    assert!(doc.is_none());
}

#[tokio::test]
async fn test_run_query() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{ROOT}:runQuery")))
        .and(body_partial_json(json!({
            "structuredQuery": {
                "from": [ { "collectionId": "devices" } ],
                "orderBy": [ { "field": { "fieldPath": "createdAt" }, "direction": "DESCENDING" } ]
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "document": device_json("d2", "Garage"), "readTime": "2025-03-02T09:00:00Z" },
            { "document": device_json("d1", "Front Door"), "readTime": "2025-03-02T09:00:00Z" },
            { "readTime": "2025-03-02T09:00:00Z" }
        ])))
        .mount(&server)
        .await;

    let query = Query::collection("devices")
        .where_eq("ownerId", "u1")
        .order_by("createdAt", Direction::Descending);
    let docs = client.run_query(&query).await.unwrap();

    let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["d2", "d1"]);
}

#[tokio::test]
async fn test_oversized_in_filter_never_hits_the_wire() {
    let (server, client) = setup().await;

    let ids = (0..11).map(|i| Value::from(format!("d{i}"))).collect();
    let query = Query::collection("logs").filter(lookout_api::Filter::In("deviceId".into(), ids));
    let result = client.run_query(&query).await;

    assert!(matches!(result, Err(Error::InvalidRequest(_))), "got {result:?}");
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commit_sends_all_writes() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{ROOT}:commit")))
        .and(body_partial_json(json!({
            "writes": [
                { "currentDocument": { "exists": true } },
                { "delete": "projects/demo/databases/(default)/documents/invitesFamily/ABC123" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "writeResults": [ {}, {} ],
            "commitTime": "2025-03-02T09:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut batch = WriteBatch::new();
    batch
        .push(Write::update(
            DocumentPath::new("families", "f1"),
            vec![(FieldPath::field("roles").child("u2"), FieldValue::set("member"))],
        ))
        .push(
            Write::delete(DocumentPath::new("invitesFamily", "ABC123"))
                .with_precondition(Precondition::Exists(true)),
        );

    client.commit(batch).await.unwrap();
}

#[tokio::test]
async fn test_commit_conflict_maps_to_already_exists() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{ROOT}:commit")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": { "code": 409, "message": "Document already exists", "status": "ALREADY_EXISTS" }
        })))
        .mount(&server)
        .await;

    let write = Write::create(
        DocumentPath::new("devices", "d1"),
        vec![(FieldPath::field("name"), FieldValue::set("Front Door"))],
    );
    let result = client.commit(write.into()).await;

    assert!(
        matches!(&result, Err(Error::AlreadyExists { path }) if path == "devices/d1"),
        "expected AlreadyExists, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(format!("{ROOT}:runQuery")))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "code": 503, "message": "The service is currently unavailable.", "status": "UNAVAILABLE" }
        })))
        .mount(&server)
        .await;

    let err = client
        .run_query(&Query::collection("devices"))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "expected transient error, got {err:?}");
}

// ── Live feeds ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_listen_document_polls_for_changes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/devices/d1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json("d1", "Front Door")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/devices/d1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_json("d1", "Back Door")))
        .mount(&server)
        .await;

    let mut feed = client
        .listen_document(&DocumentPath::new("devices", "d1"))
        .await
        .unwrap();
    let initial = feed.current();
    assert_eq!((*initial).as_ref().unwrap().get_str("name"), Some("Front Door"));

    let next = tokio::time::timeout(Duration::from_secs(5), feed.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((*next).as_ref().unwrap().get_str("name"), Some("Back Door"));
}
