#![allow(clippy::unwrap_used)]
// Integration tests for `AuthClient` and token refresh using wiremock.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lookout_api::{
    AuthClient, AuthTokens, Clock, DocumentPath, DocumentStore, Error, FirestoreClient,
    IdentityProvider, ManualClock, TokenManager, TokenSource,
};

const ROOT: &str = "/v1/projects/demo/databases/(default)/documents";

// ── Helpers ─────────────────────────────────────────────────────────

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
    ))
}

async fn setup() -> (MockServer, AuthClient, Arc<ManualClock>) {
    let server = MockServer::start().await;
    let identity = Url::parse(&format!("{}/identitytoolkit.googleapis.com", server.uri())).unwrap();
    let token = Url::parse(&format!("{}/securetoken.googleapis.com", server.uri())).unwrap();
    let clock = clock();
    let client = AuthClient::with_client(
        reqwest::Client::new(),
        &identity,
        &token,
        SecretString::from("web-key".to_owned()),
        clock.clone(),
    );
    (server, client, clock)
}

fn password() -> SecretString {
    SecretString::from("hunter22".to_owned())
}

fn sign_in_json() -> serde_json::Value {
    json!({
        "kind": "identitytoolkit#VerifyPasswordResponse",
        "localId": "uid-1",
        "email": "ana@example.com",
        "displayName": "",
        "idToken": "id-1",
        "registered": true,
        "refreshToken": "refresh-1",
        "expiresIn": "3600"
    })
}

async fn mount_refresh(server: &MockServer, id_token: &str) {
    Mock::given(method("POST"))
        .and(path("/securetoken.googleapis.com/v1/token"))
        .and(query_param("key", "web-key"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_in": "3600",
            "token_type": "Bearer",
            "refresh_token": "refresh-1",
            "id_token": id_token,
            "user_id": "uid-1",
            "project_id": "123456"
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ── Identity Toolkit ────────────────────────────────────────────────

#[tokio::test]
async fn test_sign_in_with_password() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:signInWithPassword"))
        .and(query_param("key", "web-key"))
        .and(body_partial_json(json!({
            "email": "ana@example.com",
            "password": "hunter22",
            "returnSecureToken": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(sign_in_json()))
        .mount(&server)
        .await;

    let tokens = client
        .sign_in_with_password("ana@example.com", &password())
        .await
        .unwrap();

    assert_eq!(tokens.user_id, "uid-1");
    assert_eq!(tokens.email.as_deref(), Some("ana@example.com"));
    assert_eq!(tokens.id_token.expose_secret(), "id-1");
    assert_eq!(tokens.refresh_token.expose_secret(), "refresh-1");
    assert_eq!(
        tokens.expires_at,
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_bad_credentials_map_to_authentication_error() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "INVALID_LOGIN_CREDENTIALS",
                "errors": [{ "message": "INVALID_LOGIN_CREDENTIALS", "domain": "global", "reason": "invalid" }]
            }
        })))
        .mount(&server)
        .await;

    let err = client
        .sign_in_with_password("ana@example.com", &password())
        .await
        .unwrap_err();
    match err {
        Error::Authentication { code, message } => {
            assert_eq!(code, "INVALID_LOGIN_CREDENTIALS");
            assert_eq!(message, "Incorrect email or password.");
        }
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_up_and_send_verification() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:signUp"))
        .and(body_partial_json(json!({ "email": "ana@example.com" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#SignupNewUserResponse",
            "idToken": "id-1",
            "email": "ana@example.com",
            "refreshToken": "refresh-1",
            "expiresIn": "3600",
            "localId": "uid-1"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:sendOobCode"))
        .and(body_partial_json(json!({ "requestType": "VERIFY_EMAIL", "idToken": "id-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetOobConfirmationCodeResponse",
            "email": "ana@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = client.sign_up("ana@example.com", &password()).await.unwrap();
    assert_eq!(tokens.user_id, "uid-1");
    client.send_email_verification(&tokens.id_token).await.unwrap();
}

#[tokio::test]
async fn test_sign_up_with_taken_email() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:signUp"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "EMAIL_EXISTS" }
        })))
        .mount(&server)
        .await;

    let err = client.sign_up("ana@example.com", &password()).await.unwrap_err();
    assert!(matches!(err, Error::Authentication { ref code, .. } if code == "EMAIL_EXISTS"));
}

#[tokio::test]
async fn test_lookup_reports_verification() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/identitytoolkit.googleapis.com/v1/accounts:lookup"))
        .and(body_partial_json(json!({ "idToken": "id-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetAccountInfoResponse",
            "users": [{
                "localId": "uid-1",
                "email": "ana@example.com",
                "emailVerified": true,
                "passwordUpdatedAt": 1_717_000_000_000_u64
            }]
        })))
        .mount(&server)
        .await;

    let account = client
        .lookup(&SecretString::from("id-1".to_owned()))
        .await
        .unwrap();
    assert_eq!(account.user_id, "uid-1");
    assert!(account.email_verified);
}

// ── Secure Token ────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_exchanges_refresh_token() {
    let (server, client, _) = setup().await;
    mount_refresh(&server, "id-2").await;

    let tokens = client
        .refresh(&SecretString::from("refresh-1".to_owned()))
        .await
        .unwrap();
    assert_eq!(tokens.user_id, "uid-1");
    assert_eq!(tokens.id_token.expose_secret(), "id-2");
    assert!(tokens.email.is_none());
}

#[tokio::test]
async fn test_expired_refresh_token() {
    let (server, client, _) = setup().await;

    Mock::given(method("POST"))
        .and(path("/securetoken.googleapis.com/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "TOKEN_EXPIRED", "status": "INVALID_ARGUMENT" }
        })))
        .mount(&server)
        .await;

    let err = client
        .refresh(&SecretString::from("refresh-1".to_owned()))
        .await
        .unwrap_err();
    match err {
        Error::Authentication { message, .. } => {
            assert_eq!(message, "Your sign-in has expired. Sign in again.");
        }
        other => panic!("expected Authentication, got {other:?}"),
    }
}

// ── Token manager + store ───────────────────────────────────────────

#[tokio::test]
async fn test_token_manager_refreshes_near_expiry() {
    let (server, client, clock) = setup().await;
    mount_refresh(&server, "id-2").await;

    let tokens = AuthTokens {
        user_id: "uid-1".into(),
        email: Some("ana@example.com".into()),
        id_token: SecretString::from("id-1".to_owned()),
        refresh_token: SecretString::from("refresh-1".to_owned()),
        expires_at: clock.now() + Duration::hours(1),
    };
    let manager = TokenManager::new(Arc::new(client), clock.clone(), tokens);

    assert_eq!(manager.id_token().await.unwrap().expose_secret(), "id-1");

    clock.advance(Duration::minutes(56));
    assert_eq!(manager.id_token().await.unwrap().expose_secret(), "id-2");
    assert_eq!(manager.id_token().await.unwrap().expose_secret(), "id-2");

    let current = manager.tokens().await;
    assert_eq!(current.email.as_deref(), Some("ana@example.com"));
}

#[tokio::test]
async fn test_store_requests_carry_a_fresh_bearer_token() {
    let (server, client, clock) = setup().await;
    mount_refresh(&server, "id-fresh").await;

    Mock::given(method("GET"))
        .and(path(format!("{ROOT}/devices/d1")))
        .and(header("authorization", "Bearer id-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/demo/databases/(default)/documents/devices/d1",
            "fields": { "name": { "stringValue": "Porch" } },
            "createTime": "2025-06-01T07:00:00Z",
            "updateTime": "2025-06-01T07:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // A stored sign-in whose ID token has already lapsed.
    let stale = AuthTokens {
        user_id: "uid-1".into(),
        email: None,
        id_token: SecretString::from("id-stale".to_owned()),
        refresh_token: SecretString::from("refresh-1".to_owned()),
        expires_at: clock.now() - Duration::minutes(1),
    };
    let manager = Arc::new(TokenManager::new(Arc::new(client), clock, stale));

    let endpoint = Url::parse(&server.uri()).unwrap();
    let store = FirestoreClient::with_client(reqwest::Client::new(), &endpoint, "demo", "(default)")
        .with_credentials(manager);

    let doc = store
        .get(&DocumentPath::new("devices", "d1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.get_str("name"), Some("Porch"));
}
