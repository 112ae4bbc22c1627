#![allow(clippy::unwrap_used)]

// `Session::connect` with a stored sign-in, against a mocked identity
// provider and store.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lookout_core::{
    AuthSettings, CoreError, Session, SessionConfig, SessionOptions, StoreSettings,
    TlsVerification,
};

fn config(server: &MockServer, user_id: &str) -> SessionConfig {
    let root = server.uri();
    SessionConfig {
        user_id: user_id.into(),
        store: StoreSettings {
            project_id: "demo".into(),
            database: "(default)".into(),
            endpoint: Url::parse(&root).unwrap(),
            id_token: Some(SecretString::from("ignored".to_owned())),
            poll_interval: Duration::from_secs(5),
        },
        auth: Some(AuthSettings {
            api_key: SecretString::from("web-key".to_owned()),
            identity_endpoint: Url::parse(&format!("{root}/identitytoolkit.googleapis.com")).unwrap(),
            token_endpoint: Url::parse(&format!("{root}/securetoken.googleapis.com")).unwrap(),
            refresh_token: Some(SecretString::from("refresh-1".to_owned())),
        }),
        broker: None,
        tls: TlsVerification::SystemDefaults,
        timeout: Duration::from_secs(5),
        options: SessionOptions::default(),
    }
}

async fn mount_refresh(server: &MockServer, user_id: &str) {
    Mock::given(method("POST"))
        .and(path("/securetoken.googleapis.com/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "expires_in": "3600",
            "token_type": "Bearer",
            "refresh_token": "refresh-1",
            "id_token": "id-fresh",
            "user_id": user_id,
            "project_id": "123456"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn stored_sign_in_signs_store_requests() {
    let server = MockServer::start().await;
    mount_refresh(&server, "uid-1").await;
    Mock::given(method("GET"))
        .and(path("/v1/projects/demo/databases/(default)/documents/users/uid-1"))
        .and(header("authorization", "Bearer id-fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "projects/demo/databases/(default)/documents/users/uid-1",
            "fields": {
                "username": { "stringValue": "ana" },
                "email": { "stringValue": "ana@example.com" }
            },
            "createTime": "2025-06-01T07:00:00Z",
            "updateTime": "2025-06-01T07:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::connect(config(&server, "uid-1")).await.unwrap();
    let profile = session
        .users()
        .fetch_user_profile("uid-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.username, "ana");
    session.disconnect().await;
}

#[tokio::test]
async fn stored_sign_in_for_another_user_is_refused() {
    let server = MockServer::start().await;
    mount_refresh(&server, "uid-other").await;

    let err = Session::connect(config(&server, "uid-1")).await.unwrap_err();
    match err {
        CoreError::Config { message } => assert!(message.contains("uid-other"), "{message}"),
        other => panic!("expected Config, got {other:?}"),
    }
}

#[tokio::test]
async fn revoked_sign_in_fails_to_connect() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/securetoken.googleapis.com/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "TOKEN_EXPIRED" }
        })))
        .mount(&server)
        .await;

    let err = Session::connect(config(&server, "uid-1")).await.unwrap_err();
    assert!(matches!(err, CoreError::AuthenticationFailed { .. }), "{err:?}");
}
