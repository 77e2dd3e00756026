//! Integration tests for login, session checks and logout
//!
//! These tests drive `Authenticator` against a recording mock executor and a throwaway
//! session database, validating that:
//! - The anonymous `system` call is sent without credentials
//! - The token exchange carries only the anonymous session cookie
//! - Only complete sessions are persisted
//! - Session checks degrade to "not logged in" instead of failing

mod common;

use common::{MockExecutor, ok, response};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use secrecy::SecretString;
use securitycenter_api::{
    ApiResponse, Authenticator, HttpMethod, SecurityCenterError, Session, SessionOverride,
    SessionStore,
};
use serde_json::json;
use tempfile::TempDir;

const HOST: &str = "https://sc.example.org";

fn store(dir: &TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("auth.db"), HOST)
}

fn system_with_cookie(cookie: &'static str) -> ApiResponse {
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, HeaderValue::from_static("lang=en; Path=/"));
    headers.append(SET_COOKIE, HeaderValue::from_static(cookie));
    ApiResponse {
        headers,
        ..ok(json!({"version": "5.23.1"}))
    }
}

fn password() -> SecretString {
    SecretString::new("hunter2".into())
}

mod login {
    use super::*;

    #[tokio::test]
    async fn test_login_persists_complete_session() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|request| {
            Ok(match request.path.as_str() {
                "system" => system_with_cookie("TNS_SESSIONID=abc123; Path=/; HttpOnly"),
                "token" => ok(json!({"token": 987654321})),
                _ => response(404, json!({})),
            })
        });

        let outcome = Authenticator::new(&executor, &store)
            .login("admin", &password())
            .await
            .expect("login should succeed");

        assert!(outcome.is_authenticated());
        assert_eq!(outcome.session().session_id, "abc123");
        assert_eq!(outcome.session().token, "987654321");

        let stored = store.get().expect("store readable").expect("session stored");
        assert_eq!(stored.session_id, "abc123");
        assert_eq!(stored.token, "987654321");
    }

    #[tokio::test]
    async fn test_system_call_is_anonymous_and_exchange_carries_cookie_only() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|request| {
            Ok(match request.path.as_str() {
                "system" => system_with_cookie("TNS_SESSIONID=abc123; Path=/"),
                _ => ok(json!({"token": "42"})),
            })
        });

        Authenticator::new(&executor, &store)
            .login("admin", &password())
            .await
            .expect("login should succeed");

        let calls = executor.calls();
        assert_eq!(calls.len(), 2);

        assert_eq!(calls[0].request.method, HttpMethod::Get);
        assert!(!calls[0].request.auth_required);
        assert!(calls[0].session.is_none());

        let exchange = &calls[1];
        assert_eq!(exchange.request.method, HttpMethod::Post);
        assert_eq!(exchange.request.path, "token");
        assert_eq!(exchange.request.fields.get("username"), Some(&json!("admin")));
        assert_eq!(exchange.request.fields.get("password"), Some(&json!("hunter2")));
        let session = exchange.session.as_ref().expect("cookie passed along");
        assert_eq!(session.session_id, "abc123");
        assert!(!session.has_token());
    }

    #[tokio::test]
    async fn test_missing_token_is_session_only() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|request| {
            Ok(match request.path.as_str() {
                "system" => system_with_cookie("TNS_SESSIONID=abc123; Path=/"),
                _ => response(
                    403,
                    json!({"error_code": 74, "error_msg": "Invalid login credentials", "response": ""}),
                ),
            })
        });

        let outcome = Authenticator::new(&executor, &store)
            .login("admin", &password())
            .await
            .expect("login should not fail outright");

        assert!(!outcome.is_authenticated());
        assert_eq!(outcome.session().session_id, "abc123");
        assert!(store.get().expect("store readable").is_none());
    }

    #[tokio::test]
    async fn test_missing_cookie_is_an_authentication_error() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|_| Ok(ok(json!({}))));

        let result = Authenticator::new(&executor, &store)
            .login("admin", &password())
            .await;

        match result {
            Err(SecurityCenterError::Authentication(message)) => {
                assert!(message.contains("unable to acquire session"));
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
        // The token exchange is never attempted
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|_| {
            Err(SecurityCenterError::Timeout("operation timed out".to_string()))
        });

        let result = Authenticator::new(&executor, &store)
            .login("admin", &password())
            .await;

        assert!(matches!(result, Err(SecurityCenterError::Timeout(_))));
    }
}

mod session_check {
    use super::*;

    fn current_user() -> MockExecutor {
        MockExecutor::new(|request| {
            assert_eq!(request.path, "currentUser");
            assert_eq!(
                request.fields.get("fields"),
                Some(&json!("firstname,lastname,username"))
            );
            Ok(ok(json!({"firstname": "Ada", "lastname": "Lovelace", "username": "ada"})))
        })
    }

    #[tokio::test]
    async fn test_valid_session_returns_profile() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        store.set(&Session::new("abc", "123")).expect("session stored");
        let executor = current_user();

        let profile = Authenticator::new(&executor, &store)
            .test()
            .await
            .expect("check should run")
            .expect("profile returned");

        assert_eq!(profile.username, "ada");
        assert_eq!(profile.firstname, "Ada");
        let calls = executor.calls();
        assert_eq!(
            calls[0].session.as_ref().map(|s| s.token.as_str()),
            Some("123")
        );
    }

    #[tokio::test]
    async fn test_override_is_used_without_database() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir).with_override(Some(SessionOverride::new("env-cookie", "777")));
        let executor = current_user();

        let profile = Authenticator::new(&executor, &store)
            .test()
            .await
            .expect("check should run");

        assert!(profile.is_some());
        let calls = executor.calls();
        let session = calls[0].session.as_ref().expect("override session sent");
        assert_eq!(session.session_id, "env-cookie");
        assert_eq!(session.token, "777");
    }

    #[tokio::test]
    async fn test_rejected_session_is_not_logged_in() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|_| {
            Ok(response(403, json!({"error_code": 146, "error_msg": "Invalid token"})))
        });

        let profile = Authenticator::new(&executor, &store)
            .test()
            .await
            .expect("check should run");
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_logged_in() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let executor = MockExecutor::new(|_| {
            Err(SecurityCenterError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        });

        let profile = Authenticator::new(&executor, &store)
            .test()
            .await
            .expect("check should run");
        assert!(profile.is_none());
    }

    #[tokio::test]
    async fn test_logout_forgets_session() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        store.set(&Session::new("abc", "123")).expect("session stored");
        let executor = current_user();

        Authenticator::new(&executor, &store)
            .logout()
            .expect("logout should succeed");

        assert!(store.get().expect("store readable").is_none());
        assert!(executor.calls().is_empty());
    }
}
