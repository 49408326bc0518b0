use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use hyper::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::Sha256;
use tracing::debug;

use crate::github::IssuesEvent;
use crate::handlers::{self, Context, HandledEvent};

/// The name of a webhook event.
#[derive(Debug)]
pub enum EventName {
    /// Issue activity.
    ///
    /// <https://docs.github.com/en/developers/webhooks-and-events/webhooks/webhook-events-and-payloads#issues>
    Issue,
    /// All other webhooks, which are expected and ignored.
    Other,
}

impl std::str::FromStr for EventName {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<EventName, Self::Err> {
        Ok(match s {
            "issues" => EventName::Issue,
            _ => EventName::Other,
        })
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                EventName::Issue => "issues",
                EventName::Other => "other",
            }
        )
    }
}

pub fn deserialize_payload<T: serde::de::DeserializeOwned>(v: &str) -> anyhow::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_str(v);
    let res: Result<T, _> = serde_path_to_error::deserialize(&mut deserializer);
    match res {
        Ok(r) => Ok(r),
        Err(e) => {
            let ctx = format!("at {:?}", e.path().to_string());
            Err(anyhow::Error::from(e.into_inner()).context(ctx))
        }
    }
}

pub async fn webhook(
    State(ctx): State<Arc<Context>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Extract X-GitHub-Event header
    let Some(ev) = headers.get("X-GitHub-Event") else {
        tracing::error!("X-GitHub-Event header must be set");
        return (StatusCode::BAD_REQUEST, "X-GitHub-Event header must be set").into_response();
    };
    let Ok(ev) = ev.to_str() else {
        tracing::error!("X-GitHub-Event header must be UTF-8 encoded");
        return (
            StatusCode::BAD_REQUEST,
            "X-GitHub-Event header must be UTF-8 encoded",
        )
            .into_response();
    };
    let Ok(event) = ev.parse::<EventName>();

    debug!("event={event}");

    // Check signature on body
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|sig| sig.to_str().ok());
    if let Err(err) = check_payload_signed(ctx.config.webhook_secret.as_ref(), signature, &body) {
        tracing::error!("check_payload_signed: {err}");
        return (StatusCode::UNAUTHORIZED, "invalid webhook signature").into_response();
    }

    let EventName::Issue = event else {
        return skipped("not an issues event");
    };

    let Ok(payload) = std::str::from_utf8(&body) else {
        tracing::error!("payload not utf-8");
        return (StatusCode::BAD_REQUEST, "Payload must be UTF-8").into_response();
    };

    let event = match deserialize_payload::<IssuesEvent>(payload) {
        Ok(event) => event,
        Err(err) => {
            tracing::error!("failed to deserialize IssuesEvent: {err:?}");
            return (StatusCode::BAD_REQUEST, "failed to deserialize issues event")
                .into_response();
        }
    };

    match handlers::handle_issues_event(&ctx, event).await {
        Ok(HandledEvent::Skipped(reason)) => skipped(reason),
        Ok(HandledEvent::Notified(count)) => {
            Json(json!({ "ok": true, "notified": count })).into_response()
        }
        Err(err) => {
            tracing::error!("{err:?}");
            let body = format!("request failed: {err:?}");
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
    }
}

fn skipped(reason: &str) -> Response {
    Json(json!({ "ok": true, "skipped": reason })).into_response()
}

#[derive(Debug)]
pub struct SignedPayloadError;

impl fmt::Display for SignedPayloadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "failed to validate payload")
    }
}

impl std::error::Error for SignedPayloadError {}

/// Verifies the HMAC-SHA256 signature GitHub sends over the raw body.
///
/// The header value is the literal `sha256=` followed by the lowercase hex
/// digest. With no configured secret, verification is disabled and any
/// request is accepted; the startup path warns about that posture.
pub fn check_payload_signed(
    secret: Option<&SecretString>,
    signature: Option<&str>,
    payload: &[u8],
) -> Result<(), SignedPayloadError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let signature = signature.ok_or(SignedPayloadError)?;
    let signature = signature.strip_prefix("sha256=").ok_or(SignedPayloadError)?;
    let signature = match hex::decode(signature) {
        Ok(e) => e,
        Err(e) => {
            tracing::trace!("hex decode failed for {signature:?}: {e:?}");
            return Err(SignedPayloadError);
        }
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes()).unwrap();
    mac.update(payload);
    // verify_slice compares in constant time
    mac.verify_slice(&signature).map_err(|_| SignedPayloadError)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use hmac::{Hmac, Mac};
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use sha2::Sha256;
    use tower::ServiceExt;

    use super::{check_payload_signed, webhook};
    use crate::tests::{subscription, test_context};

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let secret = SecretString::from("it's a secret to everybody");
        let body = b"payload";
        let signature = sign("it's a secret to everybody", body);
        assert!(check_payload_signed(Some(&secret), Some(&signature), body).is_ok());
    }

    #[test]
    fn flipped_byte_fails_verification() {
        let secret = SecretString::from("it's a secret to everybody");
        let mut body = b"payload".to_vec();
        let signature = sign("it's a secret to everybody", &body);
        body[0] ^= 1;
        assert!(check_payload_signed(Some(&secret), Some(&signature), &body).is_err());
    }

    #[test]
    fn missing_or_malformed_signature_fails_verification() {
        let secret = SecretString::from("s3cr3t");
        assert!(check_payload_signed(Some(&secret), None, b"payload").is_err());
        assert!(check_payload_signed(Some(&secret), Some("sha1=abcd"), b"payload").is_err());
        assert!(
            check_payload_signed(Some(&secret), Some("sha256=not-hex"), b"payload").is_err()
        );
    }

    #[test]
    fn no_configured_secret_accepts_anything() {
        assert!(check_payload_signed(None, None, b"payload").is_ok());
        assert!(check_payload_signed(None, Some("sha256=ffff"), b"payload").is_ok());
    }

    fn issues_payload(action: &str, labels: &[&str]) -> String {
        json!({
            "action": action,
            "issue": {
                "number": 1347,
                "title": "Found a bug",
                "html_url": "https://github.com/octocat/Hello-World/issues/1347",
                "created_at": "2024-05-01T12:00:00Z",
                "user": { "login": "octocat" },
                "labels": labels.iter().map(|name| json!({ "name": name })).collect::<Vec<_>>(),
            },
            "repository": { "full_name": "octocat/Hello-World" },
        })
        .to_string()
    }

    async fn post_event(
        app: Router,
        event: &str,
        signature: Option<String>,
        payload: String,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/webhook/github")
            .header("X-GitHub-Event", event);
        if let Some(signature) = signature {
            request = request.header("X-Hub-Signature-256", signature);
        }
        let response = app
            .oneshot(request.body(Body::from(payload)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn app(ctx: crate::handlers::Context) -> Router {
        Router::new()
            .route("/webhook/github", post(webhook))
            .with_state(Arc::new(ctx))
    }

    #[tokio::test]
    async fn signed_opened_issue_notifies_matching_subscribers() {
        let (mut ctx, _fetcher, notifier, store) = test_context();
        ctx.config.webhook_secret = Some(SecretString::from("s3cr3t"));
        store.insert_subscriptions(vec![
            subscription(1, 1, "octocat/Hello-World", "help.*"),
            subscription(2, 2, "octocat/Hello-World", "help-wanted"),
        ]);

        let payload = issues_payload("opened", &["help-wanted"]);
        let signature = sign("s3cr3t", payload.as_bytes());
        let (status, body) = post_event(app(ctx), "issues", Some(signature), payload).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["notified"], 2);
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_processing() {
        let (mut ctx, _fetcher, notifier, store) = test_context();
        ctx.config.webhook_secret = Some(SecretString::from("s3cr3t"));
        store.insert_subscriptions(vec![subscription(1, 1, "octocat/Hello-World", ".*")]);

        let payload = issues_payload("opened", &["help-wanted"]);
        let signature = sign("wrong secret", payload.as_bytes());
        let (status, _) = post_event(app(ctx), "issues", Some(signature), payload).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_action_is_skipped_with_zero_dispatches() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![subscription(1, 1, "octocat/Hello-World", ".*")]);

        let payload = issues_payload("closed", &["bug"]);
        let (status, body) = post_event(app(ctx), "issues", None, payload).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], "action is not 'opened'");
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrelated_event_types_are_skipped() {
        let (ctx, _fetcher, _notifier, _store) = test_context();
        let (status, body) = post_event(app(ctx), "star", None, "{}".to_string()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], "not an issues event");
    }

    #[tokio::test]
    async fn unlabeled_issue_is_skipped() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![subscription(1, 1, "octocat/Hello-World", ".*")]);

        let payload = issues_payload("opened", &[]);
        let (status, body) = post_event(app(ctx), "issues", None, payload).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skipped"], "issue has no labels");
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_server_error() {
        let (ctx, _fetcher, _notifier, store) = test_context();
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        let payload = issues_payload("opened", &["bug"]);
        let (status, _) = post_event(app(ctx), "issues", None, payload).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn missing_event_header_is_a_bad_request() {
        let (ctx, _fetcher, _notifier, _store) = test_context();
        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook/github")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
