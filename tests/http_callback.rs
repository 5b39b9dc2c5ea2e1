//! The HTTP transport against a real local callback endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::put;
use rekon::rekon_callback::{
    CallbackTarget, CallbackTransport, DeliveryConfig, DeliveryReport, HttpTransport,
    ResponseDelivery, ResponseStatus,
};
use rekon::rekon_core::CorrelationIds;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Clone)]
struct Captured {
    content_type: Option<String>,
    content_length: Option<String>,
    body: Bytes,
}

type Captures = Arc<Mutex<Vec<Captured>>>;

async fn record(State(captures): State<Captures>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    captures.lock().await.push(Captured {
        content_type: header("content-type"),
        content_length: header("content-length"),
        body,
    });
    StatusCode::OK
}

async fn serve() -> Result<(Url, Captures), String> {
    let captures: Captures = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/callback", put(record))
        .with_state(captures.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    let address = listener
        .local_addr()
        .map_err(|e| format!("no local address: {e}"))?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let url = Url::parse(&format!("http://{address}/callback")).map_err(|e| e.to_string())?;
    Ok((url, captures))
}

#[tokio::test]
async fn put_has_empty_content_type_and_explicit_length() -> Result<(), String> {
    let (url, captures) = serve().await?;
    let transport = HttpTransport::new().map_err(|e| e.to_string())?;

    let body = json!({"Status": "SUCCESS"}).to_string();
    let status = transport
        .put(&url, body.clone(), Duration::from_secs(5))
        .await
        .map_err(|e| e.to_string())?;
    assert_eq!(status, 200);

    let seen = captures.lock().await.clone();
    let request = seen.first().ok_or("no request captured")?;
    assert_eq!(request.content_type.as_deref(), Some(""));
    assert_eq!(request.content_length, Some(body.len().to_string()));
    assert_eq!(request.body, Bytes::from(body));
    Ok(())
}

#[tokio::test]
async fn delivery_sends_envelope_over_http() -> Result<(), String> {
    let (url, captures) = serve().await?;
    let transport = HttpTransport::new().map_err(|e| e.to_string())?;
    let delivery = ResponseDelivery::new(Arc::new(transport), DeliveryConfig::default());
    let target = CallbackTarget::new(
        url,
        CorrelationIds {
            stack_id: "stack-1".to_string(),
            request_id: "req-1".to_string(),
            logical_id: "Res".to_string(),
        },
    );

    let report = delivery
        .deliver(&target, ResponseStatus::Success, "id-1", None, &json!({"Key": "v"}))
        .await;
    assert_eq!(report, DeliveryReport::Delivered { status_code: 200 });

    let seen = captures.lock().await.clone();
    assert_eq!(seen.len(), 1);
    let request = seen.first().ok_or("no request captured")?;
    let envelope: Value = serde_json::from_slice(&request.body).map_err(|e| e.to_string())?;
    assert_eq!(envelope.get("PhysicalResourceId"), Some(&json!("id-1")));
    assert_eq!(envelope.pointer("/Data/Key"), Some(&json!("v")));
    Ok(())
}

#[tokio::test]
async fn unreachable_target_is_undelivered_after_emergency_attempt() -> Result<(), String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    let address = listener.local_addr().map_err(|e| e.to_string())?;
    drop(listener);

    let url = Url::parse(&format!("http://{address}/callback")).map_err(|e| e.to_string())?;
    let transport = HttpTransport::new().map_err(|e| e.to_string())?;
    let delivery = ResponseDelivery::new(Arc::new(transport), DeliveryConfig::default());
    let target = CallbackTarget::new(url, CorrelationIds::default());

    let report = delivery
        .deliver(&target, ResponseStatus::Failed, "id-1", Some("boom"), &json!({}))
        .await;
    assert!(!report.is_delivered());
    Ok(())
}
