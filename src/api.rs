//! Admin dashboard API client.
//!
//! [`OrderApi`] is the request/response seam used by the sync engine, the
//! connectivity probe, the stream client's snapshot recovery and the kitchen
//! board's mark-served command. [`HttpOrderApi`] is the reqwest
//! implementation; tests substitute scripted fakes.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::orders::{ActiveSnapshot, OrderId, OrderProjection, PendingOrder};

const INTAKE_PATH: &str = "/api/pos/orders";
const SNAPSHOT_PATH: &str = "/api/pos/orders/active";
const HEALTH_PATH: &str = "/api/health";

#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Submit one queued order. Any 2xx is success.
    async fn submit_order(&self, order: &PendingOrder) -> Result<(), ApiError>;

    /// Full listing of orders the kitchen should know about.
    async fn fetch_active_orders(&self) -> Result<ActiveSnapshot, ApiError>;

    /// Order-scoped "everything served" command.
    async fn mark_served(&self, order_id: &OrderId) -> Result<(), ApiError>;

    /// Lightweight reachability check for the connectivity monitor.
    async fn check_health(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly error.
fn friendly_error(url: &str, err: &reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout(timeout);
    }
    if err.is_connect() {
        return ApiError::Transport(format!("Cannot reach admin dashboard at {url}"));
    }
    if err.is_builder() {
        return ApiError::Transport(format!("Invalid admin dashboard URL: {url}"));
    }
    ApiError::Transport(format!("Network error communicating with {url}: {err}"))
}

/// Default message for an HTTP status code.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Admin dashboard endpoint not found".to_string(),
        422 => "Order rejected by admin dashboard".to_string(),
        s if s >= 500 => "Admin dashboard server error".to_string(),
        _ => "Unexpected response from admin dashboard".to_string(),
    }
}

/// Prefer the server's own `error`/`message`, keep `details` for diagnostics.
fn status_error(status: StatusCode, body_text: &str) -> ApiError {
    let message = match serde_json::from_str::<Value>(body_text) {
        Ok(json) => {
            let message = json
                .get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status_message(status));
            match json.get("details").or_else(|| json.get("errors")) {
                Some(details) => format!("{message}: {details}"),
                None => message,
            }
        }
        Err(_) if !body_text.trim().is_empty() => {
            format!("{}: {}", status_message(status), body_text.trim())
        }
        Err(_) => status_message(status),
    };
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

/// Snapshot responses are either a bare array or wrapped in `orders`/`data`.
/// Rows that fail to parse are skipped, not fatal, but their ids are kept
/// so the board does not mistake them for orders the server dropped.
pub(crate) fn parse_snapshot(body: Value) -> Result<ActiveSnapshot, ApiError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("orders").or_else(|| obj.remove("data")) {
            Some(Value::Array(rows)) => rows,
            _ => return Err(ApiError::InvalidJson("snapshot has no order list".into())),
        },
        Value::Null => Vec::new(),
        _ => return Err(ApiError::InvalidJson("snapshot is not a list".into())),
    };

    let mut snapshot = ActiveSnapshot::default();
    for row in rows {
        let id = row_order_id(&row);
        match serde_json::from_value::<OrderProjection>(row) {
            Ok(order) => snapshot.orders.push(order),
            Err(e) => {
                warn!(order_id = ?id.as_ref().map(OrderId::as_str), "Skipping malformed snapshot row: {e}");
                snapshot.unreadable.extend(id);
            }
        }
    }
    Ok(snapshot)
}

/// Order id of a raw row, under any of the accepted field names.
fn row_order_id(row: &Value) -> Option<OrderId> {
    ["orderId", "id", "order_id"]
        .iter()
        .filter_map(|key| row.get(*key))
        .find_map(|v| serde_json::from_value::<OrderId>(v.clone()).ok())
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpOrderApi {
    client: Client,
    base_url: String,
    api_key: String,
    terminal_id: String,
    request_timeout: Duration,
    health_timeout: Duration,
}

impl HttpOrderApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.admin_url.clone(),
            api_key: config.api_key.clone(),
            terminal_id: config.terminal_id.clone(),
            request_timeout: config.request_timeout,
            health_timeout: config.health_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .header("X-POS-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id)
    }

    /// Send and map the response: non-2xx becomes `ApiError::Status`, an
    /// empty body becomes `Value::Null`.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e, self.request_timeout))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(status_error(status, &body_text));
        }
        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }
}

#[async_trait]
impl OrderApi for HttpOrderApi {
    async fn submit_order(&self, order: &PendingOrder) -> Result<(), ApiError> {
        let req = self
            .request(Method::POST, INTAKE_PATH)
            .header("Idempotency-Key", order.local_id.to_string())
            .json(&order.intake_request());
        match self.send(req).await {
            Ok(_) => Ok(()),
            // 2xx with a body we cannot read is still an accepted order.
            Err(ApiError::InvalidJson(e)) => {
                debug!(local_id = %order.local_id, "Intake response not JSON: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_active_orders(&self) -> Result<ActiveSnapshot, ApiError> {
        let body = self.send(self.request(Method::GET, SNAPSHOT_PATH)).await?;
        parse_snapshot(body)
    }

    async fn mark_served(&self, order_id: &OrderId) -> Result<(), ApiError> {
        let path = format!("{INTAKE_PATH}/{}/served", percent_encode(order_id.as_str()));
        match self.send(self.request(Method::POST, &path)).await {
            Ok(_) | Err(ApiError::InvalidJson(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn check_health(&self) -> bool {
        match self
            .request(Method::HEAD, HEALTH_PATH)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::OrderStatus;

    #[test]
    fn test_status_error_prefers_server_message() {
        let err = status_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"Invalid menu items","details":["c10e6bdd"]}"#,
        );
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), r#"Invalid menu items: ["c10e6bdd"] (HTTP 422)"#);

        let bare = status_error(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(bare.to_string(), "Admin dashboard server error (HTTP 503)");

        let text = status_error(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(
            text.to_string(),
            "Unexpected response from admin dashboard: nope (HTTP 400)"
        );
    }

    #[test]
    fn test_percent_encode_order_id() {
        assert_eq!(percent_encode("ord-17"), "ord-17");
        assert_eq!(percent_encode("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn test_parse_snapshot_shapes() {
        let row = serde_json::json!({
            "id": 17,
            "tableLabel": "T4",
            "status": "pending",
            "createdAt": "2026-02-23T12:00:00Z",
            "items": [{ "title": "Soup", "quantity": 1, "itemStatus": "PENDING" }]
        });

        let bare = parse_snapshot(serde_json::json!([row.clone()])).unwrap();
        assert_eq!(bare.orders.len(), 1);
        assert_eq!(bare.orders[0].overall_status, OrderStatus::Pending);

        let wrapped =
            parse_snapshot(serde_json::json!({ "orders": [row.clone(), { "bogus": true }] }))
                .unwrap();
        assert_eq!(wrapped.orders.len(), 1);
        assert!(wrapped.unreadable.is_empty());

        assert!(parse_snapshot(Value::Null).unwrap().orders.is_empty());
        assert!(parse_snapshot(serde_json::json!({ "ok": true })).is_err());
    }

    #[test]
    fn test_unreadable_rows_keep_their_ids() {
        let rows = serde_json::json!([
            {
                "id": 17,
                "status": "PENDING",
                "createdAt": "2026-02-23T12:00:00Z",
                "items": [
                    { "title": "Soup", "quantity": 1, "itemStatus": "PENDING" },
                    { "title": "Bread", "quantity": 1, "itemStatus": "voided" }
                ]
            },
            { "orderId": "ord-9", "status": "nonsense" },
            { "tableLabel": "T2" }
        ]);

        let snapshot = parse_snapshot(rows).unwrap();
        assert!(snapshot.orders.is_empty());
        assert_eq!(
            snapshot.unreadable,
            vec![OrderId::from(17), OrderId::from("ord-9")]
        );
    }

    #[test]
    fn test_http_api_requires_configuration() {
        let config = ClientConfig::new("", "key", "t-1", "/tmp/pos");
        assert!(matches!(
            HttpOrderApi::new(&config),
            Err(ApiError::NotConfigured(_))
        ));
    }
}
