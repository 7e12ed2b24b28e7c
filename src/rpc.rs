//! JSON-RPC probe.
//!
//! # Responsibilities
//! - Call a JSON-RPC endpoint (`eth_blockNumber`) over HTTP
//! - Classify transport errors, HTTP statuses and JSON-RPC error objects
//!   into [`OperationError`] so the resilience layer can decide what to retry
//!
//! The probe is a thin consumer of the layer: it performs exactly one
//! request per call and leaves retries, failover and circuit breaking to
//! the caller.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::resilience::error::OperationError;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Single-shot JSON-RPC client.
#[derive(Debug, Clone)]
pub struct RpcProbe {
    client: reqwest::Client,
}

impl RpcProbe {
    /// Create a probe whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, OperationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(classify_transport)?;
        Ok(Self { client })
    }

    /// Latest block number reported by `endpoint`.
    pub async fn block_number(&self, endpoint: &Url) -> Result<u64, OperationError> {
        let result = self
            .call(endpoint, "eth_blockNumber", Value::Array(Vec::new()))
            .await?;
        match result.as_str() {
            Some(hex) => parse_hex_quantity(hex),
            None => Err(OperationError::validation(format!(
                "eth_blockNumber returned non-string result: {}",
                result
            ))
            .with_code("INVALID_RESPONSE")),
        }
    }

    /// Perform one JSON-RPC call and return its `result`.
    pub async fn call(
        &self,
        endpoint: &Url,
        method: &str,
        params: Value,
    ) -> Result<Value, OperationError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .client
            .post(endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            tracing::debug!(endpoint = %endpoint, status = status.as_u16(), "RPC HTTP error");
            return Err(classify_status(status.as_u16(), retry_after));
        }

        let body: RpcResponse = response.json().await.map_err(classify_transport)?;
        if let Some(error) = body.error {
            return Err(classify_rpc_error(error.code, &error.message));
        }
        body.result.ok_or_else(|| {
            OperationError::unknown("JSON-RPC response has neither result nor error")
                .with_code("INVALID_RESPONSE")
        })
    }
}

/// Map a transport-level failure to an error kind.
pub fn classify_transport(err: reqwest::Error) -> OperationError {
    let classified = if err.is_timeout() {
        OperationError::timeout(err.to_string()).with_code("ETIMEDOUT")
    } else if err.is_connect() {
        OperationError::network(err.to_string()).with_code("ECONNREFUSED")
    } else if err.is_decode() {
        OperationError::unknown(err.to_string()).with_code("INVALID_RESPONSE")
    } else if err.is_request() || err.is_body() {
        OperationError::network(err.to_string()).with_code("ECONNRESET")
    } else if err.is_builder() {
        OperationError::validation(err.to_string())
    } else {
        OperationError::unknown(err.to_string())
    };
    classified.with_source(err)
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> OperationError {
    let message = format!("HTTP {}", status);
    let err = match status {
        429 => OperationError::rate_limited(message, retry_after),
        408 | 504 => OperationError::timeout(message),
        401 | 403 => OperationError::authorization(message),
        500..=599 => OperationError::network(message),
        400..=499 => OperationError::validation(message),
        _ => OperationError::unknown(message),
    };
    err.with_code(format!("HTTP_{}", status))
}

/// Delay from a `Retry-After` header given in seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a JSON-RPC error object to an error kind.
pub fn classify_rpc_error(code: i64, message: &str) -> OperationError {
    let lower = message.to_ascii_lowercase();
    let err = if code == -32005 || lower.contains("rate limit") || lower.contains("too many requests")
    {
        OperationError::rate_limited(message, None)
    } else if lower.contains("execution reverted") || code == 3 {
        OperationError::business(message)
    } else {
        match code {
            -32700 | -32600 | -32601 | -32602 => OperationError::validation(message),
            -32603 => OperationError::unknown(message).with_retryable(true),
            _ if lower.contains("timeout") || lower.contains("timed out") => {
                OperationError::timeout(message)
            }
            _ => OperationError::unknown(message),
        }
    };
    err.with_code(format!("RPC_{}", code))
}

/// Parse an Ethereum hex quantity such as `0x1b4`.
pub fn parse_hex_quantity(raw: &str) -> Result<u64, OperationError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| OperationError::validation(format!("'{}' is not a hex quantity", raw)))?;
    u64::from_str_radix(digits, 16).map_err(|e| {
        OperationError::validation(format!("'{}' is not a hex quantity", raw))
            .with_code("INVALID_RESPONSE")
            .with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::error::ErrorKind;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_status_classification() {
        let limited = classify_status(429, Some(Duration::from_secs(2)));
        assert_eq!(limited.kind(), ErrorKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(limited.code(), Some("HTTP_429"));

        assert_eq!(classify_status(503, None).kind(), ErrorKind::Network);
        assert!(classify_status(502, None).is_retryable());
        assert_eq!(classify_status(504, None).kind(), ErrorKind::Timeout);
        assert_eq!(classify_status(401, None).kind(), ErrorKind::Authorization);
        assert_eq!(classify_status(404, None).kind(), ErrorKind::Validation);
        assert!(!classify_status(400, None).is_retryable());
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_rpc_error_classification() {
        assert_eq!(
            classify_rpc_error(-32005, "limit exceeded").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_rpc_error(3, "execution reverted: insufficient balance").kind(),
            ErrorKind::Business
        );
        assert_eq!(
            classify_rpc_error(-32602, "invalid params").kind(),
            ErrorKind::Validation
        );
        let internal = classify_rpc_error(-32603, "internal error");
        assert!(internal.is_retryable());
        assert_eq!(internal.code(), Some("RPC_-32603"));
        assert_eq!(
            classify_rpc_error(-32000, "request timed out").kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn test_hex_quantity() {
        assert_eq!(parse_hex_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_hex_quantity("0x1b4").unwrap(), 436);
        assert_eq!(
            parse_hex_quantity("1b4").unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert!(parse_hex_quantity("0xzz").is_err());
    }
}
