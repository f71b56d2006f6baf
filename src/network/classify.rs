//! Turning raw transport and JSON-RPC failures into tagged `NetworkError`s.
//!
//! Transient: timeouts, connection resets, HTTP 429/502/503/504, response
//! bodies that are not JSON (provider error pages), and provider rate-limit
//! errors. Everything else is permanent, so an unrecognised failure stops
//! the run instead of being retried.
//!
//! Signed submissions fail through the account client instead. There the
//! node's own verdicts (`StarknetError`) are permanent; the client's
//! transport-level failures and rate limiting are transient.

use reqwest::StatusCode;
use serde::Deserialize;
use starknet::accounts::AccountError;
use starknet::providers::ProviderError;
use std::error::Error as StdError;
use std::io;

use crate::errors::NetworkError;

/// Provider-specific "limit exceeded" code used by several RPC gateways.
const RPC_LIMIT_EXCEEDED: i64 = -32005;
const RPC_TOO_MANY_REQUESTS: i64 = 429;

const MAX_BODY_EXCERPT: usize = 80;

/// A JSON-RPC error object.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RpcErrorObject {
    fn describe(&self) -> String {
        match &self.data {
            Some(data) => format!("rpc error {}: {} ({})", self.code, self.message, data),
            None => format!("rpc error {}: {}", self.code, self.message),
        }
    }
}

pub fn classify_rpc_error(err: &RpcErrorObject) -> NetworkError {
    let lowered = err.message.to_ascii_lowercase();
    let rate_limited = err.code == RPC_LIMIT_EXCEEDED
        || err.code == RPC_TOO_MANY_REQUESTS
        || lowered.contains("rate limit")
        || lowered.contains("too many requests");
    if rate_limited {
        NetworkError::Transient(err.describe())
    } else {
        NetworkError::Permanent(err.describe())
    }
}

pub fn classify_status(status: StatusCode) -> Option<NetworkError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("HTTP {status}");
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Some(NetworkError::Transient(reason)),
        _ => Some(NetworkError::Permanent(reason)),
    }
}

pub fn classify_account_error<S>(label: &str, err: AccountError<S>) -> NetworkError
where
    S: StdError + Send + Sync + 'static,
{
    match err {
        AccountError::Provider(ProviderError::RateLimited) => {
            NetworkError::Transient(format!("{label}: rate limited"))
        }
        AccountError::Provider(ProviderError::Other(inner)) => {
            NetworkError::Transient(format!("{label}: {inner}"))
        }
        AccountError::Provider(ProviderError::StarknetError(inner)) => {
            NetworkError::Permanent(format!("{label}: {inner}"))
        }
        AccountError::Signing(inner) => {
            NetworkError::Permanent(format!("{label}: signing failed: {inner}"))
        }
        other => NetworkError::Permanent(format!("{label}: {other}")),
    }
}

/// A body that should have been JSON but was not (typically an HTML error page).
pub fn malformed_body(body: &str) -> NetworkError {
    let excerpt: String = body.trim().chars().take(MAX_BODY_EXCERPT).collect();
    NetworkError::Transient(format!("malformed response body: {excerpt:?}"))
}

pub fn classify_transport(err: &reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        return NetworkError::Transient(format!("request timed out: {err}"));
    }
    if err.is_connect() || has_transient_io_source(err) {
        return NetworkError::Transient(format!("connection failed: {err}"));
    }
    if err.is_decode() || err.is_body() {
        return NetworkError::Transient(format!("failed to read response: {err}"));
    }
    NetworkError::Permanent(format!("request failed: {err}"))
}

fn has_transient_io_source(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>()
            && is_transient_io(io_err.kind())
        {
            return true;
        }
        source = cause.source();
    }
    false
}

fn is_transient_io(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use starknet::core::types::StarknetError;

    fn rpc(code: i64, message: &str) -> RpcErrorObject {
        RpcErrorObject {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn gateway_errors_are_transient() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ] {
            let err = classify_status(status).unwrap();
            assert_eq!(err.class(), ErrorClass::Transient, "{status}");
        }
    }

    #[test]
    fn other_http_errors_are_permanent() {
        let err = classify_status(StatusCode::UNAUTHORIZED).unwrap();
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(classify_status(StatusCode::OK).is_none());
    }

    #[test]
    fn html_error_page_is_transient() {
        let err = malformed_body("<!DOCTYPE html><html><body>Bad gateway</body></html>");
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.reason().contains("DOCTYPE"));
    }

    #[test]
    fn rate_limit_rpc_errors_are_transient() {
        assert_eq!(
            classify_rpc_error(&rpc(-32005, "limit exceeded")).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_rpc_error(&rpc(-32000, "Rate limit reached, slow down")).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn business_rpc_errors_are_permanent() {
        let err = classify_rpc_error(&rpc(54, "Account balance is smaller than the transaction's maximal fee"));
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(err.reason().contains("54"));
        assert_eq!(
            classify_rpc_error(&rpc(-32601, "Method not found")).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn account_rate_limit_is_transient() {
        let err = classify_account_error(
            "invoke",
            AccountError::<io::Error>::Provider(ProviderError::RateLimited),
        );
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.reason().starts_with("invoke"));
    }

    #[test]
    fn node_verdicts_on_submission_are_permanent() {
        let err = classify_account_error(
            "declare",
            AccountError::<io::Error>::Provider(ProviderError::StarknetError(
                StarknetError::ClassAlreadyDeclared,
            )),
        );
        assert_eq!(err.class(), ErrorClass::Permanent);

        let err = classify_account_error(
            "deploy",
            AccountError::Signing(io::Error::other("bad key")),
        );
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(err.reason().contains("bad key"));
    }

    #[test]
    fn transient_io_kinds() {
        assert!(is_transient_io(io::ErrorKind::ConnectionReset));
        assert!(is_transient_io(io::ErrorKind::TimedOut));
        assert!(!is_transient_io(io::ErrorKind::PermissionDenied));
    }
}
