//! Client/server wire contract
//!
//! A request is a single UTF-8 URL string; the requester closes its write
//! side to delimit the message. The server answers with one UTF-8 JSON
//! object and closes the connection:
//!
//! - `{"result": {<token>: <count>, ...}, "status": "success"}`
//! - `{"error": "<message>", "status": "error"}`
//! - `{"error": "Server busy", "status": "retry"}`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Message sent by the dispatcher when the work queue is full
pub const BUSY_MESSAGE: &str = "Server busy";

/// Server response for one work unit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// Unit processed; top-K token counts
    Success {
        /// Token to occurrence count
        result: HashMap<String, u64>,
    },
    /// Unit failed terminally
    Error {
        /// Human-readable failure description
        error: String,
    },
    /// Unit rejected by admission control; try again later
    Retry {
        /// Rejection message
        error: String,
    },
}

impl Response {
    /// Build a success response from ordered top-K counts
    pub fn success(counts: impl IntoIterator<Item = (String, u64)>) -> Self {
        Response::Success {
            result: counts.into_iter().collect(),
        }
    }

    /// Build an error response
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    /// The admission-control rejection response
    pub fn busy() -> Self {
        Response::Retry {
            error: BUSY_MESSAGE.to_string(),
        }
    }

    /// Serialize to the wire encoding
    pub fn encode(&self) -> Vec<u8> {
        // A Response is a closed enum of JSON-safe fields; serialization
        // cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse a wire message
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidResponse`] for non-JSON or
    /// schema-mismatched payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(bytes).map_err(|e| NetworkError::InvalidResponse(e.to_string()))
    }
}

/// Validate and normalize an incoming request payload
///
/// # Errors
///
/// Returns [`NetworkError::InvalidRequest`] when the payload is not UTF-8
/// or trims to nothing.
pub fn parse_request(bytes: &[u8]) -> Result<String, NetworkError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| NetworkError::InvalidRequest(e.to_string()))?;
    let url = text.trim();
    if url.is_empty() {
        return Err(NetworkError::InvalidRequest("empty request".to_string()));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_shape() {
        let response = Response::success(vec![("word1".to_string(), 3), ("word2".to_string(), 2)]);
        let json: serde_json::Value = serde_json::from_slice(&response.encode()).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["result"]["word1"], 3);
        assert_eq!(json["result"]["word2"], 2);
    }

    #[test]
    fn test_error_shape() {
        let response = Response::error("Invalid URL format: foo");
        let json: serde_json::Value = serde_json::from_slice(&response.encode()).unwrap();

        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "Invalid URL format: foo");
    }

    #[test]
    fn test_retry_shape() {
        let json: serde_json::Value = serde_json::from_slice(&Response::busy().encode()).unwrap();
        assert_eq!(json["status"], "retry");
        assert_eq!(json["error"], "Server busy");
    }

    #[test]
    fn test_decode_round_trip() {
        let original = Response::busy();
        let decoded = Response::decode(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Response::decode(b"not json").is_err());
        assert!(Response::decode(b"{\"status\": \"unknown\"}").is_err());
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request(b"  https://example.com \n").unwrap(),
            "https://example.com"
        );
        assert!(parse_request(b"   \n").is_err());
        assert!(parse_request(&[0xff, 0xfe]).is_err());
    }
}
