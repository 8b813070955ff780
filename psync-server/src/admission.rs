//! Peer admission hook: rejects connections from addresses not present in
//! the configured allowlist before the websocket upgrade completes.
//!
//! Runs as a `tokio-tungstenite` `accept_hdr_async` callback, so a rejected
//! peer never reaches the connection handler at all.

use tungstenite::handshake::server::{Callback, ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;

/// Implements `tungstenite`'s `Callback` trait, checking the peer address
/// captured at TCP accept time against the configured allowlist.
pub struct AdmissionFilter {
    peer: String,
    allowlist: Vec<String>,
}

impl AdmissionFilter {
    pub fn new(peer: String, allowlist: Vec<String>) -> Self {
        Self { peer, allowlist }
    }
}

impl Callback for AdmissionFilter {
    fn on_request(self, _request: &Request, response: Response) -> Result<Response, ErrorResponse> {
        if self.allowlist.iter().any(|addr| addr == &self.peer) {
            Ok(response)
        } else {
            let rejection = Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Some("Client address not recognized.".to_string()))
                .expect("rejection response is well-formed");
            Err(rejection)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_request() -> Request {
        Request::builder()
            .uri("/")
            .body(())
            .expect("dummy request is well-formed")
    }

    fn dummy_response() -> Response {
        Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .body(())
            .expect("dummy response is well-formed")
    }

    #[test]
    fn admits_allowlisted_peer() {
        let filter = AdmissionFilter::new(
            "127.0.0.1".to_string(),
            vec!["localhost".to_string(), "127.0.0.1".to_string()],
        );
        assert!(filter.on_request(&dummy_request(), dummy_response()).is_ok());
    }

    #[test]
    fn rejects_unknown_peer_with_400() {
        let filter = AdmissionFilter::new("10.0.0.9".to_string(), vec!["127.0.0.1".to_string()]);
        let err = filter
            .on_request(&dummy_request(), dummy_response())
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.body().as_deref(),
            Some("Client address not recognized.")
        );
    }
}
