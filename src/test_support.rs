//! Throwaway HTTP server for unit tests of the network code.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// What the client sent.
#[derive(Debug)]
pub struct CapturedRequest {
    pub method: Method,
    /// Path plus query string.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Answer every request with `status` and `body`, and hand back the first
/// request received.
///
/// Returns the base URL (`http://127.0.0.1:<port>`) and a receiver for the
/// captured request.
pub async fn serve_once(status: u16, body: &'static [u8]) -> (String, oneshot::Receiver<CapturedRequest>) {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));
    let real_addr = listener.local_addr().unwrap();

    let status = StatusCode::from_u16(status).unwrap();
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(Mutex::new(Some(tx)));

    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, request_body: Bytes| {
            let slot = Arc::clone(&slot);
            async move {
                let path = uri
                    .path_and_query()
                    .map(|pq| pq.as_str().to_string())
                    .unwrap_or_else(|| uri.path().to_string());
                if let Some(tx) = slot.lock().unwrap().take() {
                    let _ = tx.send(CapturedRequest {
                        method,
                        path,
                        headers,
                        body: request_body,
                    });
                }
                (status, body)
            }
        },
    );

    tokio::spawn(axum::serve(listener, app).into_future());

    (format!("http://{real_addr}"), rx)
}
