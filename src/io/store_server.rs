//! Versioned document store served over HTTP
//!
//! Server side of the protocol spoken by `store::HttpStore`. Documents are
//! opaque JSON kept in memory, keyed by request path. Every write must carry
//! a precondition (`If-None-Match: *` or `If-Match`), so blind overwrites
//! of the shared record are impossible.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, ETAG, IF_MATCH, IF_NONE_MATCH};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::io::store::http::parse_etag;

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    body: Bytes,
}

/// Outcome of a conditional write
#[derive(Debug, PartialEq)]
pub enum WriteResult {
    Created(u64),
    Updated(u64),
    PreconditionFailed,
    NotFound,
    PreconditionRequired,
}

/// In-memory document table; one lock covers every check-and-set
#[derive(Clone, Default)]
pub struct DocumentTable {
    docs: Arc<Mutex<FxHashMap<String, StoredDocument>>>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current body and version of a document
    pub fn get(&self, path: &str) -> Option<(u64, Bytes)> {
        self.docs.lock().get(path).map(|d| (d.version, d.body.clone()))
    }

    /// Apply a conditional write
    pub fn put(
        &self,
        path: &str,
        body: Bytes,
        if_none_match_any: bool,
        if_match: Option<u64>,
    ) -> WriteResult {
        let mut docs = self.docs.lock();
        match (if_none_match_any, if_match) {
            (true, _) => {
                if docs.contains_key(path) {
                    return WriteResult::PreconditionFailed;
                }
                docs.insert(path.to_string(), StoredDocument { version: 1, body });
                WriteResult::Created(1)
            }
            (false, Some(expected)) => match docs.get_mut(path) {
                None => WriteResult::NotFound,
                Some(doc) if doc.version != expected => WriteResult::PreconditionFailed,
                Some(doc) => {
                    doc.version += 1;
                    doc.body = body;
                    WriteResult::Updated(doc.version)
                }
            },
            (false, None) => WriteResult::PreconditionRequired,
        }
    }
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn with_etag(mut response: Response<Full<Bytes>>, version: u64) -> Response<Full<Bytes>> {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", version)) {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    table: DocumentTable,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/health") => Ok(respond(StatusCode::OK, "ok")),
        (Method::GET, _) => Ok(match table.get(&path) {
            Some((version, body)) => with_etag(respond(StatusCode::OK, body), version),
            None => respond(StatusCode::NOT_FOUND, "Not Found"),
        }),
        (Method::PUT, _) => {
            let if_none_match_any = req
                .headers()
                .get(IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim() == "*");
            let if_match_header = req.headers().get(IF_MATCH).and_then(|v| v.to_str().ok());
            let if_match = match if_match_header {
                Some(raw) => match parse_etag(raw) {
                    Some(version) => Some(version),
                    None => return Ok(respond(StatusCode::BAD_REQUEST, "invalid If-Match")),
                },
                None => None,
            };

            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return Ok(respond(StatusCode::BAD_REQUEST, format!("body error: {e}")));
                }
            };
            if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
                return Ok(respond(StatusCode::BAD_REQUEST, "body must be JSON"));
            }

            let result = table.put(&path, body, if_none_match_any, if_match);
            debug!(path = %path, result = ?result, "store_put");
            Ok(match result {
                WriteResult::Created(v) => with_etag(respond(StatusCode::CREATED, ""), v),
                WriteResult::Updated(v) => with_etag(respond(StatusCode::OK, ""), v),
                WriteResult::PreconditionFailed => {
                    respond(StatusCode::PRECONDITION_FAILED, "Precondition Failed")
                }
                WriteResult::NotFound => respond(StatusCode::NOT_FOUND, "Not Found"),
                WriteResult::PreconditionRequired => {
                    respond(StatusCode::PRECONDITION_REQUIRED, "If-Match or If-None-Match required")
                }
            })
        }
        _ => Ok(respond(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")),
    }
}

/// Serve the document table on an already bound listener until shutdown
pub async fn serve_store(
    listener: TcpListener,
    table: DocumentTable,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, "store_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let table = table.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let table = table.clone();
                                async move { handle_request(req, table).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "store_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "store_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("store_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_conflict() {
        let table = DocumentTable::new();
        let body = Bytes::from_static(b"{}");
        assert_eq!(table.put("/a/b", body.clone(), true, None), WriteResult::Created(1));
        assert_eq!(table.put("/a/b", body, true, None), WriteResult::PreconditionFailed);
    }

    #[test]
    fn test_if_match_versions() {
        let table = DocumentTable::new();
        let body = Bytes::from_static(b"{\"available\":1}");
        table.put("/a/b", body.clone(), true, None);

        assert_eq!(table.put("/a/b", body.clone(), false, Some(1)), WriteResult::Updated(2));
        assert_eq!(table.put("/a/b", body.clone(), false, Some(1)), WriteResult::PreconditionFailed);
        assert_eq!(table.put("/x/y", body, false, Some(1)), WriteResult::NotFound);
        assert_eq!(table.get("/a/b").unwrap().0, 2);
    }

    #[test]
    fn test_unconditional_write_rejected() {
        let table = DocumentTable::new();
        assert_eq!(
            table.put("/a/b", Bytes::from_static(b"{}"), false, None),
            WriteResult::PreconditionRequired
        );
        assert!(table.get("/a/b").is_none());
    }
}
