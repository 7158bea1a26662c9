//! HTTP transport for creating and removing proxies.
//!
//! Clients hold at most one proxy at a time, tracked with a `ProxyContainer`
//! cookie carrying the allocated port. The cookie expires together with the
//! proxy itself.

use crate::manager::ProxyManager;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{COOKIE, SET_COOKIE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for the service
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Cookie that ties a client to the proxy it created
const PROXY_COOKIE: &str = "ProxyContainer";

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Extract a cookie value from the request's Cookie headers.
fn cookie_value<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers().get_all(COOKIE).iter().find_map(|header| {
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    })
}

/// HTTP API server exposing proxy create/remove operations
pub struct ApiServer {
    bind_addr: SocketAddr,
    manager: Arc<ProxyManager>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ApiServer {
    pub fn new(
        bind_addr: SocketAddr,
        manager: Arc<ProxyManager>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            manager,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "API server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let manager = Arc::clone(&self.manager);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let manager = Arc::clone(&manager);
                                    async move { handle_request(req, manager).await }
                                });

                                if let Err(e) = AutoBuilder::new(TokioExecutor::new())
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("API server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    manager: Arc<ProxyManager>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method();

    debug!(%method, %path, "API request");

    let response = match (method, path) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        (&Method::GET, "/api/proxy") => {
            let status = serde_json::json!({
                "active": manager.active_proxies(),
            });
            json_response(StatusCode::OK, status.to_string())
        }

        (&Method::POST, "/api/proxy") => create_proxy(&req, &manager).await,

        (&Method::DELETE, "/api/proxy") => remove_proxy(&req, &manager).await,

        _ => response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

/// Create a proxy for the requesting client.
///
/// A client that already carries the proxy cookie is refused; it has to
/// remove its existing proxy (or let it expire) first.
async fn create_proxy(
    req: &Request<hyper::body::Incoming>,
    manager: &Arc<ProxyManager>,
) -> Response<Full<Bytes>> {
    if let Some(port) = cookie_value(req, PROXY_COOKIE) {
        let body = serde_json::json!({
            "message": format!("A proxy has already been created for this client on port {}.", port),
        });
        return json_response(StatusCode::BAD_REQUEST, body.to_string());
    }

    match manager.create_proxy().await {
        Ok(endpoint) => {
            let cookie = format!(
                "{}={}; Max-Age={}; Path=/",
                PROXY_COOKIE,
                endpoint.port,
                manager.proxy_lifetime().as_secs()
            );
            let body = serde_json::json!({ "address": endpoint.to_string() });

            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .header(SET_COOKIE, cookie)
                .body(Full::new(Bytes::from(body.to_string())))
                .expect("valid response with static headers")
        }
        Err(e) => {
            error!(port = e.port(), error = %e, "Proxy creation failed");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Error creating proxy.")
        }
    }
}

/// Remove the proxy named by the client's cookie.
async fn remove_proxy(
    req: &Request<hyper::body::Incoming>,
    manager: &Arc<ProxyManager>,
) -> Response<Full<Bytes>> {
    let Some(port_cookie) = cookie_value(req, PROXY_COOKIE) else {
        let body = serde_json::json!({ "message": "Proxy not found." });
        return json_response(StatusCode::BAD_REQUEST, body.to_string());
    };

    let Ok(port) = port_cookie.parse::<u32>() else {
        let body = serde_json::json!({ "message": "Invalid port value in cookie." });
        return json_response(StatusCode::BAD_REQUEST, body.to_string());
    };

    if manager.remove_proxy(port).await {
        let body = serde_json::json!({ "message": "Proxy has been stopped." });
        // Clear the cookie now that the proxy is gone.
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .header(SET_COOKIE, format!("{}=; Max-Age=0; Path=/", PROXY_COOKIE))
            .body(Full::new(Bytes::from(body.to_string())))
            .expect("valid response with static headers")
    } else {
        // A false result covers both "nothing registered on that port" and
        // "teardown failed after the entry was taken"; the API cannot tell
        // them apart any more than the manager can.
        let body = serde_json::json!({ "message": "Proxy not found or error during removal." });
        json_response(StatusCode::NOT_FOUND, body.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_helpers() {
        let r = response(StatusCode::OK, "ok");
        assert_eq!(r.status(), StatusCode::OK);

        let r = json_response(StatusCode::NOT_FOUND, "{}");
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        assert_eq!(r.headers().get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn test_cookie_value() {
        let req = Request::builder()
            .header(COOKIE, "Session=abc; ProxyContainer=40001; Theme=dark")
            .body(())
            .expect("valid request");

        assert_eq!(cookie_value(&req, PROXY_COOKIE).as_deref(), Some("40001"));
        assert_eq!(cookie_value(&req, "Theme").as_deref(), Some("dark"));
        assert!(cookie_value(&req, "Missing").is_none());
    }

    #[test]
    fn test_cookie_value_no_header() {
        let req = Request::builder().body(()).expect("valid request");
        assert!(cookie_value::<()>(&req, PROXY_COOKIE).is_none());
    }
}
