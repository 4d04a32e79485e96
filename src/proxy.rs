use crate::error::{Result, RunError};
use crate::log_sink::Logger;
use crate::tls::TlsPolicy;
use axum::body::Body;
use axum::body::HttpBody;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Address the scanner is pointed at
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6969";

/// How long a stopping proxy may spend draining connections
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Headers that only make sense for a single connection
const HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Plain HTTP listener that relays every request to the sonar host.
///
/// The TLS policy only applies to the upstream connection, so the scanner can talk to a host
/// with a private CA (or no valid certificate at all) without being configured for it.
pub struct ReverseProxyBridge {
    destination: Url,
    client: reqwest::Client,
    log: Logger,
}

impl ReverseProxyBridge {
    pub fn new(destination: &str, tls: &TlsPolicy, log: Logger) -> Result<Self> {
        let destination = Url::parse(destination).map_err(|e| {
            RunError::Configuration(format!("failed to parse sonar host url '{}': {}", destination, e))
        })?;
        if !matches!(destination.scheme(), "http" | "https") {
            return Err(RunError::Configuration(format!(
                "unsupported sonar host url scheme '{}'",
                destination.scheme()
            )));
        }

        // Redirects belong to the scanner, not to us
        let client = tls
            .client_builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| RunError::Configuration(format!("failed to build proxy client: {}", e)))?;

        Ok(Self {
            destination,
            client,
            log,
        })
    }

    /// Bind `listen_addr` and serve in the background until `shutdown` fires.
    ///
    /// Binding happens before this returns, so an occupied port is reported here rather than
    /// as a connection error inside the scanner.
    pub async fn start(self, listen_addr: &str, shutdown: CancellationToken) -> Result<ProxyHandle> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| RunError::ProxyStart(format!("failed to bind {}: {}", listen_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RunError::ProxyStart(e.to_string()))?;

        self.log.info(format!(
            "Starting reverse proxy on {} -> {}",
            local_addr, self.destination
        ));

        let log = self.log.clone();
        let app = Router::new().fallback(proxy_request).with_state(Arc::new(self));

        let task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match &result {
                Ok(()) => log.info("Reverse proxy stopped"),
                Err(e) => log.error(format!("Reverse proxy failed: {}", e)),
            }
            result.map_err(|e| RunError::ProxyStart(e.to_string()))
        });

        Ok(ProxyHandle { local_addr, task })
    }

    /// Upstream url for a request path, joining the destination path with a single slash
    fn upstream_url(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.destination.clone();
        let base = self.destination.path();
        let joined = match (base.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", base, &path[1..]),
            (false, false) => format!("{}/{}", base, path),
            _ => format!("{}{}", base, path),
        };
        url.set_path(&joined);

        let merged = match (self.destination.query(), query) {
            (Some(a), Some(b)) if !a.is_empty() => Some(format!("{}&{}", a, b)),
            (Some(a), None) => Some(a.to_string()),
            (_, b) => b.map(str::to_string),
        };
        url.set_query(merged.as_deref());
        url
    }

    /// Relay one request. The body is streamed upstream as it arrives.
    async fn forward(&self, request: Request, peer: SocketAddr) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let url = self.upstream_url(parts.uri.path(), parts.uri.query());
        self.log
            .debug(format!("Proxying request {} {}", parts.method, parts.uri));

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        set_forwarded_headers(&mut headers, peer);
        // reqwest fills in the upstream host
        headers.remove(header::HOST);

        let mut outbound = self.client.request(parts.method, url).headers(headers);
        // bodiless requests must not turn into chunked ones
        if HttpBody::size_hint(&body).exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = outbound.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

async fn proxy_request(
    State(bridge): State<Arc<ReverseProxyBridge>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    match bridge.forward(request, peer).await {
        Ok(response) => response,
        Err(e) => {
            bridge.log.warn(format!("Failed to proxy request: {}", e));
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For` and record the original host and scheme
fn set_forwarded_headers(headers: &mut HeaderMap, peer: SocketAddr) {
    let mut chain: Vec<String> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    chain.push(peer.ip().to_string());
    if let Ok(value) = HeaderValue::from_str(&chain.join(", ")) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = headers.get(header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}

/// Handle to a running proxy
pub struct ProxyHandle {
    local_addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the serve loop to finish after its shutdown token fired.
    /// Connections still open after the grace period are dropped.
    pub async fn join(self, log: &Logger) -> Result<()> {
        let abort = self.task.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.task).await {
            Ok(joined) => joined.map_err(|e| RunError::ProxyStart(e.to_string()))?,
            Err(_) => {
                log.warn("Reverse proxy did not stop in time, closing remaining connections");
                abort.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::RecordingSink;
    use crate::test_support::{self_signed, serve, serve_tls};
    use axum::body::Bytes;
    use axum::http::{Method, Uri};
    use axum::routing::get;
    use axum::Json;
    use serde_json::{json, Value};

    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "body": String::from_utf8_lossy(&body),
            "body_len": body.len(),
            "host": header_str(&headers, header::HOST),
            "auth": header_str(&headers, header::AUTHORIZATION),
            "transfer_encoding": header_str(&headers, header::TRANSFER_ENCODING),
            "forwarded_for": header_str(&headers, X_FORWARDED_FOR),
            "forwarded_host": header_str(&headers, X_FORWARDED_HOST),
            "forwarded_proto": header_str(&headers, X_FORWARDED_PROTO),
        }))
    }

    fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    }

    fn logger() -> Logger {
        Logger::new(Arc::new(RecordingSink::default()), "sonar-host-proxy")
    }

    fn bridge(destination: &str) -> ReverseProxyBridge {
        let tls = TlsPolicy::new(None, false).unwrap();
        ReverseProxyBridge::new(destination, &tls, logger()).unwrap()
    }

    async fn start_bridge(destination: &str) -> (ProxyHandle, CancellationToken) {
        let tls = TlsPolicy::new(None, false).unwrap();
        start_bridge_with(destination, &tls).await
    }

    async fn start_bridge_with(
        destination: &str,
        tls: &TlsPolicy,
    ) -> (ProxyHandle, CancellationToken) {
        let token = CancellationToken::new();
        let handle = ReverseProxyBridge::new(destination, tls, logger())
            .unwrap()
            .start("127.0.0.1:0", token.clone())
            .await
            .unwrap();
        (handle, token)
    }

    #[test]
    fn test_upstream_url_joins_paths() {
        let plain = bridge("https://sonar.example.com");
        assert_eq!(
            plain.upstream_url("/api/x", Some("y=1")).as_str(),
            "https://sonar.example.com/api/x?y=1"
        );

        let prefixed = bridge("https://sonar.example.com/sonar/");
        assert_eq!(
            prefixed.upstream_url("/api/x", None).as_str(),
            "https://sonar.example.com/sonar/api/x"
        );

        let no_slash = bridge("https://sonar.example.com/sonar");
        assert_eq!(
            no_slash.upstream_url("/batch/index", None).as_str(),
            "https://sonar.example.com/sonar/batch/index"
        );

        let with_query = bridge("https://sonar.example.com/?org=acme");
        assert_eq!(
            with_query.upstream_url("/api/x", Some("y=1")).as_str(),
            "https://sonar.example.com/api/x?org=acme&y=1"
        );
    }

    #[test]
    fn test_unparsable_destination_is_configuration_error() {
        let tls = TlsPolicy::new(None, false).unwrap();
        for destination in ["not a url", "ftp://sonar.example.com"] {
            let err = ReverseProxyBridge::new(destination, &tls, logger())
                .err()
                .unwrap();
            assert!(matches!(err, RunError::Configuration(_)), "{}", destination);
        }
    }

    #[tokio::test]
    async fn test_forwards_get_unchanged() {
        let upstream = serve(Router::new().fallback(echo)).await;
        let (proxy, token) = start_bridge(&format!("http://{}", upstream)).await;

        let body: Value = reqwest::get(format!("http://{}/api/x?y=1", proxy.local_addr()))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["method"], "GET");
        assert_eq!(body["path"], "/api/x");
        assert_eq!(body["query"], "y=1");
        assert_eq!(body["body"], "");
        assert_eq!(body["host"], upstream.to_string());
        assert_eq!(body["transfer_encoding"], Value::Null);
        assert_eq!(body["forwarded_for"], "127.0.0.1");
        assert_eq!(body["forwarded_host"], proxy.local_addr().to_string());
        assert_eq!(body["forwarded_proto"], "http");

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_forwards_post_body_and_auth() {
        let upstream = serve(Router::new().fallback(echo)).await;
        let (proxy, token) = start_bridge(&format!("http://{}/sonar", upstream)).await;

        let body: Value = reqwest::Client::new()
            .post(format!("http://{}/api/ce/submit", proxy.local_addr()))
            .basic_auth("ci-user", Some("secret"))
            .body("report-bytes")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["method"], "POST");
        assert_eq!(body["path"], "/sonar/api/ce/submit");
        assert_eq!(body["body"], "report-bytes");
        assert_eq!(body["auth"], "Basic Y2ktdXNlcjpzZWNyZXQ=");

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_appends_to_existing_forwarded_for() {
        let upstream = serve(Router::new().fallback(echo)).await;
        let (proxy, token) = start_bridge(&format!("http://{}", upstream)).await;

        let body: Value = reqwest::Client::new()
            .get(format!("http://{}/api/x", proxy.local_addr()))
            .header("x-forwarded-for", "10.0.0.1")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["forwarded_for"], "10.0.0.1, 127.0.0.1");

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_streams_chunked_upload() {
        let upstream = serve(Router::new().fallback(echo)).await;
        let (proxy, token) = start_bridge(&format!("http://{}", upstream)).await;

        // unknown length on the way in, so the client sends it chunked
        let report = vec![b'r'; 1024 * 1024];
        let stream = Body::from(report).into_data_stream();
        let body: Value = reqwest::Client::new()
            .post(format!("http://{}/api/ce/submit", proxy.local_addr()))
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["method"], "POST");
        assert_eq!(body["body_len"], 1024 * 1024);

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_tls_policy_applies_to_https_upstream() {
        let cert = self_signed();
        let upstream = serve_tls(
            Router::new().route("/api/server/version", get(|| async { "10.4" })),
            &cert,
        )
        .await;
        let destination = format!("https://{}", upstream);

        let policies = [
            (TlsPolicy::new(None, false).unwrap(), StatusCode::BAD_GATEWAY),
            (
                TlsPolicy::new(Some(&cert.cert_pem), false).unwrap(),
                StatusCode::OK,
            ),
            (TlsPolicy::new(None, true).unwrap(), StatusCode::OK),
        ];
        for (tls, expected) in policies {
            let (proxy, token) = start_bridge_with(&destination, &tls).await;

            // the scanner side stays plain http
            let response = reqwest::get(format!("http://{}/api/server/version", proxy.local_addr()))
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
            if expected == StatusCode::OK {
                assert_eq!(response.text().await.unwrap(), "10.4");
            }

            token.cancel();
            proxy.join(&logger()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_passes_status_and_redirects_through() {
        let upstream = serve(
            Router::new()
                .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
                .route(
                    "/moved",
                    get(|| async {
                        (
                            StatusCode::FOUND,
                            [(header::LOCATION, "/elsewhere")],
                            "",
                        )
                    }),
                ),
        )
        .await;
        let (proxy, token) = start_bridge(&format!("http://{}", upstream)).await;

        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap();

        let missing = client
            .get(format!("http://{}/missing", proxy.local_addr()))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(missing.text().await.unwrap(), "nope");

        let moved = client
            .get(format!("http://{}/moved", proxy.local_addr()))
            .send()
            .await
            .unwrap();
        assert_eq!(moved.status(), StatusCode::FOUND);
        assert_eq!(moved.headers()[header::LOCATION], "/elsewhere");

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        // Grab a free port and release it so nothing listens there
        let closed = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let (proxy, token) = start_bridge(&format!("http://{}", closed)).await;

        let response = reqwest::get(format!("http://{}/api/server/version", proxy.local_addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        token.cancel();
        proxy.join(&logger()).await.unwrap();
    }

    #[tokio::test]
    async fn test_occupied_address_is_start_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let err = bridge("http://127.0.0.1:9000")
            .start(&addr, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RunError::ProxyStart(_)));
    }

    #[tokio::test]
    async fn test_stops_on_cancellation() {
        let sink = Arc::new(RecordingSink::default());
        let log = Logger::new(sink.clone(), "sonar-host-proxy");
        let tls = TlsPolicy::new(None, false).unwrap();
        let token = CancellationToken::new();
        let proxy = ReverseProxyBridge::new("http://127.0.0.1:9000", &tls, log.clone())
            .unwrap()
            .start("127.0.0.1:0", token.clone())
            .await
            .unwrap();
        let addr = proxy.local_addr();

        token.cancel();
        proxy.join(&log).await.unwrap();

        assert!(sink
            .messages_at(tracing::Level::INFO)
            .contains(&"Reverse proxy stopped".to_string()));
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }
}
