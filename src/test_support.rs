//! Local HTTP servers for exercising the proxy and the api clients

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use axum_server::tls_openssl::OpenSSLConfig;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Serve `router` on an ephemeral localhost port
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// One canned response
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/html",
            body: body.to_string(),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: "{}".to_string(),
        }
    }
}

/// Answers GET `path` with `script[n]` on the n-th call, repeating the last reply afterwards.
/// Returns the address and a counter of calls received.
pub async fn scripted(path: &str, script: Vec<Reply>) -> (SocketAddr, Arc<AtomicUsize>) {
    assert!(!script.is_empty());
    let calls = Arc::new(AtomicUsize::new(0));
    let script = Arc::new(script);

    let handler_calls = Arc::clone(&calls);
    let router = Router::new().route(
        path,
        get(move || {
            let calls = Arc::clone(&handler_calls);
            let script = Arc::clone(&script);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let reply = script[n.min(script.len() - 1)].clone();
                (reply.status, [(CONTENT_TYPE, reply.content_type)], reply.body)
            }
        }),
    );

    (serve(router).await, calls)
}

/// Self-signed certificate for `127.0.0.1` and `localhost`
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed() -> TestCert {
    let mut params =
        CertificateParams::new(vec!["127.0.0.1".to_string(), "localhost".to_string()]).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    TestCert {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

/// Serve `router` over HTTPS with `cert` on an ephemeral localhost port
pub async fn serve_tls(router: Router, cert: &TestCert) -> SocketAddr {
    let config =
        OpenSSLConfig::from_pem(cert.cert_pem.as_bytes(), cert.key_pem.as_bytes()).unwrap();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum_server::from_tcp(listener)
            .acceptor(axum_server::tls_openssl::OpenSSLAcceptor::new(config))
            .serve(router.into_make_service())
            .await
            .unwrap();
    });
    addr
}
