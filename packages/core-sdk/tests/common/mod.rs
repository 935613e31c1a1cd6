#![allow(dead_code)]

use std::{
    io::Write,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use exloapi_core_sdk::prelude::*;

/** \brief One request as seen by the mock upstream. */
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct Upstream {
    status: StatusCode,
    body: &'static str,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<Captured>>>,
    abandoned: Arc<AtomicUsize>,
}

/** \brief Handle on a running mock upstream bound to an ephemeral port. */
pub struct MockUpstream {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<Captured>>>,
    abandoned: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub async fn start(status: StatusCode, body: &'static str) -> Self {
        Self::start_with_delay(status, body, None).await
    }

    pub async fn start_with_delay(
        status: StatusCode,
        body: &'static str,
        delay: Option<Duration>,
    ) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let abandoned = Arc::new(AtomicUsize::new(0));
        let state = Upstream {
            status,
            body,
            delay,
            seen: seen.clone(),
            abandoned: abandoned.clone(),
        };
        let app = Router::new()
            .route("/api", any(record))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock upstream");
        });
        Self {
            addr,
            seen,
            abandoned,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.seen.lock().unwrap().clone()
    }

    /** \brief Requests whose handler was dropped before answering (client went away). */
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/* counts the handler as abandoned unless it is disarmed before drop */
struct InFlight {
    abandoned: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn record(
    State(state): State<Upstream>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    state.seen.lock().unwrap().push(Captured {
        method,
        headers,
        body,
    });
    let mut in_flight = InFlight {
        abandoned: state.abandoned.clone(),
        armed: true,
    };
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    in_flight.armed = false;
    (state.status, [(CONTENT_TYPE, "application/json")], state.body).into_response()
}

/** \brief Address nothing listens on. */
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}/api", addr)
}

pub fn provider(base_url: &str, api_key: &str, model: &str) -> NewProvider {
    NewProvider {
        base_url: base_url.to_string(),
        api_key: api_key.to_string(),
        model: model.to_string(),
        label: None,
    }
}

/** \brief Store + facade with the given upstream timeout. */
pub fn gateway_with_timeout(timeout: Duration) -> (Arc<SqliteProviderStore>, GatewayFacade) {
    let store = Arc::new(SqliteProviderStore::open_in_memory().expect("open store"));
    let gateway = ForwardingGateway::new(GatewayConfig {
        upstream_timeout: timeout,
        ..GatewayConfig::default()
    })
    .expect("build gateway");
    let facade = GatewayFacade::from_store(store.clone(), gateway);
    (store, facade)
}

pub fn gateway() -> (Arc<SqliteProviderStore>, GatewayFacade) {
    gateway_with_timeout(Duration::from_secs(5))
}

/** \brief Log sink capturing everything the gateway emits while the guard lives. */
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
