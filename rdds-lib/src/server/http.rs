//! RDAP HTTP listener.
//!
//! Routes:
//!
//! - `GET /domain/{name}` domain lookup
//! - `GET /help` help and terms notices
//! - anything else answers 404 `Endpoint not found`
//!
//! Requests past `max_connections` in flight are shed with 503 instead of
//! queued, and every request is bounded by the idle timeout.

use crate::config::RdapConfig;
use crate::error::RddsError;
use crate::protocols::rdap::{RdapReply, RdapResponder, RDAP_CONTENT_TYPE};
use crate::server::wait_for_shutdown;
use axum::error_handling::HandleErrorLayer;
use axum::extract::rejection::PathRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{BoxError, Router};
use std::any::Any;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

const OVERLOADED: &str = "Server is busy. Please try again later.";
const UNEXPECTED: &str = "Unexpected error. Please try again later.";

impl IntoResponse for RdapReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, RDAP_CONTENT_TYPE)],
            self.body.to_string(),
        )
            .into_response()
    }
}

/// Build the RDAP router with its middleware stack.
pub fn router(responder: RdapResponder, config: &RdapConfig) -> Router {
    let routes = Router::new()
        .route("/domain/{name}", get(domain))
        .route("/domain/", get(empty_domain))
        .route("/help", get(help))
        .fallback(route_miss);

    with_middleware(routes, config).with_state(responder)
}

fn with_middleware(
    routes: Router<RdapResponder>,
    config: &RdapConfig,
) -> Router<RdapResponder> {
    routes
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_overload))
                .load_shed()
                .layer(GlobalConcurrencyLimitLayer::new(config.max_connections)),
        )
        .layer(TimeoutLayer::new(config.idle_timeout))
        .layer(TraceLayer::new_for_http())
}

async fn domain(
    State(responder): State<RdapResponder>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    name: Result<Path<String>, PathRejection>,
) -> RdapReply {
    match name {
        Ok(Path(name)) => responder.domain(remote.ip(), &name).await,
        Err(rejection) => {
            debug!(remote = %remote, error = %rejection, "undecodable domain path");
            RdapReply::error(400, "Domain name invalid format")
        }
    }
}

async fn empty_domain(
    State(responder): State<RdapResponder>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> RdapReply {
    responder.domain(remote.ip(), "").await
}

async fn help(
    State(responder): State<RdapResponder>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> RdapReply {
    responder.help(remote.ip())
}

async fn route_miss(
    State(responder): State<RdapResponder>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> RdapReply {
    responder.route_miss(remote.ip())
}

async fn handle_overload(err: BoxError) -> RdapReply {
    warn!(error = %err, "shedding RDAP request");
    RdapReply::error(503, OVERLOADED)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else {
        "unknown panic payload"
    };
    error!(panic = detail, "RDAP handler panicked");
    RdapReply::error(500, UNEXPECTED).into_response()
}

/// A bound RDAP listener.
pub struct RdapServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl RdapServer {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// `RddsError::Bind` when the socket cannot be bound.
    pub async fn bind(config: &RdapConfig, responder: RdapResponder) -> Result<Self, RddsError> {
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(|e| RddsError::bind("rdap", config.bind, e))?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            router: router(responder, config),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until shutdown is requested, then drain in-flight requests.
    pub async fn run_until_shutdown(self, shutdown: watch::Receiver<bool>) -> Result<(), RddsError> {
        info!(addr = %self.local_addr, "RDAP server listening");

        axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await?;

        info!("RDAP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::pool::ConnectionPool;
    use crate::protocols::registry::TldAllowList;
    use crate::services::Services;
    use crate::store::MemoryRegistry;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const CONFIG: &str = r#"
[registrar]
name = "Example Registrar"
iana_id = 9999
abuse_email = "abuse@example.net"
abuse_phone = "+1.5555550100"
url = "https://example.net"
whois_server = "whois.example.net"
rdap_url = "https://rdap.example.net"

[policy]
allowed_tlds = [".test"]
"#;

    fn client() -> MockConnectInfo<SocketAddr> {
        MockConnectInfo(SocketAddr::from(([192, 0, 2, 1], 40000)))
    }

    async fn responder_for(registry: &MemoryRegistry, config: &ServerConfig) -> RdapResponder {
        let pool = ConnectionPool::connect(Arc::new(registry.clone()), 1, Duration::from_secs(2))
            .await
            .unwrap();
        RdapResponder::new(Services::new(config, TldAllowList::new([".test"]), pool))
    }

    async fn app_with(registry: &MemoryRegistry, edit: impl FnOnce(&mut ServerConfig)) -> Router {
        let mut config = ServerConfig::from_toml_str(CONFIG).unwrap();
        edit(&mut config);
        let responder = responder_for(registry, &config).await;
        router(responder, &config.rdap).layer(client())
    }

    async fn app() -> Router {
        app_with(&MemoryRegistry::new(), |_| {}).await
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, String, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_help_route() {
        let (status, content_type, body) = get_json(app().await, "/help").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, RDAP_CONTENT_TYPE);
        assert_eq!(body["notices"][0]["title"], "RDAP Help");
    }

    #[tokio::test]
    async fn test_route_miss() {
        let (status, _, body) = get_json(app().await, "/nameserver/ns1.example.test").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn test_percent_encoded_unicode_path() {
        let (status, _, body) = get_json(app().await, "/domain/m%C3%BCnchen.test").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], 404);
        assert!(body["notices"].as_array().unwrap().len() >= 3);
    }

    #[tokio::test]
    async fn test_empty_domain_segment() {
        let (status, _, body) = get_json(app().await, "/domain/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please enter a domain name");
    }

    #[tokio::test]
    async fn test_validation_status() {
        let (status, _, body) = get_json(app().await, "/domain/example.com").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid TLD. Please search only allowed TLDs");
    }

    #[tokio::test]
    async fn test_reply_into_response() {
        let response = RdapReply::error(429, "slow down").into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            RDAP_CONTENT_TYPE
        );
    }

    #[tokio::test]
    async fn test_help_counts_against_rate_limit() {
        let app = app_with(&MemoryRegistry::new(), |c| c.rate_limit.limit = 1).await;

        let (status, _, _) = get_json(app.clone(), "/help").await;
        assert_eq!(status, StatusCode::OK);
        for _ in 0..4 {
            let (status, _, body) = get_json(app.clone(), "/help").await;
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
            assert_eq!(body["errorCode"], 429);
        }
        let (status, _, _) = get_json(app, "/entity/9999").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_requests_past_limit_are_shed() {
        let registry = MemoryRegistry::new();
        registry.set_query_delay(Duration::from_millis(300));
        let app = app_with(&registry, |c| c.rdap.max_connections = 1).await;

        let slow = tokio::spawn(get_json(app.clone(), "/domain/slow.test"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (status, _, body) = get_json(app.clone(), "/help").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], OVERLOADED);

        let (status, _, _) = slow.await.unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get_json(app, "/help").await;
        assert_eq!(status, StatusCode::OK);
    }

    async fn explode() -> RdapReply {
        panic!("lookup exploded")
    }

    #[tokio::test]
    async fn test_handler_panic_answers_500() {
        let config = ServerConfig::from_toml_str(CONFIG).unwrap();
        let responder = responder_for(&MemoryRegistry::new(), &config).await;
        let app = with_middleware(Router::new().route("/boom", get(explode)), &config.rdap)
            .with_state(responder)
            .layer(client());

        let (status, content_type, body) = get_json(app, "/boom").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type, RDAP_CONTENT_TYPE);
        assert_eq!(body["errorCode"], 500);
        assert_eq!(body["error"], UNEXPECTED);
    }
}
