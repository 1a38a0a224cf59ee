use super::service::RateLimiterService;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the client's API token (`API_KEY`; header names are case-insensitive)
pub const API_KEY_HEADER: &str = "api_key";

const TOKEN_LIMIT_MESSAGE: &str = "Your Token have reached the maximum number of requests or actions allowed within a certain time frame.";
const IP_LIMIT_MESSAGE: &str = "Your IP have reached the maximum number of requests or actions allowed within a certain time frame.";

/// Subject a request is limited by
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitSubject {
    Token(String),
    Ip(String),
}

impl LimitSubject {
    /// A configured token wins; anything else falls back to the client address
    pub fn resolve(service: &RateLimiterService, headers: &HeaderMap, client_ip: &str) -> Self {
        let token = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|t| !t.is_empty());

        match token {
            Some(token) if service.quota_exists(token) => LimitSubject::Token(token.to_string()),
            _ => LimitSubject::Ip(client_ip.to_string()),
        }
    }

    fn key(&self) -> (&str, bool) {
        match self {
            LimitSubject::Token(token) => (token, true),
            LimitSubject::Ip(ip) => (ip, false),
        }
    }

    fn limit_message(&self) -> &'static str {
        match self {
            LimitSubject::Token(_) => TOKEN_LIMIT_MESSAGE,
            LimitSubject::Ip(_) => IP_LIMIT_MESSAGE,
        }
    }
}

/// Extract the client IP, without its port
fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Create a 429 Too Many Requests response
fn create_rate_limit_response(message: &str) -> Response {
    let body = serde_json::json!({
        "error": message,
        "status": 429,
    });

    (StatusCode::TOO_MANY_REQUESTS, body.to_string()).into_response()
}

/// Axum middleware function for rate limiting
pub async fn rate_limit_middleware(
    State(service): State<Arc<RateLimiterService>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    let subject = LimitSubject::resolve(&service, request.headers(), &ip);
    let (key, is_token) = subject.key();

    match service.decide(key, is_token).await {
        Ok(false) => next.run(request).await,
        Ok(true) => {
            warn!(subject = ?subject, "Request rejected by rate limiter");
            create_rate_limit_response(subject.limit_message())
        }
        Err(e) => e.into_response(),
    }
}
