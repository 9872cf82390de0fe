//! The strict-mode global gate: a `tower::Layer` that runs before every
//! route, structurally modeled on the teacher's `auth::AuthLayer` /
//! `AuthService` pair (same `Arc<Inner>` + boxed-future `Service::call`
//! shape), generalized from OAuth-token validation to bearer-token-vs-
//! configured-models validation.
//!
//! Authentication always runs (even outside strict mode, so per-endpoint
//! handlers can filter results by the caller's allowed models); only the
//! 403 short-circuit is conditional on `--require-token`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use core_engine::access::{AccessFilter, AuthOutcome, strict_gate};
use http::{Method, Request, Response, StatusCode};
use tower::Layer;

#[derive(Clone)]
pub struct AccessGateLayer {
    state: Arc<GateState>,
}

struct GateState {
    tokens: config::TokenStore,
    strict: bool,
    configured_models: Vec<String>,
}

impl AccessGateLayer {
    pub fn new(tokens: config::TokenStore, strict: bool, configured_models: Vec<String>) -> Self {
        Self {
            state: Arc::new(GateState { tokens, strict, configured_models }),
        }
    }
}

impl<S> Layer<S> for AccessGateLayer {
    type Service = AccessGateService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AccessGateService { next, state: self.state.clone() }
    }
}

#[derive(Clone)]
pub struct AccessGateService<S> {
    next: S,
    state: Arc<GateState>,
}

enum Endpoint {
    HealthOrVersion,
    Other,
}

fn classify(path: &str) -> Endpoint {
    match path.trim_end_matches('/') {
        "" | "/api/version" => Endpoint::HealthOrVersion,
        _ => Endpoint::Other,
    }
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for AccessGateService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let state = self.state.clone();

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                return next.call(req).await;
            }

            let filter = AccessFilter::new(&state.tokens, state.strict);
            let outcome = filter.authenticate(req.headers());

            if state.strict {
                let configured: Vec<&str> = state.configured_models.iter().map(String::as_str).collect();

                let rejection = match classify(req.uri().path()) {
                    Endpoint::HealthOrVersion => match &outcome {
                        AuthOutcome::Allowed(_) => None,
                        _ => Some((403, "Forbidden: valid bearer token required".to_string())),
                    },
                    Endpoint::Other => strict_gate(&outcome, &configured),
                };

                if let Some((status, message)) = rejection {
                    return Ok(error_response(status, message));
                }
            }

            let (mut parts, body) = req.into_parts();
            parts.extensions.insert(outcome);
            next.call(Request::from_parts(parts, body)).await
        })
    }
}

fn error_response(status: u16, message: String) -> Response<Body> {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("static error response is always valid")
}
