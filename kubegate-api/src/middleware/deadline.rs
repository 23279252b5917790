//! Request deadline middleware
//!
//! Runs each request under a deadline taken from the `X-Request-Timeout`
//! header (seconds), falling back to the configured default and capped at the
//! configured maximum. Expiry drops the in-flight handler and answers 504.
//! Reads are cancelled with it; mutations run on their own task and still
//! settle and get audited after the response has gone out.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

fn requested_secs(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(REQUEST_TIMEOUT_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub async fn deadline_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let deadline = state.config.requests.deadline(requested_secs(&request));
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                method = %method,
                path = %path,
                deadline_secs = deadline.as_secs(),
                "Request deadline exceeded"
            );
            ApiError::GatewayTimeout(format!(
                "request did not complete within {}s; upstream writes may still have been applied",
                deadline.as_secs()
            ))
            .into_response()
        }
    }
}
