//! Error taxonomy (§7) and the Rocket-facing `ApiError` that wraps it.

use rocket::{
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;

/// Cache (Redis) operation failed. Recoverable everywhere it appears: the
/// Producer logs and continues, the Replayer falls back to polling the DB.
#[derive(Debug, thiserror::Error)]
pub enum CacheFault {
    #[error("cache error: {0}")]
    Backend(#[from] fred::error::Error),
}

/// Relational store operation failed. Partial writes are recoverable; a
/// failed final write is logged and is fatal to durability for that chat.
#[derive(Debug, thiserror::Error)]
pub enum DbFault {
    #[error(transparent)]
    Pool(#[from] deadpool::managed::PoolError<diesel_async::pooled_connection::PoolError>),
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
}

/// Errors raised while driving the upstream provider's token stream.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamFault {
    #[error("upstream invocation failed: {0}")]
    InvocationFailure(String),
    #[error("upstream stream fault: {0}")]
    StreamFault(String),
}

/// Top-level error type surfaced across the HTTP boundary (§7 propagation policy).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Db(#[from] DbFault),
    #[error(transparent)]
    Cache(#[from] CacheFault),
    #[error(transparent)]
    Upstream(#[from] UpstreamFault),
    #[error("not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("upstream returned no content")]
    UpstreamEmpty,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

#[derive(Responder)]
enum ApiErrorResponse {
    #[response(status = 400, content_type = "json")]
    BadRequest(Json<ErrorBody>),
    #[response(status = 404, content_type = "json")]
    NotFound(Json<ErrorBody>),
    #[response(status = 502, content_type = "json")]
    BadGateway(Json<ErrorBody>),
    #[response(status = 500, content_type = "json")]
    Server(Json<ErrorBody>),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        tracing::warn!(error = %self, "API error");
        let body = |msg: &str| Json(ErrorBody { message: msg.to_owned() });
        match &self {
            ApiError::NotFound => ApiErrorResponse::NotFound(body("not found")).respond_to(req),
            ApiError::Validation(msg) => ApiErrorResponse::BadRequest(body(msg)).respond_to(req),
            ApiError::UpstreamEmpty => {
                ApiErrorResponse::BadGateway(body("upstream returned no content")).respond_to(req)
            }
            _ => ApiErrorResponse::Server(body("internal error")).respond_to(req),
        }
    }
}
