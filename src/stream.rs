pub mod emitter;
pub mod producer;
pub mod replayer;

use rocket::{
    async_trait,
    request::{FromRequest, Outcome},
    Request,
};

/// Request guard for the `Last-Event-ID` header (§6.1): absent is treated as
/// index 0, not an error — most requests are fresh streams with no header.
pub struct LastEventId(pub i64);

#[async_trait]
impl<'r> FromRequest<'r> for LastEventId {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let id = req
            .headers()
            .get_one("Last-Event-ID")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Outcome::Success(LastEventId(id))
    }
}
