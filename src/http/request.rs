//! Request identification.
//!
//! Every request carries an `X-Request-ID`: the client's own when it sent
//! one, otherwise a fresh UUID v4. The same id is forwarded upstream and
//! echoed on the response.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Key of the registered route a request was dispatched to. Inserted into
/// the request extensions by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRoute(pub String);

/// Return the request id, inserting a generated one when missing or unreadable.
pub fn ensure_request_id(headers: &mut HeaderMap) -> String {
    if let Some(id) = headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return id.to_string();
    }

    let id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&id) {
        headers.insert(X_REQUEST_ID, value);
    }
    id
}
