use bytes::Bytes;
use poem::http::{header, StatusCode};
use poem::Response;
use serde_json::Value;

use crate::error::CdnError;

/// Variants are immutable once derived, so clients and intermediaries may
/// keep them for a year without revalidating.
pub const VARIANT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// A standard JSON response with the content type set to application/json
pub fn json_response(status: StatusCode, data: Option<Value>) -> Response {
    let payload = json!({
        "status": status.as_u16(),
        "data": data,
    });

    Response::builder()
        .status(status)
        .content_type("application/json")
        .body(payload.to_string())
}

pub fn image_response(content_type: &str, data: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .content_type(content_type)
        .header(header::CACHE_CONTROL, VARIANT_CACHE_CONTROL)
        .body(data)
}

pub fn error_response(err: &CdnError) -> Response {
    let status = match err {
        CdnError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        CdnError::NotFound(_) => StatusCode::NOT_FOUND,
        CdnError::Transcode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CdnError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    json_response(status, Some(json!({ "message": err.to_string() })))
}
