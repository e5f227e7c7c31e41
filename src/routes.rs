use std::sync::Arc;

use bytes::Bytes;
use poem::http::{header, StatusCode};
use poem::web::{Data, Path, Query};
use poem::{get, handler, post, Endpoint, EndpointExt, Request, Response, Route};
use serde::Deserialize;

use crate::config::ImageKind;
use crate::controller::CdnService;
use crate::response::{error_response, image_response, json_response};

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    /// The desired width in pixels, or `original`.
    w: Option<String>,

    /// The desired encoder quality from 1 to 100.
    q: Option<String>,

    /// The desired output format.
    f: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// The file extension of the upload, guessed from the content type
    /// when not given.
    ext: Option<String>,
}

pub fn build_app(service: Arc<CdnService>) -> impl Endpoint<Output = Response> {
    Route::new()
        .at("/v1/images", post(upload))
        .at("/v1/images/:image_id", get(fetch))
        .data(service)
}

#[handler]
async fn upload(
    req: &Request,
    Query(params): Query<UploadParams>,
    data: Bytes,
    service: Data<&Arc<CdnService>>,
) -> Response {
    if !is_authorized(req, service.cfg().upload.private_key.as_deref()) {
        return json_response(
            StatusCode::UNAUTHORIZED,
            Some(json!({ "message": "missing or invalid bearer token" })),
        );
    }

    let content_type = req.content_type().unwrap_or("application/octet-stream");
    let extension = params.ext.or_else(|| {
        content_type
            .parse::<mime::Mime>()
            .ok()
            .and_then(|m| ImageKind::from_content_type(m.essence_str()))
            .map(|kind| kind.as_file_extension().to_string())
    });

    let extension = match extension {
        Some(ext) => ext,
        None => {
            return json_response(
                StatusCode::BAD_REQUEST,
                Some(json!({ "message": "cannot determine the file extension of the upload" })),
            )
        },
    };

    let base_url = base_url(req, service.cfg().public_url.as_deref());
    match service.upload(data, &extension, content_type, &base_url).await {
        Ok(info) => json_response(StatusCode::OK, serde_json::to_value(info).ok()),
        Err(e) => {
            warn!("Rejected upload: {}", e);
            error_response(&e)
        },
    }
}

#[handler]
async fn fetch(
    Path(image_id): Path<String>,
    Query(params): Query<FetchParams>,
    service: Data<&Arc<CdnService>>,
) -> Response {
    let res = service
        .retrieve(
            &image_id,
            params.w.as_deref(),
            params.q.as_deref(),
            params.f.as_deref(),
        )
        .await;

    match res {
        Ok(variant) => image_response(variant.content_type(), variant.data),
        Err(e) => {
            debug!("Failed to serve {}: {}", image_id, e);
            error_response(&e)
        },
    }
}

/// The scheme and authority links in responses are rooted at.
fn base_url(req: &Request, public_url: Option<&str>) -> String {
    if let Some(url) = public_url {
        return url.trim_end_matches('/').to_string();
    }

    req.header(header::HOST)
        .map(|host| format!("http://{}", host))
        .unwrap_or_default()
}

fn is_authorized(req: &Request, private_key: Option<&str>) -> bool {
    let expected = match private_key {
        None => return true,
        Some(key) => key,
    };

    req.header(header::AUTHORIZATION)
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim() == expected)
        .unwrap_or(false)
}
