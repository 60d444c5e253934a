use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Attaches a request id to the request extensions and echoes it on the response.
///
/// An incoming `X-Request-Id` is kept; otherwise a fresh UUID is used.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    let req_id_value = match req.headers().get(&header_name) {
        Some(v) => v.clone(),
        None => match HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            Ok(v) => v,
            Err(_) => return next.run(req).await,
        },
    };

    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}
