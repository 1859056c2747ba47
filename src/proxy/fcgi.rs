//! FastCGI upstream transport.
//!
//! Selected by the `proto=fcgi` target opt. The `root`, `strip` and
//! `index` opts control script resolution. Connections are short-lived,
//! one per request.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use fastcgi_client::{Client, Params, Request as FcgiRequest};
use tokio::net::TcpStream;
use url::Url;

use crate::proxy::headers::strip_path_prefix;
use crate::route::Target;

/// Serve one request over FastCGI to the host of the upstream URL.
pub async fn serve(
    request: axum::http::Request<Body>,
    target: &Target,
    upstream: &Url,
) -> Response {
    let addr = match (upstream.host_str(), upstream.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => format!("{}:9000", h),
        _ => return (StatusCode::BAD_GATEWAY, "invalid fastcgi upstream").into_response(),
    };

    let root = target.opts.get("root").map(String::as_str).unwrap_or("");
    let strip = target.opts.get("strip").map(String::as_str).unwrap_or("");
    let index = target.opts.get("index").map(String::as_str).unwrap_or("");

    let mut path = strip_path_prefix(request.uri().path(), strip).to_string();
    if path.ends_with('/') && !index.is_empty() {
        path.push_str(index);
    }
    let script_filename = format!("{}{}", root, path);
    let query = request.uri().query().unwrap_or("").to_string();
    let method = request.method().as_str().to_string();
    let content_type = request
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot read fastcgi request body");
            return (StatusCode::BAD_GATEWAY, "cannot read request body").into_response();
        }
    };

    let stream = match TcpStream::connect(&addr).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(upstream = %addr, error = %e, "Cannot dial fastcgi upstream");
            return (StatusCode::BAD_GATEWAY, "fastcgi upstream unreachable").into_response();
        }
    };

    let params = Params::default()
        .request_method(method)
        .script_name(path.clone())
        .script_filename(script_filename)
        .request_uri(path)
        .query_string(query)
        .document_root(root.to_string())
        .content_type(content_type)
        .content_length(body.len());

    let client = Client::new(stream);
    let output = match client
        .execute_once(FcgiRequest::new(params, body.as_ref()))
        .await
    {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(upstream = %addr, error = %e, "FastCGI request failed");
            return (StatusCode::BAD_GATEWAY, "fastcgi request failed").into_response();
        }
    };

    if let Some(stderr) = output.stderr.as_ref() {
        if !stderr.is_empty() {
            tracing::warn!(
                upstream = %addr,
                stderr = %String::from_utf8_lossy(stderr),
                "FastCGI stderr"
            );
        }
    }

    parse_cgi_response(&output.stdout.unwrap_or_default())
}

/// Split a CGI response into status, headers and body. A `Status:`
/// header selects the response code, everything else is copied.
fn parse_cgi_response(raw: &[u8]) -> Response {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, i + 4))
        .or_else(|| raw.windows(2).position(|w| w == b"\n\n").map(|i| (i, i + 2)));

    let Some((header_end, body_start)) = split else {
        return Response::new(Body::from(raw.to_vec()));
    };

    let mut status = StatusCode::OK;
    let mut response = Response::new(Body::from(raw[body_start..].to_vec()));

    for line in String::from_utf8_lossy(&raw[..header_end]).lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            if let Some(code) = value.split_whitespace().next() {
                if let Ok(s) = code.parse::<u16>().map(StatusCode::from_u16) {
                    status = s.unwrap_or(StatusCode::OK);
                }
            }
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.trim()),
            HeaderValue::try_from(value),
        ) {
            response.headers_mut().append(name, value);
        }
    }

    *response.status_mut() = status;
    response
}
