use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Enforce HTTPS behind a TLS-terminating proxy.
///
/// `X-Forwarded-Proto: http` gets a 301 to the HTTPS equivalent. Every
/// response carries an HSTS header. Enabled with `BIOSYNC_REQUIRE_HTTPS=true`.
pub async fn require_https(req: Request, next: Next) -> Response {
    if let Some(uri) = https_redirect_target(req.headers(), req.uri()) {
        let mut response =
            (StatusCode::MOVED_PERMANENTLY, [("location", uri.to_string())]).into_response();
        add_hsts_header(&mut response);
        return response;
    }

    let mut response = next.run(req).await;
    add_hsts_header(&mut response);
    response
}

/// `Some(https uri)` when the proxy saw plain HTTP.
fn https_redirect_target(headers: &HeaderMap, uri: &Uri) -> Option<Uri> {
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("https");
    if proto != "http" {
        return None;
    }

    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    format!("https://{host}{path_and_query}").parse().ok()
}

fn add_hsts_header(response: &mut Response) {
    response
        .headers_mut()
        .insert("strict-transport-security", HeaderValue::from_static(HSTS));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded(proto: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_str(proto).unwrap());
        headers.insert("host", HeaderValue::from_static("api.biosync.health"));
        headers
    }

    #[test]
    fn plain_http_is_redirected_with_path_and_query() {
        let uri: Uri = "/v1/webhooks/health-export?replay=1".parse().unwrap();
        let target = https_redirect_target(&forwarded("http"), &uri).unwrap();
        assert_eq!(
            target.to_string(),
            "https://api.biosync.health/v1/webhooks/health-export?replay=1"
        );
    }

    #[test]
    fn https_and_missing_proto_pass_through() {
        let uri: Uri = "/health".parse().unwrap();
        assert!(https_redirect_target(&forwarded("https"), &uri).is_none());
        assert!(https_redirect_target(&HeaderMap::new(), &uri).is_none());
    }

    #[test]
    fn hsts_header_is_added() {
        let mut response = StatusCode::OK.into_response();
        add_hsts_header(&mut response);
        assert_eq!(response.headers()["strict-transport-security"], HSTS);
    }
}
