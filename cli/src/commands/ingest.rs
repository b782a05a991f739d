use crate::util::{api_request, exit_error, read_json_from_file};

pub async fn run(api_url: &str, token: Option<&str>, file: &str) -> i32 {
    let Some(token) = token else {
        exit_error(
            "A webhook token is required to replay a payload",
            Some("Pass --token or set BIOSYNC_WEBHOOK_TOKEN. Create one with `biosync admin create-webhook-token`."),
        );
    };

    let body = match read_json_from_file(file) {
        Ok(v) => v,
        Err(e) => exit_error(&e, Some("Provide the payload exactly as the health-export app sent it.")),
    };

    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/webhooks/health-export",
        Some(token),
        Some(body),
    )
    .await
}
