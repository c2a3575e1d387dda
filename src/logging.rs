//! Middleware for logging requests and responses.

use axum::{extract::Request, http::header::CONTENT_TYPE, middleware::Next, response::Response};

/// Form and JSON fields that carry linking credentials. Their values must
/// never reach the logs.
const SENSITIVE_FIELDS: [&str; 2] = ["public_token", "access_token"];

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level.
/// If the response body is longer than [LOG_BODY_LENGTH_LIMIT] bytes, it is
/// truncated and logged at the `debug` level. Credential fields in form and
/// JSON request bodies are redacted before logging.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (headers, body_text) = extract_header_and_body_text_from_request(request).await;

    let content_type = headers.headers.get(CONTENT_TYPE);

    if content_type == Some(&"application/x-www-form-urlencoded".parse().unwrap()) {
        let mut display_text = body_text.clone();

        for field_name in SENSITIVE_FIELDS {
            display_text = redact_form_field(&display_text, field_name);
        }

        log_request(&headers, &display_text);
    } else if content_type == Some(&"application/json".parse().unwrap()) {
        let mut display_text = body_text.clone();

        for field_name in SENSITIVE_FIELDS {
            display_text = redact_json_field(&display_text, field_name);
        }

        log_request(&headers, &display_text);
    } else {
        log_request(&headers, &body_text);
    }

    let request = Request::from_parts(headers, body_text.into());
    let response = next.run(request).await;

    let (headers, body_text) = extract_header_and_body_text_from_response(response).await;
    log_response(&headers, &body_text);

    Response::from_parts(headers, body_text.into())
}

fn redact_form_field(form_text: &str, field_name: &str) -> String {
    let field_start = form_text.find(&format!("{}=", field_name));

    let start = match field_start {
        Some(field_pos) => field_pos,
        None => return form_text.to_string(),
    };

    let field_end = form_text[start..].find('&');
    let end = match field_end {
        Some(end) => start + end,
        None => form_text.len(),
    };
    let field = &form_text[start..end];

    form_text.replace(field, &format!("{}=********", field_name))
}

// Assumes the field holds a string value, which all our credential fields do.
fn redact_json_field(json_text: &str, field_name: &str) -> String {
    let field_start = match json_text.find(&format!("\"{field_name}\"")) {
        Some(position) => position,
        None => return json_text.to_string(),
    };

    let value_search_start = field_start + field_name.len() + 2;
    let value_start = match json_text[value_search_start..].find('"') {
        Some(offset) => value_search_start + offset + 1,
        None => return json_text.to_string(),
    };
    let value_end = match json_text[value_start..].find('"') {
        Some(offset) => value_start + offset,
        None => return json_text.to_string(),
    };

    format!(
        "{}********{}",
        &json_text[..value_start],
        &json_text[value_end..]
    )
}

async fn extract_header_and_body_text_from_request(
    request: Request,
) -> (axum::http::request::Parts, String) {
    let (headers, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

    (headers, String::from_utf8_lossy(&body_bytes).to_string())
}

async fn extract_header_and_body_text_from_response(
    response: Response,
) -> (axum::http::response::Parts, String) {
    let (headers, body) = response.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

    (headers, String::from_utf8_lossy(&body_bytes).to_string())
}

/// The maximum number of body bytes included in an info-level log line.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

// The limit may land inside a multibyte character, so back up to the nearest
// char boundary before slicing.
fn truncate_at_char_boundary(body: &str) -> &str {
    let mut end = LOG_BODY_LENGTH_LIMIT;

    while !body.is_char_boundary(end) {
        end -= 1;
    }

    &body[..end]
}

fn log_request(headers: &axum::http::request::Parts, body: &str) {
    if body.len() > LOG_BODY_LENGTH_LIMIT {
        tracing::info!(
            "Received request: {headers:#?}\nbody: {:}...",
            truncate_at_char_boundary(body)
        );
        tracing::debug!("Full request body: {body:?}");
    } else {
        tracing::info!("Received request: {headers:#?}\nbody: {body:?}");
    }
}

fn log_response(headers: &axum::http::response::Parts, body: &str) {
    if body.len() > LOG_BODY_LENGTH_LIMIT {
        tracing::info!(
            "Sending response: {headers:#?}\nbody: {:}...",
            truncate_at_char_boundary(body)
        );
        tracing::debug!("Full response body: {body:?}");
    } else {
        tracing::info!("Sending response: {headers:#?}\nbody: {body:?}");
    }
}

#[cfg(test)]
mod logging_tests {
    use super::{
        LOG_BODY_LENGTH_LIMIT, log_request, log_response, redact_form_field, redact_json_field,
        truncate_at_char_boundary,
    };

    #[test]
    fn truncation_backs_up_to_char_boundary() {
        let mut body = "a".repeat(LOG_BODY_LENGTH_LIMIT - 1);
        body.push('é');
        body.push_str("tail");

        let truncated = truncate_at_char_boundary(&body);

        assert_eq!(truncated, "a".repeat(LOG_BODY_LENGTH_LIMIT - 1));
    }

    #[test]
    fn truncation_keeps_full_limit_for_ascii() {
        let body = "a".repeat(LOG_BODY_LENGTH_LIMIT + 10);

        let truncated = truncate_at_char_boundary(&body);

        assert_eq!(truncated.len(), LOG_BODY_LENGTH_LIMIT);
    }

    #[test]
    fn logs_long_multibyte_bodies_without_panicking() {
        // Field arguments are only evaluated when a subscriber is listening.
        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .finish();

        let mut body = "a".repeat(LOG_BODY_LENGTH_LIMIT - 1);
        body.push('é');
        body.push_str(r#"","institution_name":"Crédit Agricole"}"#);

        let (request_parts, _) = axum::http::Request::builder()
            .uri("/api/link/complete")
            .body(())
            .unwrap()
            .into_parts();
        let (response_parts, _) = axum::http::Response::builder()
            .body(())
            .unwrap()
            .into_parts();

        tracing::subscriber::with_default(subscriber, || {
            log_request(&request_parts, &body);
            log_response(&response_parts, &body);
        });
    }

    #[test]
    fn redacts_credential_in_form_body() {
        let redacted = redact_form_field(
            "public_token=pub9a8b7c&institution_name=Chase",
            "public_token",
        );

        assert_eq!(redacted, "public_token=********&institution_name=Chase");
    }

    #[test]
    fn redacts_credential_at_end_of_form_body() {
        let redacted = redact_form_field("username=alice&access_token=access9a8b7c", "access_token");

        assert_eq!(redacted, "username=alice&access_token=********");
    }

    #[test]
    fn leaves_form_body_without_credential_unchanged() {
        let redacted = redact_form_field("username=alice", "public_token");

        assert_eq!(redacted, "username=alice");
    }

    #[test]
    fn redacts_credential_in_json_body() {
        let redacted = redact_json_field(
            r#"{"public_token":"pub9a8b7c","institution_name":"Chase"}"#,
            "public_token",
        );

        assert_eq!(
            redacted,
            r#"{"public_token":"********","institution_name":"Chase"}"#
        );
    }

    #[test]
    fn redacts_credential_in_json_body_with_spacing() {
        let redacted = redact_json_field(r#"{ "access_token": "access9a8b7c" }"#, "access_token");

        assert_eq!(redacted, r#"{ "access_token": "********" }"#);
    }

    #[test]
    fn leaves_json_body_without_credential_unchanged() {
        let redacted = redact_json_field(r#"{"event_name":"OPEN"}"#, "public_token");

        assert_eq!(redacted, r#"{"event_name":"OPEN"}"#);
    }
}
