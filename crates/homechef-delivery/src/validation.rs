//! Input validation for endpoint registration and updates.
//!
//! Validates target URLs, subscribed event types, and custom header sets
//! before anything reaches the store.

use std::collections::BTreeMap;

use homechef_core::{models::PING_EVENT, EventType};

use crate::error::IngressError;

/// Most custom headers an endpoint may carry.
pub const MAX_CUSTOM_HEADERS: usize = 20;

/// Longest accepted custom header value.
pub const MAX_HEADER_VALUE_LEN: usize = 1024;

/// Header names an endpoint may never set.
const FORBIDDEN_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "host",
    "content-type",
    "content-length",
    "user-agent",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Validates a webhook target URL.
///
/// Checks:
/// 1. URL is parseable and absolute
/// 2. Scheme is http or https
/// 3. URL has a host
pub fn validate_url(url: &str) -> Result<(), IngressError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| IngressError::InvalidUrl(format!("invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" | "http" => {},
        scheme => {
            return Err(IngressError::InvalidUrl(format!("unsupported URL scheme: {scheme}")));
        },
    }

    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(IngressError::InvalidUrl("URL must have a host".to_string()));
    }

    Ok(())
}

/// Parses and deduplicates subscribed event types.
///
/// Rejects an empty list, `ping`, and anything outside the catalog.
pub fn parse_event_types(event_types: &[String]) -> Result<Vec<EventType>, IngressError> {
    if event_types.is_empty() {
        return Err(IngressError::Validation(
            "at least one event type must be subscribed".to_string(),
        ));
    }

    let mut parsed = Vec::with_capacity(event_types.len());
    for raw in event_types {
        if raw == PING_EVENT {
            return Err(IngressError::Validation(format!("{PING_EVENT} cannot be subscribed to")));
        }
        let event_type: EventType = raw.parse()?;
        if !parsed.contains(&event_type) {
            parsed.push(event_type);
        }
    }

    Ok(parsed)
}

/// Validates a custom header set against the safelist rules.
///
/// `signature_header` is the configured signature header name, which may sit
/// outside the `X-HomeChef-` namespace.
pub fn validate_custom_headers(
    headers: &BTreeMap<String, String>,
    signature_header: &str,
) -> Result<(), IngressError> {
    if headers.len() > MAX_CUSTOM_HEADERS {
        return Err(IngressError::Validation(format!(
            "at most {MAX_CUSTOM_HEADERS} custom headers are allowed"
        )));
    }

    for (name, value) in headers {
        if !is_token(name) {
            return Err(IngressError::UnsafeHeader(format!("invalid header name: {name:?}")));
        }

        let lower = name.to_ascii_lowercase();
        if FORBIDDEN_HEADERS.contains(&lower.as_str())
            || lower.starts_with("x-homechef-")
            || name.eq_ignore_ascii_case(signature_header)
        {
            return Err(IngressError::UnsafeHeader(format!("{name} cannot be set")));
        }

        if value.len() > MAX_HEADER_VALUE_LEN
            || value.bytes().any(|b| (b < 0x20 && b != b'\t') || b == 0x7f)
        {
            return Err(IngressError::UnsafeHeader(format!("invalid value for {name}")));
        }
    }

    Ok(())
}

/// RFC 9110 token characters.
fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

#[cfg(test)]
mod tests {
    use homechef_core::signing::DEFAULT_SIGNATURE_HEADER;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    fn check(pairs: &[(&str, &str)]) -> Result<(), IngressError> {
        validate_custom_headers(&headers(pairs), DEFAULT_SIGNATURE_HEADER)
    }

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_url("https://example.com/webhooks").is_ok());
        assert!(validate_url("http://localhost:8080/hook").is_ok());
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(matches!(validate_url("not a url"), Err(IngressError::InvalidUrl(_))));
        assert!(matches!(validate_url("/relative/path"), Err(IngressError::InvalidUrl(_))));
        assert!(matches!(validate_url("ftp://example.com/x"), Err(IngressError::InvalidUrl(_))));
        assert!(matches!(validate_url("mailto:ops@example.com"), Err(IngressError::InvalidUrl(_))));
    }

    #[test]
    fn event_types_must_come_from_catalog() {
        let parsed =
            parse_event_types(&["order.created".into(), "tip.created".into(), "order.created".into()])
                .unwrap();
        assert_eq!(parsed, vec![EventType::OrderCreated, EventType::TipCreated]);

        assert!(matches!(
            parse_event_types(&["order.eaten".into()]),
            Err(IngressError::UnknownEventType(_))
        ));
        assert!(matches!(parse_event_types(&[]), Err(IngressError::Validation(_))));
        assert!(matches!(parse_event_types(&["ping".into()]), Err(IngressError::Validation(_))));
    }

    #[test]
    fn safe_custom_headers_pass() {
        assert!(check(&[("X-Tenant", "kitchen-7")]).is_ok());
        assert!(check(&[]).is_ok());
    }

    #[test]
    fn unsafe_custom_headers_rejected() {
        for name in ["Authorization", "cookie", "Host", "Transfer-Encoding", "X-HomeChef-Event"] {
            assert!(
                matches!(check(&[(name, "v")]), Err(IngressError::UnsafeHeader(_))),
                "{name} should be rejected"
            );
        }

        assert!(matches!(check(&[("Bad Name", "v")]), Err(IngressError::UnsafeHeader(_))));
        assert!(matches!(
            check(&[("X-Ok", "line\r\nInjected: yes")]),
            Err(IngressError::UnsafeHeader(_))
        ));
    }

    #[test]
    fn configured_signature_header_cannot_be_overridden() {
        let custom = headers(&[("x-chef-sig", "forged")]);
        assert!(validate_custom_headers(&custom, DEFAULT_SIGNATURE_HEADER).is_ok());
        assert!(matches!(
            validate_custom_headers(&custom, "X-Chef-Sig"),
            Err(IngressError::UnsafeHeader(_))
        ));
    }

    #[test]
    fn header_count_is_capped() {
        let many: BTreeMap<String, String> =
            (0..=MAX_CUSTOM_HEADERS).map(|i| (format!("X-H{i}"), "v".to_string())).collect();
        assert!(matches!(
            validate_custom_headers(&many, DEFAULT_SIGNATURE_HEADER),
            Err(IngressError::Validation(_))
        ));
    }
}
