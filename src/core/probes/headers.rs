// src/core/probes/headers.rs

use tracing::{debug, info};
use crate::core::error::ProbeError;
use crate::core::knowledge_base::{finding, finding_with_detail};
use crate::core::models::{Finding, Target};
use crate::core::probes::{HttpSnapshot, Probe, ProbeContext};
use async_trait::async_trait;

pub const PROBE_ID: &str = "headers";

/// Checks common security-related HTTP response headers and cookie flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadersProbe;

#[async_trait]
impl Probe for HeadersProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    /// Sends a GET request to the target and analyses the response headers.
    ///
    /// # Errors
    /// Fails with `Network`/`Timeout` when the target cannot be reached. A response
    /// with any status code is analysed, since error pages should be hardened too.
    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        info!(target = %target, "Starting headers probe.");
        let response = ctx.fetch(target.url().clone()).await?;
        info!(status = %response.status, "Received HTTP response for headers probe.");

        let findings = analyze_headers(&response);
        info!(findings = %findings.len(), "Headers probe finished.");
        Ok(findings)
    }
}

/// Produces findings for every missing header and every weak cookie.
///
/// HSTS is only required when the final response was served over HTTPS,
/// since browsers ignore it on plain HTTP.
pub fn analyze_headers(response: &HttpSnapshot) -> Vec<Finding> {
    debug!("Analyzing collected header data.");
    let mut findings = Vec::new();
    let served_over_https = response.url.scheme() == "https";

    if served_over_https && response.header("strict-transport-security").is_none() {
        debug!("HSTS header missing.");
        findings.push(finding(PROBE_ID, "HEADERS_HSTS_MISSING"));
    }

    let csp = response.header("content-security-policy");
    if csp.is_none() {
        debug!("CSP header missing.");
        findings.push(finding(PROBE_ID, "HEADERS_CSP_MISSING"));
    }

    let frame_ancestors = csp.is_some_and(|policy| policy.to_ascii_lowercase().contains("frame-ancestors"));
    if response.header("x-frame-options").is_none() && !frame_ancestors {
        debug!("No clickjacking protection.");
        findings.push(finding(PROBE_ID, "HEADERS_X_FRAME_OPTIONS_MISSING"));
    }

    let nosniff = response
        .header("x-content-type-options")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("nosniff"));
    if !nosniff {
        debug!("X-Content-Type-Options missing or not 'nosniff'.");
        findings.push(finding(PROBE_ID, "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"));
    }

    for cookie in response.cookies() {
        let name = cookie.split('=').next().unwrap_or_default().trim();
        let attributes: Vec<String> = cookie
            .split(';')
            .skip(1)
            .map(|a| a.trim().split('=').next().unwrap_or_default().to_ascii_lowercase())
            .collect();

        if served_over_https && !attributes.iter().any(|a| a == "secure") {
            findings.push(finding_with_detail(PROBE_ID, "COOKIE_MISSING_SECURE", &format!("cookie '{name}'")));
        }
        if !attributes.iter().any(|a| a == "httponly") {
            findings.push(finding_with_detail(PROBE_ID, "COOKIE_MISSING_HTTPONLY", &format!("cookie '{name}'")));
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probes::test_support;
    use reqwest::header::{HeaderMap, HeaderValue};
    use reqwest::StatusCode;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn snapshot(url: &str, headers: &[(&'static str, &'static str)]) -> HttpSnapshot {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        HttpSnapshot { url: Url::parse(url).unwrap(), status: StatusCode::OK, headers: map, body: String::new() }
    }

    fn codes(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(Finding::code).collect()
    }

    #[test]
    fn hardened_https_response_is_clean() {
        let response = snapshot(
            "https://example.com/",
            &[
                ("strict-transport-security", "max-age=31536000"),
                ("content-security-policy", "default-src 'self'; frame-ancestors 'none'"),
                ("x-content-type-options", "nosniff"),
                ("set-cookie", "sid=abc; Path=/; Secure; HttpOnly"),
            ],
        );
        assert!(analyze_headers(&response).is_empty());
    }

    #[test]
    fn hsts_is_not_expected_over_plain_http() {
        let response = snapshot("http://example.com/", &[]);
        let findings = analyze_headers(&response);
        let codes = codes(&findings);
        assert!(!codes.contains(&"HEADERS_HSTS_MISSING"));
        assert!(codes.contains(&"HEADERS_CSP_MISSING"));
        assert!(codes.contains(&"HEADERS_X_FRAME_OPTIONS_MISSING"));
    }

    #[test]
    fn weak_cookies_are_reported() {
        let response = snapshot(
            "https://example.com/",
            &[("set-cookie", "sid=abc; Path=/"), ("x-frame-options", "DENY")],
        );
        let findings = analyze_headers(&response);
        let codes = codes(&findings);
        assert!(codes.contains(&"COOKIE_MISSING_SECURE"));
        assert!(codes.contains(&"COOKIE_MISSING_HTTPONLY"));
        assert!(!codes.contains(&"HEADERS_X_FRAME_OPTIONS_MISSING"));
    }

    #[tokio::test]
    async fn probe_reports_missing_headers_from_live_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let target = Target::parse(&server.uri()).unwrap();
        let findings = HeadersProbe.run(&target, &test_support::context()).await.unwrap();
        let codes = codes(&findings);
        assert_eq!(
            codes,
            vec!["HEADERS_CSP_MISSING", "HEADERS_X_FRAME_OPTIONS_MISSING", "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING"]
        );
        assert!(findings.iter().all(|f| f.probe_id() == PROBE_ID));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let target = Target::parse("http://127.0.0.1:9/").unwrap();
        let result = HeadersProbe.run(&target, &test_support::context()).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }
}
