// src/core/probes/directory_listing.rs

use tracing::{debug, info};
use crate::core::error::ProbeError;
use crate::core::knowledge_base::finding_with_detail;
use crate::core::models::{Finding, Target};
use crate::core::probes::{HttpSnapshot, Probe, ProbeContext, MAX_BODY_BYTES};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub const PROBE_ID: &str = "directory_listing";

const DEFAULT_PATHS: &[&str] = &["/", "/uploads/", "/images/", "/files/", "/backup/", "/static/", "/assets/", "/tmp/"];

// Signatures of the auto-index pages of Apache, Nginx, lighttpd, IIS and Python's http.server.
static LISTING_SIGNATURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<title>\s*Index of /",
        r"(?i)<h1>\s*Index of /",
        r"(?i)<title>\s*Directory listing for /",
        r"(?i)\[To Parent Directory\]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Looks for web-server generated directory indexes on common directories.
#[derive(Debug, Clone)]
pub struct DirectoryListingProbe {
    paths: Vec<&'static str>,
}

impl Default for DirectoryListingProbe {
    fn default() -> Self {
        Self { paths: DEFAULT_PATHS.to_vec() }
    }
}

impl DirectoryListingProbe {
    pub fn with_paths(paths: Vec<&'static str>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl Probe for DirectoryListingProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        info!(target = %target, paths = self.paths.len(), "Starting directory listing probe.");
        let responses = ctx.fetch_paths(target, &self.paths, MAX_BODY_BYTES).await?;

        let mut findings: Vec<Finding> = Vec::new();
        let mut reported: Vec<&str> = Vec::new();
        for response in &responses {
            // Redirects can land several paths on the same listing.
            if is_directory_listing(response) && !reported.contains(&response.url.as_str()) {
                debug!(url = %response.url, "Directory listing detected.");
                reported.push(response.url.as_str());
                findings.push(finding_with_detail(PROBE_ID, "DIRECTORY_LISTING_ENABLED", response.url.as_str()));
            }
        }

        info!(findings = %findings.len(), "Directory listing probe finished.");
        Ok(findings)
    }
}

pub fn is_directory_listing(response: &HttpSnapshot) -> bool {
    response.status.is_success() && LISTING_SIGNATURES.iter().any(|re| re.is_match(&response.body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probes::test_support;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const APACHE_INDEX: &str = "<html><head><title>Index of /uploads</title></head>\
        <body><h1>Index of /uploads</h1><a href=\"../\">Parent Directory</a></body></html>";

    #[tokio::test]
    async fn reports_only_listed_directories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(APACHE_INDEX))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Index of / is not here"))
            .mount(&server)
            .await;

        let target = Target::parse(&server.uri()).unwrap();
        let findings = DirectoryListingProbe::default().run(&target, &test_support::context()).await.unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code(), "DIRECTORY_LISTING_ENABLED");
        assert!(findings[0].description().contains("/uploads/"));
    }

    #[tokio::test]
    async fn custom_paths_are_probed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pub/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<title>Directory listing for /pub/</title>"))
            .mount(&server)
            .await;

        let target = Target::parse(&server.uri()).unwrap();
        let probe = DirectoryListingProbe::with_paths(vec!["/pub/"]);
        let findings = probe.run(&target, &test_support::context()).await.unwrap();
        assert_eq!(findings.len(), 1);
    }
}
