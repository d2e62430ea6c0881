// src/core/probes/fingerprint.rs

use tracing::{debug, info};
use crate::core::error::ProbeError;
use crate::core::knowledge_base::finding_with_detail;
use crate::core::models::{Finding, Target};
use crate::core::probes::{HttpSnapshot, Probe, ProbeContext};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;

pub const PROBE_ID: &str = "fingerprint";

/// jQuery releases below this version carry the CVE-2020-11022/11023 XSS bugs.
const JQUERY_SAFE_VERSION: [u32; 3] = [3, 5, 0];

/// Detects the technologies behind a site and reports disclosed or outdated versions.
#[derive(Debug, Default, Clone, Copy)]
pub struct FingerprintProbe;

/// A detected technology (e.g. a web server or a JS library).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

/// Where a rule looks for its pattern.
enum Check<'a> {
    Header(&'a str, &'a Lazy<Regex>),
    MetaTag(&'a str, &'a Lazy<Regex>),
    Body(&'a Lazy<Regex>),
    ScriptSrc(&'a Lazy<Regex>),
    Cookie(&'a Lazy<Regex>),
}

struct FingerprintRule<'a> {
    tech_name: &'a str,
    category: &'a str,
    check: Check<'a>,
}

// Capture group 1, when present, is the version.
static RE_NGINX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)nginx(?:/([\d.]+))?").unwrap());
static RE_APACHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Apache(?:/([\d.]+))?").unwrap());
static RE_IIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Microsoft-IIS(?:/([\d.]+))?").unwrap());
static RE_LITESPEED: Lazy<Regex> = Lazy::new(|| Regex::new(r"LiteSpeed").unwrap());
static RE_CLOUDFLARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)cloudflare").unwrap());
static RE_PHP: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHP(?:/([\d.]+))?").unwrap());
static RE_PHPSESSID: Lazy<Regex> = Lazy::new(|| Regex::new(r"PHPSESSID").unwrap());
static RE_ASPNET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([\d.]+)$").unwrap());
static RE_EXPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Express").unwrap());
static RE_JSESSIONID: Lazy<Regex> = Lazy::new(|| Regex::new(r"JSESSIONID").unwrap());
static RE_WORDPRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"WordPress(?: ([\d.]+))?").unwrap());
static RE_WP_CONTENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/wp-content/|/wp-includes/").unwrap());
static RE_JOOMLA: Lazy<Regex> = Lazy::new(|| Regex::new(r"Joomla!(?: ([\d.]+))?").unwrap());
static RE_DRUPAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Drupal(?: ([\d.]+))?").unwrap());
static RE_NEXTJS: Lazy<Regex> = Lazy::new(|| Regex::new(r"/_next/static/").unwrap());
static RE_ANGULAR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"ng-version="([\d.]+)""#).unwrap());
static RE_JQUERY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)jquery(?:[-.]|/)(\d+\.\d+(?:\.\d+)?)").unwrap());
static RE_BOOTSTRAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bootstrap(?:[-.]|/)(\d+\.\d+(?:\.\d+)?)").unwrap());

static RULES: &[FingerprintRule] = &[
    FingerprintRule { tech_name: "Nginx", category: "Web Server", check: Check::Header("server", &RE_NGINX) },
    FingerprintRule { tech_name: "Apache", category: "Web Server", check: Check::Header("server", &RE_APACHE) },
    FingerprintRule { tech_name: "IIS", category: "Web Server", check: Check::Header("server", &RE_IIS) },
    FingerprintRule { tech_name: "LiteSpeed", category: "Web Server", check: Check::Header("server", &RE_LITESPEED) },
    FingerprintRule { tech_name: "Cloudflare", category: "CDN / WAF", check: Check::Header("server", &RE_CLOUDFLARE) },
    FingerprintRule { tech_name: "PHP", category: "Language", check: Check::Header("x-powered-by", &RE_PHP) },
    FingerprintRule { tech_name: "PHP", category: "Language", check: Check::Cookie(&RE_PHPSESSID) },
    FingerprintRule { tech_name: "ASP.NET", category: "Framework", check: Check::Header("x-aspnet-version", &RE_ASPNET) },
    FingerprintRule { tech_name: "Express", category: "Framework", check: Check::Header("x-powered-by", &RE_EXPRESS) },
    FingerprintRule { tech_name: "Java", category: "Language", check: Check::Cookie(&RE_JSESSIONID) },
    FingerprintRule { tech_name: "WordPress", category: "CMS", check: Check::MetaTag("generator", &RE_WORDPRESS) },
    FingerprintRule { tech_name: "WordPress", category: "CMS", check: Check::Body(&RE_WP_CONTENT) },
    FingerprintRule { tech_name: "Joomla", category: "CMS", check: Check::MetaTag("generator", &RE_JOOMLA) },
    FingerprintRule { tech_name: "Drupal", category: "CMS", check: Check::MetaTag("generator", &RE_DRUPAL) },
    FingerprintRule { tech_name: "Next.js", category: "JS Framework", check: Check::ScriptSrc(&RE_NEXTJS) },
    FingerprintRule { tech_name: "Angular", category: "JS Framework", check: Check::Body(&RE_ANGULAR) },
    FingerprintRule { tech_name: "jQuery", category: "JS Library", check: Check::ScriptSrc(&RE_JQUERY) },
    FingerprintRule { tech_name: "Bootstrap", category: "UI Framework", check: Check::ScriptSrc(&RE_BOOTSTRAP) },
];

#[async_trait]
impl Probe for FingerprintProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        info!(target = %target, "Starting fingerprint probe.");
        let response = ctx.fetch(target.url().clone()).await?;
        debug!(bytes = %response.body.len(), "Read response body.");

        let technologies = detect_technologies(&response);
        info!(count = %technologies.len(), "Technologies detected.");
        Ok(analyze_technologies(&technologies))
    }
}

/// Applies every rule to the response. A later match fills in a version an
/// earlier one could not see. Output is sorted by technology name.
pub fn detect_technologies(response: &HttpSnapshot) -> Vec<Technology> {
    let document = Html::parse_document(&response.body);
    let cookies = response.cookies().join("; ");
    let mut found: BTreeMap<&str, Technology> = BTreeMap::new();

    for rule in RULES {
        let version = match &rule.check {
            Check::Header(name, re) => check_with_regex(response.header(name), re),
            Check::MetaTag(name, re) => check_meta_tag(&document, name, re),
            Check::Body(re) => check_with_regex(Some(&response.body), re),
            Check::ScriptSrc(re) => check_script_src(&document, re),
            Check::Cookie(re) => check_with_regex(Some(&cookies), re),
        };

        let Some(version) = version else { continue };
        debug!(tech = %rule.tech_name, version = ?version, "Rule matched.");
        found
            .entry(rule.tech_name)
            .and_modify(|tech| {
                if tech.version.is_none() {
                    tech.version = version.clone();
                }
            })
            .or_insert_with(|| Technology {
                name: rule.tech_name.to_string(),
                category: rule.category.to_string(),
                version,
            });
    }

    found.into_values().collect()
}

pub fn analyze_technologies(technologies: &[Technology]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for tech in technologies {
        let Some(version) = &tech.version else { continue };
        let label = format!("{} {}", tech.name, version);
        findings.push(finding_with_detail(PROBE_ID, "TECH_VERSION_DISCLOSED", &label));

        if tech.name == "jQuery" && version_below(version, &JQUERY_SAFE_VERSION) {
            findings.push(finding_with_detail(PROBE_ID, "TECH_OUTDATED_JQUERY", &label));
        }
    }
    findings
}

/// Compares dotted numeric versions component-wise; missing components count as 0.
fn version_below(version: &str, threshold: &[u32]) -> bool {
    let parts: Vec<u32> = version.split('.').map(|p| p.parse().unwrap_or(0)).collect();
    for (i, limit) in threshold.iter().enumerate() {
        let part = parts.get(i).copied().unwrap_or(0);
        if part != *limit {
            return part < *limit;
        }
    }
    false
}

/// `None` = no match, `Some(None)` = matched without version, `Some(Some(v))` = matched with version.
fn check_with_regex(text: Option<&str>, re: &Regex) -> Option<Option<String>> {
    text.and_then(|text| {
        re.captures(text)
            .map(|caps| caps.get(1).map(|m| m.as_str().trim_end_matches('.').to_string()).filter(|s| !s.is_empty()))
    })
}

fn check_meta_tag(doc: &Html, name: &str, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse(&format!("meta[name='{name}']")).ok()?;
    let content = doc.select(&selector).next().and_then(|el| el.value().attr("content"));
    check_with_regex(content, re)
}

fn check_script_src(doc: &Html, re: &Regex) -> Option<Option<String>> {
    let selector = Selector::parse("script[src], link[href]").ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("href")))
        .find_map(|src| check_with_regex(Some(src), re))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probes::test_support;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn version_comparison() {
        assert!(version_below("3.4.1", &JQUERY_SAFE_VERSION));
        assert!(version_below("1.12", &JQUERY_SAFE_VERSION));
        assert!(!version_below("3.5.0", &JQUERY_SAFE_VERSION));
        assert!(!version_below("3.7.1", &JQUERY_SAFE_VERSION));
    }

    #[test]
    fn versionless_technologies_raise_nothing() {
        let techs = vec![Technology { name: "Cloudflare".into(), category: "CDN / WAF".into(), version: None }];
        assert!(analyze_technologies(&techs).is_empty());
    }

    #[tokio::test]
    async fn detects_disclosed_versions_and_outdated_jquery() {
        let server = MockServer::start().await;
        let body = r#"<html><head>
            <meta name="generator" content="WordPress 6.1.1">
            <script src="/assets/js/jquery-3.4.1.min.js"></script>
            </head><body></body></html>"#;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("server", "nginx/1.18.0")
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let target = Target::parse(&server.uri()).unwrap();
        let findings = FingerprintProbe.run(&target, &test_support::context()).await.unwrap();

        let descriptions: Vec<&str> = findings.iter().map(Finding::description).collect();
        assert!(descriptions.iter().any(|d| d.contains("Nginx 1.18.0")));
        assert!(descriptions.iter().any(|d| d.contains("WordPress 6.1.1")));
        assert!(findings.iter().any(|f| f.code() == "TECH_OUTDATED_JQUERY"));
    }

    #[tokio::test]
    async fn plain_page_is_clean() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>hello</body></html>"))
            .mount(&server)
            .await;

        let target = Target::parse(&server.uri()).unwrap();
        let findings = FingerprintProbe.run(&target, &test_support::context()).await.unwrap();
        assert!(findings.is_empty());
    }
}
