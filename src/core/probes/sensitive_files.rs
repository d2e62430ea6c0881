// src/core/probes/sensitive_files.rs

use tracing::{debug, info};
use crate::core::error::ProbeError;
use crate::core::knowledge_base::finding_with_detail;
use crate::core::models::{Finding, Target};
use crate::core::probes::{HttpSnapshot, Probe, ProbeContext, MAX_BODY_BYTES};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub const PROBE_ID: &str = "sensitive_files";

static RE_GIT_HEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(ref: refs/|[0-9a-f]{40}\s*$)").unwrap());
static RE_ENV_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[A-Z][A-Z0-9_]*=").unwrap());

/// How to tell a real file from a catch-all page that answers 200 to everything.
#[derive(Debug, Clone, Copy)]
enum Evidence {
    GitHead,
    EnvFile,
    DsStore,
    Archive,
}

impl Evidence {
    /// Archives are judged by their headers, so their bodies are never downloaded.
    fn needs_body(self) -> bool {
        !matches!(self, Evidence::Archive)
    }
}

struct SensitivePath {
    path: &'static str,
    code: &'static str,
    evidence: Evidence,
}

static SENSITIVE_PATHS: &[SensitivePath] = &[
    SensitivePath { path: "/.git/HEAD", code: "EXPOSED_GIT_REPOSITORY", evidence: Evidence::GitHead },
    SensitivePath { path: "/.env", code: "EXPOSED_ENV_FILE", evidence: Evidence::EnvFile },
    SensitivePath { path: "/.DS_Store", code: "EXPOSED_DS_STORE", evidence: Evidence::DsStore },
    SensitivePath { path: "/backup.zip", code: "EXPOSED_BACKUP_ARCHIVE", evidence: Evidence::Archive },
    SensitivePath { path: "/backup.tar.gz", code: "EXPOSED_BACKUP_ARCHIVE", evidence: Evidence::Archive },
    SensitivePath { path: "/site.zip", code: "EXPOSED_BACKUP_ARCHIVE", evidence: Evidence::Archive },
];

/// Requests well-known files that should never be served from a web root.
#[derive(Debug, Default, Clone, Copy)]
pub struct SensitiveFilesProbe;

#[async_trait]
impl Probe for SensitiveFilesProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        info!(target = %target, "Starting sensitive files probe.");
        let (with_body, headers_only): (Vec<&SensitivePath>, Vec<&SensitivePath>) =
            SENSITIVE_PATHS.iter().partition(|p| p.evidence.needs_body());
        let with_body: Vec<&str> = with_body.iter().map(|p| p.path).collect();
        let headers_only: Vec<&str> = headers_only.iter().map(|p| p.path).collect();

        let (files, archives) = tokio::join!(
            ctx.fetch_paths(target, &with_body, MAX_BODY_BYTES),
            ctx.fetch_paths(target, &headers_only, 0),
        );
        let responses = match (files, archives) {
            (Err(e), Err(_)) => return Err(e),
            (files, archives) => files.into_iter().chain(archives).flatten().collect::<Vec<_>>(),
        };

        let mut findings = Vec::new();
        for response in &responses {
            let Some(entry) = SENSITIVE_PATHS.iter().find(|p| response.url.path() == p.path) else {
                // Redirected somewhere else, which is not the file we asked for.
                continue;
            };
            if response.status.is_success() && matches_evidence(entry.evidence, response) {
                debug!(url = %response.url, code = entry.code, "Sensitive file exposed.");
                findings.push(finding_with_detail(PROBE_ID, entry.code, response.url.as_str()));
            }
        }

        info!(findings = %findings.len(), "Sensitive files probe finished.");
        Ok(findings)
    }
}

fn matches_evidence(evidence: Evidence, response: &HttpSnapshot) -> bool {
    let content_type = response.header("content-type").unwrap_or_default().to_ascii_lowercase();
    let looks_like_html = content_type.contains("html") || response.body.trim_start().starts_with('<');

    match evidence {
        Evidence::GitHead => RE_GIT_HEAD.is_match(response.body.trim_start()),
        Evidence::EnvFile => !looks_like_html && RE_ENV_ASSIGNMENT.is_match(&response.body),
        Evidence::DsStore => response.body.contains("Bud1"),
        Evidence::Archive => {
            !looks_like_html
                && ["zip", "gzip", "x-tar", "x-gtar", "octet-stream"].iter().any(|t| content_type.contains(t))
        }
    }
}
