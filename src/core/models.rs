// src/core/models.rs

use crate::core::error::{InvalidTarget, ProbeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumIter, EnumString};
use url::Url;
use uuid::Uuid;

// --- Target ---

/// A validated absolute `http`/`https` URL with a host.
///
/// The only way to obtain a `Target` is through [`Target::parse`] (deserialization
/// goes through it too), so every probe can rely on a well-formed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    url: Url,
}

impl Target {
    /// Parses and validates user input.
    ///
    /// # Errors
    /// Returns [`InvalidTarget`] if the input is not an absolute URL, uses a
    /// scheme other than `http`/`https`, or has no host.
    pub fn parse(input: &str) -> Result<Self, InvalidTarget> {
        let url = Url::parse(input.trim()).map_err(|e| InvalidTarget::new(input, e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(InvalidTarget::new(input, format!("unsupported scheme '{other}'")));
            }
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(Self { url }),
            _ => Err(InvalidTarget::new(input, "missing host")),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host as it appears in the URL (IPv6 addresses keep their brackets).
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// The registered domain name, or `None` when the host is an IP address.
    pub fn domain(&self) -> Option<&str> {
        self.url.domain()
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// Resolves `path` against the site root, e.g. `"/.env"` or `"uploads/"`.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut root = self.url.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root.join(path.trim_start_matches('/'))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl TryFrom<String> for Target {
    type Error = InvalidTarget;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Target::parse(&value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.url.into()
    }
}

// --- Findings ---

/// Severity of a finding, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Display,
    EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One reported issue. Built by a probe, then only read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(rename = "type")]
    kind: String,
    code: String,
    severity: Severity,
    description: String,
    recommendation: String,
    probe_id: String,
}

impl Finding {
    pub fn new(probe_id: &str, code: &str, severity: Severity, kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            code: code.to_string(),
            severity,
            description: String::new(),
            recommendation: String::new(),
            probe_id: probe_id.to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    /// Vulnerability category, e.g. "HSTS Header Missing".
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Machine-readable code, e.g. `HEADERS_HSTS_MISSING`.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn recommendation(&self) -> &str {
        &self.recommendation
    }

    pub fn probe_id(&self) -> &str {
        &self.probe_id
    }
}

// --- Probe failures ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProbeErrorKind {
    Timeout,
    NetworkError,
    InvalidResponse,
}

/// Persisted description of a [`ProbeError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl From<&ProbeError> for ProbeFailure {
    fn from(error: &ProbeError) -> Self {
        let kind = match error {
            ProbeError::Timeout { .. } => ProbeErrorKind::Timeout,
            ProbeError::Network(_) => ProbeErrorKind::NetworkError,
            ProbeError::InvalidResponse(_) => ProbeErrorKind::InvalidResponse,
        };
        Self { kind, message: error.to_string() }
    }
}

// --- Report ---

/// Aggregated result of all probes for one target at one point in time.
///
/// Produced by [`ReportAssembly::finish`]; there is no way to change a report
/// once it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    id: Uuid,
    target: Target,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    findings: Vec<Finding>,
    probe_errors: BTreeMap<String, ProbeFailure>,
    #[serde(default)]
    completed_probes: Vec<String>,
    /// The global deadline fired or the scan was aborted before every probe finished.
    #[serde(default)]
    interrupted: bool,
}

impl ScanReport {
    /// Starts collecting results for a scan of `target` that began at `started_at`.
    pub fn assemble(target: Target, started_at: DateTime<Utc>) -> ReportAssembly {
        ReportAssembly {
            target,
            started_at,
            findings: Vec::new(),
            probe_errors: BTreeMap::new(),
            completed_probes: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn probe_errors(&self) -> &BTreeMap<String, ProbeFailure> {
        &self.probe_errors
    }

    /// Probes that finished without error, in completion order.
    pub fn completed_probes(&self) -> &[String] {
        &self.completed_probes
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    /// Number of probes accounted for, successful or not.
    pub fn probe_count(&self) -> usize {
        self.completed_probes.len() + self.probe_errors.len()
    }

    /// True when at least one probe ran and none of them succeeded.
    pub fn all_probes_failed(&self) -> bool {
        self.completed_probes.is_empty() && !self.probe_errors.is_empty()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(Finding::severity).max()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Exclusive aggregation buffer for one scan. Consumed by [`ReportAssembly::finish`].
#[derive(Debug)]
pub struct ReportAssembly {
    target: Target,
    started_at: DateTime<Utc>,
    findings: Vec<Finding>,
    probe_errors: BTreeMap<String, ProbeFailure>,
    completed_probes: Vec<String>,
}

impl ReportAssembly {
    /// Appends the findings of a probe that finished successfully.
    pub fn record_success(&mut self, probe_id: &str, findings: Vec<Finding>) {
        self.completed_probes.push(probe_id.to_string());
        self.findings.extend(findings);
    }

    pub fn record_failure(&mut self, probe_id: &str, error: &ProbeError) {
        self.probe_errors.insert(probe_id.to_string(), ProbeFailure::from(error));
    }

    pub fn is_recorded(&self, probe_id: &str) -> bool {
        self.probe_errors.contains_key(probe_id) || self.completed_probes.iter().any(|id| id == probe_id)
    }

    /// Seals the report, stamping a fresh scan id and `finished_at`.
    pub fn finish(self, interrupted: bool) -> ScanReport {
        ScanReport {
            id: Uuid::new_v4(),
            target: self.target,
            started_at: self.started_at,
            finished_at: Utc::now(),
            findings: self.findings,
            probe_errors: self.probe_errors,
            completed_probes: self.completed_probes,
            interrupted,
        }
    }
}

/// One line of `history`: enough to pick a report without loading all findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub scan_id: Uuid,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub finding_count: usize,
    pub error_count: usize,
    pub highest_severity: Option<Severity>,
}

impl ReportSummary {
    pub fn of(id: &str, report: &ScanReport) -> Self {
        Self {
            id: id.to_string(),
            scan_id: report.id,
            target: report.target.to_string(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            finding_count: report.findings.len(),
            error_count: report.probe_errors.len(),
            highest_severity: report.highest_severity(),
        }
    }
}
