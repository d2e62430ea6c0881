// src/core/probes/dns.rs

use tracing::{debug, info, warn};

use crate::core::error::ProbeError;
use crate::core::knowledge_base::finding;
use crate::core::models::{Finding, Target};
use crate::core::probes::{Probe, ProbeContext};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;

pub const PROBE_ID: &str = "dns";

/// A list of common DKIM selectors to check for when a specific one is not known.
const COMMON_DKIM_SELECTORS: &[&str] = &["google", "selector1", "selector2", "default", "dkim"];

/// `Ok(Some)` found, `Ok(None)` definitively absent, `Err` lookup failed.
pub type LookupResult<T> = Result<Option<T>, String>;

/// Checks the email authentication and CA authorization records of the target's domain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmarcRecord {
    pub record: String,
    pub policy: Option<String>,
}

/// Raw records gathered for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecords {
    pub spf: LookupResult<String>,
    pub dmarc: LookupResult<DmarcRecord>,
    pub dkim: LookupResult<Vec<String>>,
    pub caa: LookupResult<Vec<String>>,
}

impl DnsRecords {
    fn all_failed(&self) -> bool {
        self.spf.is_err() && self.dmarc.is_err() && self.dkim.is_err() && self.caa.is_err()
    }

    fn first_error(&self) -> Option<&str> {
        [self.spf.as_ref().err(), self.dmarc.as_ref().err(), self.dkim.as_ref().err(), self.caa.as_ref().err()]
            .into_iter()
            .flatten()
            .next()
            .map(String::as_str)
    }
}

#[async_trait]
impl Probe for DnsProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    /// Runs SPF, DMARC, DKIM and CAA lookups in parallel, then analyses them.
    ///
    /// Targets addressed by IP have no domain to check and yield a clean result.
    ///
    /// # Errors
    /// `Network` if every lookup failed (resolver unreachable), `Timeout` on cancellation.
    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        let Some(domain) = target.domain() else {
            debug!(host = %target.host(), "Target is an IP address, skipping DNS probe.");
            return Ok(Vec::new());
        };
        // Email records live on the registered domain, not the www host.
        let root_domain = domain.strip_prefix("www.").unwrap_or(domain);
        info!(target = %root_domain, "Starting DNS probe.");

        let mut opts = ResolverOpts::default();
        opts.timeout = ctx.timeout();
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), opts);

        let lookups = async {
            let (spf, dmarc, dkim, caa) = tokio::join!(
                lookup_spf(&resolver, root_domain),
                lookup_dmarc(&resolver, root_domain),
                lookup_dkim(&resolver, root_domain),
                lookup_caa(&resolver, root_domain)
            );
            DnsRecords { spf, dmarc, dkim, caa }
        };

        let records = tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(ctx.cancelled_error()),
            records = lookups => records,
        };

        if records.all_failed() {
            let reason = records.first_error().unwrap_or("all lookups failed").to_string();
            return Err(ProbeError::Network(reason));
        }

        debug!("All DNS lookups completed, starting analysis.");
        let findings = analyze_dns(&records);
        info!(findings = %findings.len(), "DNS probe finished.");
        Ok(findings)
    }
}

/// Analyzes the collected DNS records. Failed lookups produce no findings.
pub fn analyze_dns(records: &DnsRecords) -> Vec<Finding> {
    let mut findings = Vec::new();

    match &records.dmarc {
        Ok(Some(dmarc)) => {
            if dmarc.policy.as_deref() == Some("none") {
                debug!("DMARC analysis: policy 'none'.");
                findings.push(finding(PROBE_ID, "DNS_DMARC_POLICY_NONE"));
            }
        }
        Ok(None) => {
            debug!("DMARC analysis: no record found.");
            findings.push(finding(PROBE_ID, "DNS_DMARC_MISSING"));
        }
        Err(_) => {}
    }

    match &records.spf {
        Ok(Some(spf)) => {
            if spf.ends_with("~all") {
                findings.push(finding(PROBE_ID, "DNS_SPF_POLICY_SOFTFAIL"));
            } else if spf.ends_with("?all") {
                findings.push(finding(PROBE_ID, "DNS_SPF_POLICY_NEUTRAL"));
            }
        }
        Ok(None) => {
            debug!("SPF analysis: no record found.");
            findings.push(finding(PROBE_ID, "DNS_SPF_MISSING"));
        }
        Err(_) => {}
    }

    if let Ok(None) = &records.dkim {
        findings.push(finding(PROBE_ID, "DNS_DKIM_MISSING"));
    }

    if let Ok(None) = &records.caa {
        findings.push(finding(PROBE_ID, "DNS_CAA_MISSING"));
    }

    findings
}

/// Parses the `p=` tag of a DMARC record.
pub fn dmarc_policy(record: &str) -> Option<String> {
    record
        .split(';')
        .find(|s| s.trim().starts_with("p="))
        .and_then(|s| s.trim().split('=').nth(1))
        .map(|s| s.trim().to_ascii_lowercase())
}

fn is_no_records(e: &ResolveError) -> bool {
    matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

async fn txt_records(resolver: &TokioAsyncResolver, name: &str) -> LookupResult<Vec<String>> {
    match resolver.txt_lookup(name).await {
        Ok(txt) => Ok(Some(txt.iter().map(|r| r.to_string()).collect())),
        Err(e) if is_no_records(&e) => Ok(None),
        Err(e) => {
            warn!(name, error = %e, "TXT lookup failed.");
            Err(format!("DNS error for {name}: {e}"))
        }
    }
}

async fn lookup_spf(resolver: &TokioAsyncResolver, domain: &str) -> LookupResult<String> {
    debug!(domain, "Looking up SPF record.");
    let records = txt_records(resolver, domain).await?;
    Ok(records.and_then(|records| records.into_iter().find(|r| r.starts_with("v=spf1"))))
}

async fn lookup_dmarc(resolver: &TokioAsyncResolver, domain: &str) -> LookupResult<DmarcRecord> {
    let name = format!("_dmarc.{domain}");
    debug!(name = %name, "Looking up DMARC record.");
    let records = txt_records(resolver, &name).await?;
    Ok(records.and_then(|records| {
        records.into_iter().find(|r| r.starts_with("v=DMARC1")).map(|record| DmarcRecord {
            policy: dmarc_policy(&record),
            record,
        })
    }))
}

async fn lookup_dkim(resolver: &TokioAsyncResolver, domain: &str) -> LookupResult<Vec<String>> {
    debug!(domain, "Looking up DKIM records for common selectors.");
    let mut found = Vec::new();
    let mut failures = 0;
    for selector in COMMON_DKIM_SELECTORS {
        let name = format!("{selector}._domainkey.{domain}");
        match txt_records(resolver, &name).await {
            Ok(Some(records)) => {
                found.extend(records.into_iter().filter(|r| r.starts_with("v=DKIM1")).map(|_| selector.to_string()));
            }
            Ok(None) => {}
            Err(_) => failures += 1,
        }
    }

    if !found.is_empty() {
        info!(count = %found.len(), "Found DKIM records.");
        Ok(Some(found))
    } else if failures == COMMON_DKIM_SELECTORS.len() {
        Err(format!("every DKIM selector lookup failed for {domain}"))
    } else {
        Ok(None)
    }
}

async fn lookup_caa(resolver: &TokioAsyncResolver, domain: &str) -> LookupResult<Vec<String>> {
    debug!(domain, "Looking up CAA records.");
    match resolver.lookup(domain, RecordType::CAA).await {
        Ok(lookup) => {
            let records: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
            Ok(if records.is_empty() { None } else { Some(records) })
        }
        Err(e) if is_no_records(&e) => Ok(None),
        Err(e) => {
            warn!(domain, error = %e, "CAA lookup failed.");
            Err(format!("DNS error: {e}"))
        }
    }
}
