// src/core/probes/tls.rs

use tracing::{debug, error, info};

use crate::core::error::ProbeError;
use crate::core::knowledge_base::{finding, finding_with_detail};
use crate::core::models::{Finding, Target};
use crate::core::probes::{Probe, ProbeContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::{HandshakeError, TlsConnector};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tokio::task::spawn_blocking;
use url::Host;
use x509_parser::prelude::*;

pub const PROBE_ID: &str = "tls";

/// Certificates expiring within this many days are flagged.
const EXPIRY_WARNING_DAYS: i64 = 30;

/// Inspects the TLS handshake and the certificate served on the HTTPS port.
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// What the handshake attempts revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsOutcome {
    /// Verified handshake; the certificate if the server sent one.
    Trusted(Option<CertificateInfo>),
    /// Verification failed but an unverified handshake succeeded.
    Untrusted { reason: String, certificate: Option<CertificateInfo> },
    /// No handshake possible at all.
    HandshakeFailed(String),
}

enum AttemptError {
    /// The TLS layer rejected the connection; this is a property of the target.
    Tls(String),
    Probe(ProbeError),
}

#[async_trait]
impl Probe for TlsProbe {
    fn id(&self) -> &str {
        PROBE_ID
    }

    async fn run(&self, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
        let host = connect_host(target);
        let port = if target.is_https() { target.url().port_or_known_default().unwrap_or(443) } else { 443 };
        info!(host = %host, port, "Starting TLS probe.");

        // native-tls is blocking. The socket timeouts bound the blocking thread
        // after the probe itself has been cancelled.
        let timeout = ctx.timeout();
        debug!("Spawning blocking task for TLS connection.");
        let handle = spawn_blocking(move || inspect_tls(&host, port, timeout));

        let outcome = tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(ctx.cancelled_error()),
            joined = handle => joined.unwrap_or_else(|e| {
                error!(panic = %e, "Blocking TLS task panicked!");
                Err(ProbeError::InvalidResponse(format!("TLS task panicked: {e}")))
            }),
        }?;

        let findings = analyze_tls(&outcome, Utc::now());
        info!(findings = %findings.len(), "TLS probe finished.");
        Ok(findings)
    }
}

/// Host name (or bare IP) suitable for both TCP connect and SNI.
fn connect_host(target: &Target) -> String {
    match target.url().host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        None => target.host().to_string(),
    }
}

/// Tries a verified handshake first, then an unverified one to still reach the certificate.
fn inspect_tls(host: &str, port: u16, timeout: Duration) -> Result<TlsOutcome, ProbeError> {
    match handshake(host, port, timeout, true) {
        Ok(certificate) => Ok(TlsOutcome::Trusted(certificate)),
        Err(AttemptError::Tls(reason)) => {
            debug!(reason = %reason, "Verified handshake failed, retrying without verification.");
            match handshake(host, port, timeout, false) {
                Ok(certificate) => Ok(TlsOutcome::Untrusted { reason, certificate }),
                Err(AttemptError::Tls(reason)) => Ok(TlsOutcome::HandshakeFailed(reason)),
                Err(AttemptError::Probe(e)) => Err(e),
            }
        }
        Err(AttemptError::Probe(e)) => Err(e),
    }
}

fn handshake(host: &str, port: u16, timeout: Duration, verify: bool) -> Result<Option<CertificateInfo>, AttemptError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| AttemptError::Probe(ProbeError::Network(format!("cannot resolve {host}: {e}"))))?
        .next()
        .ok_or_else(|| AttemptError::Probe(ProbeError::Network(format!("no address for {host}"))))?;

    debug!(%addr, verify, "Connecting TCP stream.");
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        AttemptError::Probe(match e.kind() {
            std::io::ErrorKind::TimedOut => ProbeError::Timeout { after: timeout },
            _ => ProbeError::Network(format!("TCP connection error: {e}")),
        })
    })?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| AttemptError::Probe(ProbeError::Network(e.to_string())))?;

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(!verify)
        .danger_accept_invalid_hostnames(!verify)
        .build()
        .map_err(|e| AttemptError::Probe(ProbeError::Network(format!("TlsConnector error: {e}"))))?;

    debug!(host, "Performing TLS handshake.");
    let stream = match connector.connect(host, stream) {
        Ok(s) => s,
        Err(HandshakeError::Failure(e)) => return Err(AttemptError::Tls(e.to_string())),
        Err(HandshakeError::WouldBlock(_)) => {
            return Err(AttemptError::Probe(ProbeError::Timeout { after: timeout }));
        }
    };

    let cert = match stream.peer_certificate() {
        Ok(Some(c)) => c,
        Ok(None) => {
            debug!("TLS connection successful, but no peer certificate provided.");
            return Ok(None);
        }
        Err(e) => {
            return Err(AttemptError::Probe(ProbeError::InvalidResponse(format!(
                "could not get peer certificate: {e}"
            ))));
        }
    };

    let cert_der = cert
        .to_der()
        .map_err(|e| AttemptError::Probe(ProbeError::InvalidResponse(format!("could not convert certificate to DER: {e}"))))?;

    let (_, x509) = parse_x509_certificate(&cert_der)
        .map_err(|e| AttemptError::Probe(ProbeError::InvalidResponse(format!("X.509 parse error: {e}"))))?;

    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Parsed certificate.");
    let validity = x509.validity();
    Ok(Some(CertificateInfo {
        subject_name: x509.subject().to_string(),
        issuer_name: x509.issuer().to_string(),
        not_before: asn1_time_to_chrono_utc(&validity.not_before),
        not_after: asn1_time_to_chrono_utc(&validity.not_after),
    }))
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

pub fn analyze_tls(outcome: &TlsOutcome, now: DateTime<Utc>) -> Vec<Finding> {
    let mut findings = Vec::new();

    let certificate = match outcome {
        TlsOutcome::HandshakeFailed(reason) => {
            findings.push(finding_with_detail(PROBE_ID, "TLS_HANDSHAKE_FAILED", reason));
            return findings;
        }
        TlsOutcome::Untrusted { reason, certificate } => {
            findings.push(finding_with_detail(PROBE_ID, "TLS_CERT_UNTRUSTED", reason));
            certificate
        }
        TlsOutcome::Trusted(certificate) => certificate,
    };

    let Some(cert) = certificate else {
        findings.push(finding(PROBE_ID, "TLS_NO_CERTIFICATE"));
        return findings;
    };

    if now < cert.not_before || now > cert.not_after {
        debug!(expiry_date = %cert.not_after, "Certificate outside its validity period.");
        findings.push(finding_with_detail(PROBE_ID, "TLS_CERT_EXPIRED", &format!("valid until {}", cert.not_after)));
        return findings;
    }

    let days_left = cert.not_after.signed_duration_since(now).num_days();
    if days_left <= EXPIRY_WARNING_DAYS {
        debug!(days_left, "Certificate is expiring soon.");
        findings.push(finding_with_detail(PROBE_ID, "TLS_CERT_EXPIRING_SOON", &format!("{days_left} days left")));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::probes::test_support;
    use chrono::Duration as ChronoDuration;

    fn cert(now: DateTime<Utc>, days_left: i64) -> CertificateInfo {
        CertificateInfo {
            subject_name: "CN=example.com".into(),
            issuer_name: "CN=Example CA".into(),
            not_before: now - ChronoDuration::days(60),
            not_after: now + ChronoDuration::days(days_left),
        }
    }

    fn codes(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(Finding::code).collect()
    }

    #[test]
    fn healthy_certificate_is_clean() {
        let now = Utc::now();
        let outcome = TlsOutcome::Trusted(Some(cert(now, 200)));
        assert!(analyze_tls(&outcome, now).is_empty());
    }

    #[test]
    fn expiring_certificate_is_flagged() {
        let now = Utc::now();
        let outcome = TlsOutcome::Trusted(Some(cert(now, 10)));
        assert_eq!(codes(&analyze_tls(&outcome, now)), vec!["TLS_CERT_EXPIRING_SOON"]);
    }

    #[test]
    fn untrusted_and_expired_are_both_reported() {
        let now = Utc::now();
        let outcome = TlsOutcome::Untrusted { reason: "certificate has expired".into(), certificate: Some(cert(now, -3)) };
        assert_eq!(codes(&analyze_tls(&outcome, now)), vec!["TLS_CERT_UNTRUSTED", "TLS_CERT_EXPIRED"]);
    }

    #[test]
    fn handshake_failure_short_circuits() {
        let outcome = TlsOutcome::HandshakeFailed("unexpected EOF".into());
        assert_eq!(codes(&analyze_tls(&outcome, Utc::now())), vec!["TLS_HANDSHAKE_FAILED"]);
    }

    #[test]
    fn missing_certificate_is_reported() {
        let outcome = TlsOutcome::Trusted(None);
        assert_eq!(codes(&analyze_tls(&outcome, Utc::now())), vec!["TLS_NO_CERTIFICATE"]);
    }

    #[tokio::test]
    async fn closed_port_is_a_network_error() {
        let target = Target::parse("https://127.0.0.1:9/").unwrap();
        let result = TlsProbe.run(&target, &test_support::context()).await;
        assert!(matches!(result, Err(ProbeError::Network(_))));
    }
}
