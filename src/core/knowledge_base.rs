//! Static, read-only database of every finding a built-in probe can raise,
//! with human-readable explanations and remediation steps.
//! Probes only emit codes; the wording lives here.

use crate::core::models::{Finding, Severity};
use std::fmt;
use tracing::warn;

/// High-level grouping of findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FindingCategory {
    Dns,
    Tls,
    Http,
    Exposure,
    Technology,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingCategory::Dns => write!(f, "DNS Configuration"),
            FindingCategory::Tls => write!(f, "SSL/TLS Certificate"),
            FindingCategory::Http => write!(f, "HTTP Security Headers"),
            FindingCategory::Exposure => write!(f, "Exposed Content"),
            FindingCategory::Technology => write!(f, "Technology Disclosure"),
        }
    }
}

/// All the detailed, human-readable information about a specific finding.
#[derive(Debug)]
pub struct FindingDetail {
    /// Machine-readable identifier (e.g. "DNS_DMARC_MISSING").
    pub code: &'static str,
    /// Short title, used as the finding's vulnerability category.
    pub title: &'static str,
    pub category: FindingCategory,
    pub severity: Severity,
    pub description: &'static str,
    pub remediation: &'static str,
}

static FINDINGS: &[FindingDetail] = &[
    // --- DNS: Email Security & Domain Integrity ---
    FindingDetail {
        code: "DNS_DMARC_MISSING",
        title: "DMARC Record Missing",
        category: FindingCategory::Dns,
        severity: Severity::High,
        description: "DMARC is an email authentication policy that protects your domain from being used for email spoofing and phishing. It tells receiving mail servers how to handle emails that fail authentication checks.",
        remediation: "Add a DMARC record to your domain's DNS settings. Start with a monitoring policy like 'v=DMARC1; p=none;' and gradually move to 'p=quarantine' or 'p=reject' after analyzing reports.",
    },
    FindingDetail {
        code: "DNS_DMARC_POLICY_NONE",
        title: "DMARC Policy is 'none'",
        category: FindingCategory::Dns,
        severity: Severity::Medium,
        description: "Your DMARC policy is in 'monitoring only' mode. It reports fraudulent emails but does not instruct receivers to block or quarantine them, offering no active protection against spoofing.",
        remediation: "After ensuring your legitimate emails pass SPF/DKIM, update your DMARC policy to 'p=quarantine' or 'p=reject' to actively protect your domain.",
    },
    FindingDetail {
        code: "DNS_SPF_MISSING",
        title: "SPF Record Missing",
        category: FindingCategory::Dns,
        severity: Severity::Medium,
        description: "Sender Policy Framework (SPF) lists the servers authorized to send email on behalf of your domain. Without it, attackers can more easily spoof emails from your domain.",
        remediation: "Create a TXT record for your domain that defines your authorized mail servers, e.g. 'v=spf1 include:_spf.google.com ~all'.",
    },
    FindingDetail {
        code: "DNS_SPF_POLICY_SOFTFAIL",
        title: "SPF Policy is 'Softfail'",
        category: FindingCategory::Dns,
        severity: Severity::Info,
        description: "Your SPF record ends with '~all' (softfail): receiving servers should accept but mark suspicious mail, which is weaker than '-all'.",
        remediation: "If the record lists all legitimate mail sources, change the ending from '~all' to '-all'.",
    },
    FindingDetail {
        code: "DNS_SPF_POLICY_NEUTRAL",
        title: "SPF Policy is 'Neutral'",
        category: FindingCategory::Dns,
        severity: Severity::Low,
        description: "Your SPF record ends with '?all' (neutral), which gives receivers no definitive policy and offers no protection.",
        remediation: "Change '?all' to '~all' or, preferably, '-all'.",
    },
    FindingDetail {
        code: "DNS_DKIM_MISSING",
        title: "DKIM Record Missing",
        category: FindingCategory::Dns,
        severity: Severity::Info,
        description: "No DKIM key was found under the common selectors. DKIM signs outgoing mail so receivers can verify it came from your domain unaltered.",
        remediation: "Enable DKIM signing in your email provider and publish the public key as a TXT record at '<selector>._domainkey.<domain>'.",
    },
    FindingDetail {
        code: "DNS_CAA_MISSING",
        title: "CAA Record Missing",
        category: FindingCategory::Dns,
        severity: Severity::Info,
        description: "A Certificate Authority Authorization (CAA) record restricts which CAs may issue certificates for your domain, guarding against mis-issuance.",
        remediation: "Add a CAA record such as '0 issue \"letsencrypt.org\"'.",
    },
    // --- SSL/TLS ---
    FindingDetail {
        code: "TLS_HANDSHAKE_FAILED",
        title: "TLS Handshake Failed",
        category: FindingCategory::Tls,
        severity: Severity::High,
        description: "A TLS connection could not be established even without certificate verification. The server may not speak TLS on this port or only offers obsolete protocols and ciphers.",
        remediation: "Serve HTTPS with a modern TLS configuration (TLS 1.2+) and verify it with a tool such as SSL Labs.",
    },
    FindingDetail {
        code: "TLS_CERT_UNTRUSTED",
        title: "Untrusted TLS Certificate",
        category: FindingCategory::Tls,
        severity: Severity::High,
        description: "The server's certificate failed verification: it may be self-signed, issued by an unknown CA, missing intermediates, or issued for another host name. Browsers will warn users and attackers can impersonate the site more easily.",
        remediation: "Install a certificate from a publicly trusted CA that covers this host name, and serve the full intermediate chain.",
    },
    FindingDetail {
        code: "TLS_NO_CERTIFICATE",
        title: "No TLS Certificate Presented",
        category: FindingCategory::Tls,
        severity: Severity::Medium,
        description: "The TLS handshake completed but the server did not present a certificate.",
        remediation: "Configure the server to present a valid certificate for this host.",
    },
    FindingDetail {
        code: "TLS_CERT_EXPIRED",
        title: "SSL Certificate Expired",
        category: FindingCategory::Tls,
        severity: Severity::Critical,
        description: "The website's certificate is outside its validity period. Browsers show prominent warnings and block access.",
        remediation: "Renew the certificate immediately and automate renewal (e.g. Let's Encrypt / Certbot).",
    },
    FindingDetail {
        code: "TLS_CERT_EXPIRING_SOON",
        title: "SSL Certificate Expiring Soon",
        category: FindingCategory::Tls,
        severity: Severity::Medium,
        description: "The certificate expires in less than 30 days.",
        remediation: "Renew the certificate before it expires and verify that automated renewal works.",
    },
    // --- HTTP Headers ---
    FindingDetail {
        code: "HEADERS_HSTS_MISSING",
        title: "HSTS Header Missing",
        category: FindingCategory::Http,
        severity: Severity::Medium,
        description: "Strict-Transport-Security instructs browsers to only use HTTPS for this site, protecting against protocol downgrade and cookie hijacking.",
        remediation: "Add 'Strict-Transport-Security: max-age=31536000; includeSubDomains'.",
    },
    FindingDetail {
        code: "HEADERS_CSP_MISSING",
        title: "CSP Header Missing",
        category: FindingCategory::Http,
        severity: Severity::Medium,
        description: "Content-Security-Policy limits where scripts, styles and other resources may load from, mitigating Cross-Site Scripting and data injection.",
        remediation: "Add a restrictive Content-Security-Policy and relax it only where needed.",
    },
    FindingDetail {
        code: "HEADERS_X_FRAME_OPTIONS_MISSING",
        title: "Clickjacking Protection Missing",
        category: FindingCategory::Http,
        severity: Severity::Medium,
        description: "Neither X-Frame-Options nor a CSP 'frame-ancestors' directive is set, so the site can be loaded in a hidden iframe for clickjacking.",
        remediation: "Set 'X-Frame-Options: DENY' (or SAMEORIGIN) or a CSP 'frame-ancestors' directive.",
    },
    FindingDetail {
        code: "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING",
        title: "X-Content-Type-Options Missing",
        category: FindingCategory::Http,
        severity: Severity::Low,
        description: "Without this header browsers may MIME-sniff responses, letting a file disguised as an image execute as a script.",
        remediation: "Add 'X-Content-Type-Options: nosniff'.",
    },
    FindingDetail {
        code: "COOKIE_MISSING_SECURE",
        title: "Cookie Without Secure Flag",
        category: FindingCategory::Http,
        severity: Severity::Medium,
        description: "A cookie set over HTTPS lacks the Secure attribute and may be sent over plain HTTP.",
        remediation: "Add the 'Secure' attribute to every cookie served over HTTPS.",
    },
    FindingDetail {
        code: "COOKIE_MISSING_HTTPONLY",
        title: "Cookie Without HttpOnly Flag",
        category: FindingCategory::Http,
        severity: Severity::Low,
        description: "A cookie lacks the HttpOnly attribute and is readable from JavaScript, so an XSS bug can steal it.",
        remediation: "Add 'HttpOnly' to session and authentication cookies.",
    },
    // --- Exposed content ---
    FindingDetail {
        code: "DIRECTORY_LISTING_ENABLED",
        title: "Directory Listing Enabled",
        category: FindingCategory::Exposure,
        severity: Severity::Medium,
        description: "The web server returns an automatically generated index of a directory, revealing file names and possibly backups or private files.",
        remediation: "Disable auto-indexing ('Options -Indexes' on Apache, 'autoindex off' on Nginx) or add an index page.",
    },
    FindingDetail {
        code: "EXPOSED_GIT_REPOSITORY",
        title: "Git Repository Exposed",
        category: FindingCategory::Exposure,
        severity: Severity::Critical,
        description: "The '.git' directory is publicly readable. Attackers can download the full source history, including secrets that were ever committed.",
        remediation: "Block access to '/.git' in the web server and deploy build artifacts rather than working copies.",
    },
    FindingDetail {
        code: "EXPOSED_ENV_FILE",
        title: "Environment File Exposed",
        category: FindingCategory::Exposure,
        severity: Severity::Critical,
        description: "A '.env' file with configuration values is publicly readable. These files typically contain database passwords and API keys.",
        remediation: "Remove the file from the web root, block dotfiles in the server configuration, and rotate every credential it contained.",
    },
    FindingDetail {
        code: "EXPOSED_DS_STORE",
        title: ".DS_Store File Exposed",
        category: FindingCategory::Exposure,
        severity: Severity::Low,
        description: "A macOS '.DS_Store' file is publicly readable and lists the names of files in the directory.",
        remediation: "Delete '.DS_Store' files from the deployment and block dotfiles.",
    },
    FindingDetail {
        code: "EXPOSED_BACKUP_ARCHIVE",
        title: "Backup Archive Exposed",
        category: FindingCategory::Exposure,
        severity: Severity::High,
        description: "A backup archive is downloadable from the web root and may contain source code, databases or credentials.",
        remediation: "Move backups out of the web root and restrict access to them.",
    },
    // --- Technology disclosure ---
    FindingDetail {
        code: "TECH_VERSION_DISCLOSED",
        title: "Software Version Disclosed",
        category: FindingCategory::Technology,
        severity: Severity::Low,
        description: "The site reveals the exact version of a software component, helping attackers pick matching exploits.",
        remediation: "Suppress version banners (e.g. 'server_tokens off', 'expose_php = Off') and remove generator meta tags.",
    },
    FindingDetail {
        code: "TECH_OUTDATED_JQUERY",
        title: "Outdated jQuery",
        category: FindingCategory::Technology,
        severity: Severity::Medium,
        description: "jQuery versions before 3.5.0 are affected by known Cross-Site Scripting issues in HTML manipulation (CVE-2020-11022, CVE-2020-11023).",
        remediation: "Upgrade jQuery to 3.5.0 or later.",
    },
];

/// Retrieves the full detail for a finding code.
pub fn get_finding_detail(code: &str) -> Option<&'static FindingDetail> {
    FINDINGS.iter().find(|f| f.code == code)
}

/// Every known finding code.
pub fn codes() -> impl Iterator<Item = &'static str> {
    FINDINGS.iter().map(|f| f.code)
}

/// Builds the [`Finding`] for `code` as raised by `probe_id`.
pub fn finding(probe_id: &str, code: &str) -> Finding {
    match get_finding_detail(code) {
        Some(detail) => Finding::new(probe_id, detail.code, detail.severity, detail.title)
            .with_description(detail.description)
            .with_recommendation(detail.remediation),
        None => {
            warn!(code, probe_id, "Finding code missing from knowledge base.");
            Finding::new(probe_id, code, Severity::Info, code)
        }
    }
}

/// Like [`finding`], appending a target-specific detail (e.g. the offending URL)
/// to the description.
pub fn finding_with_detail(probe_id: &str, code: &str, detail: &str) -> Finding {
    let base = finding(probe_id, code);
    let description = if base.description().is_empty() {
        detail.to_string()
    } else {
        format!("{} ({})", base.description(), detail)
    };
    base.with_description(description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_unique() {
        let mut seen = HashSet::new();
        for code in codes() {
            assert!(seen.insert(code), "duplicate code {code}");
        }
    }

    #[test]
    fn known_code_carries_full_text() {
        let f = finding("headers", "HEADERS_HSTS_MISSING");
        assert_eq!(f.kind(), "HSTS Header Missing");
        assert_eq!(f.severity(), Severity::Medium);
        assert_eq!(f.probe_id(), "headers");
        assert!(!f.recommendation().is_empty());
    }

    #[test]
    fn unknown_code_degrades_to_info() {
        let f = finding("custom", "SOMETHING_ELSE");
        assert_eq!(f.severity(), Severity::Info);
        assert_eq!(f.kind(), "SOMETHING_ELSE");
    }

    #[test]
    fn detail_is_appended() {
        let f = finding_with_detail("sensitive_files", "EXPOSED_ENV_FILE", "https://example.com/.env");
        assert!(f.description().ends_with("(https://example.com/.env)"));
    }
}
