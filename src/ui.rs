// src/ui.rs

use crate::core::knowledge_base::{self, FindingCategory};
use crate::core::models::{Finding, ProbeErrorKind, ReportSummary, ScanReport, Severity};
use crate::core::store::ReportId;
use crossterm::style::{StyledContent, Stylize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use strum::IntoEnumIterator;

/// High-level overview of a report: a 0-100 score and issue counts.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub score: u8,
    pub counts: BTreeMap<Severity, usize>,
}

impl ScanSummary {
    pub fn of(report: &ScanReport) -> Self {
        let penalty: usize = report.findings().iter().map(|f| penalty(f.severity())).sum();
        let score = 100_usize.saturating_sub(penalty) as u8;
        let counts = Severity::iter().map(|s| (s, report.count_by_severity(s))).collect();
        Self { score, counts }
    }

    pub fn rating(&self) -> &'static str {
        match self.score {
            90..=100 => "Excellent",
            75..=89 => "Good",
            50..=74 => "Needs Improvement",
            _ => "Poor",
        }
    }

    fn styled_score(&self) -> StyledContent<String> {
        let text = format!("{}/100 ({})", self.score, self.rating());
        match self.score {
            90..=100 => text.green(),
            75..=89 => text.cyan(),
            50..=74 => text.yellow(),
            _ => text.red(),
        }
    }
}

fn penalty(severity: Severity) -> usize {
    match severity {
        Severity::Critical => 15,
        Severity::High => 10,
        Severity::Medium => 5,
        Severity::Low => 2,
        Severity::Info => 0,
    }
}

fn severity_label(severity: Severity) -> StyledContent<String> {
    paint(severity, format!("[{severity}]"))
}

fn paint(severity: Severity, label: String) -> StyledContent<String> {
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.cyan(),
        Severity::Info => label.dark_grey(),
    }
}

/// Writes a full, human-readable rendering of `report`.
pub fn write_report<W: Write>(out: &mut W, report: &ScanReport, saved_as: Option<&ReportId>) -> io::Result<()> {
    writeln!(out, "{} {}", "Scan of".bold(), report.target().to_string().bold().underlined())?;
    writeln!(out, "  scan id   {}", report.id())?;
    if let Some(id) = saved_as {
        writeln!(out, "  saved as  {}", id.to_string().cyan())?;
    }
    writeln!(out, "  started   {}", report.started_at().format("%Y-%m-%d %H:%M:%S UTC"))?;
    let millis = report.duration().num_milliseconds().max(0);
    writeln!(out, "  duration  {:.1}s", millis as f64 / 1000.0)?;
    if report.interrupted() {
        writeln!(out, "  status    {}", "interrupted before every probe finished".yellow())?;
    }
    writeln!(out)?;

    let summary = ScanSummary::of(report);
    writeln!(out, "{} {}", "Score:".bold(), summary.styled_score())?;
    let counts: Vec<String> = Severity::iter()
        .rev()
        .map(|s| format!("{s} {}", summary.counts.get(&s).copied().unwrap_or_default()))
        .collect();
    writeln!(out, "  {}", counts.join("  "))?;
    writeln!(out)?;

    write_findings(out, report.findings())?;
    write_probes(out, report)
}

fn write_findings<W: Write>(out: &mut W, findings: &[Finding]) -> io::Result<()> {
    if findings.is_empty() {
        writeln!(out, "{}", "✓ No issues found.".green())?;
        return writeln!(out);
    }

    let mut groups: BTreeMap<Option<FindingCategory>, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        let category = knowledge_base::get_finding_detail(finding.code()).map(|d| d.category);
        groups.entry(category).or_default().push(finding);
    }
    // Codes unknown to the knowledge base go last.
    let other = groups.remove(&None);
    let named = groups.into_iter().filter_map(|(c, f)| c.map(|c| (c.to_string(), f)));

    for (title, mut group) in named.chain(other.map(|f| ("Other".to_string(), f))) {
        group.sort_by_key(|f| std::cmp::Reverse(f.severity()));
        writeln!(out, "{}", title.bold().underlined())?;
        for finding in group {
            writeln!(out, "  {} {}", severity_label(finding.severity()), finding.kind())?;
            if !finding.description().is_empty() {
                writeln!(out, "      {}", finding.description())?;
            }
            if !finding.recommendation().is_empty() {
                writeln!(out, "      {} {}", "Fix:".green(), finding.recommendation())?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_probes<W: Write>(out: &mut W, report: &ScanReport) -> io::Result<()> {
    writeln!(out, "{}", "Probes".bold().underlined())?;
    for probe_id in report.completed_probes() {
        writeln!(out, "  {} {probe_id}", "✓".green())?;
    }
    for (probe_id, failure) in report.probe_errors() {
        let mark = match failure.kind {
            ProbeErrorKind::Timeout => "⏱".yellow(),
            ProbeErrorKind::NetworkError | ProbeErrorKind::InvalidResponse => "✗".red(),
        };
        writeln!(out, "  {mark} {probe_id}: {}", failure.message)?;
    }
    Ok(())
}

/// Writes one line per saved report, newest first as given.
pub fn write_history<W: Write>(out: &mut W, summaries: &[ReportSummary]) -> io::Result<()> {
    if summaries.is_empty() {
        return writeln!(out, "No saved scans yet.");
    }

    writeln!(
        out,
        "{}",
        format!("{:<34} {:<20} {:>8} {:>6} {:<8} {}", "ID", "STARTED", "FINDINGS", "ERRORS", "HIGHEST", "TARGET").bold()
    )?;
    for summary in summaries {
        let highest = match summary.highest_severity {
            Some(severity) => paint(severity, format!("{:<8}", format!("[{severity}]"))),
            None => format!("{:<8}", "-").dark_grey(),
        };
        writeln!(
            out,
            "{:<34} {:<20} {:>8} {:>6} {:<8} {}",
            summary.id,
            summary.started_at.format("%Y-%m-%d %H:%M:%S"),
            summary.finding_count,
            summary.error_count,
            highest,
            summary.target
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProbeError;
    use crate::core::models::Target;
    use chrono::Utc;
    use std::time::Duration;

    fn sample_report() -> ScanReport {
        let target = Target::parse("https://example.com").unwrap();
        let mut assembly = ScanReport::assemble(target, Utc::now());
        assembly.record_success(
            "headers",
            vec![
                knowledge_base::finding("headers", "HEADERS_CSP_MISSING"),
                knowledge_base::finding("headers", "HEADERS_HSTS_MISSING"),
            ],
        );
        assembly.record_success("sensitive_files", vec![knowledge_base::finding("sensitive_files", "EXPOSED_ENV_FILE")]);
        assembly.record_failure("tls", &ProbeError::Timeout { after: Duration::from_secs(10) });
        assembly.finish(false)
    }

    fn render(report: &ScanReport) -> String {
        let mut out = Vec::new();
        write_report(&mut out, report, None).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn score_penalizes_by_severity() {
        let summary = ScanSummary::of(&sample_report());
        assert_eq!(summary.score, 75);
        assert_eq!(summary.rating(), "Good");
        assert_eq!(summary.counts[&Severity::Critical], 1);
        assert_eq!(summary.counts[&Severity::Medium], 2);
        assert_eq!(summary.counts[&Severity::Info], 0);
    }

    #[test]
    fn clean_report_scores_full_marks() {
        let target = Target::parse("https://example.com").unwrap();
        let mut assembly = ScanReport::assemble(target, Utc::now());
        assembly.record_success("headers", Vec::new());
        let summary = ScanSummary::of(&assembly.finish(false));
        assert_eq!(summary.score, 100);
        assert_eq!(summary.rating(), "Excellent");
    }

    #[test]
    fn report_groups_findings_by_category() {
        let text = render(&sample_report());
        assert!(text.contains("HTTP Security Headers"));
        assert!(text.contains("Exposed Content"));
        assert!(text.contains("Environment File Exposed"));
        assert!(text.contains("tls: timed out after 10s"));
    }

    #[test]
    fn empty_history_says_so() {
        let mut out = Vec::new();
        write_history(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "No saved scans yet.");
    }
}
