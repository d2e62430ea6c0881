// src/core/orchestrator.rs

use crate::core::config::ScanConfig;
use crate::core::error::{ProbeError, ScanError};
use crate::core::models::{Finding, ReportAssembly, ScanReport, Target};
use crate::core::probes::{build_http_client, ProbeContext};
use crate::core::registry::{ProbeDescriptor, ProbeRegistry};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ProbeOutcome = (String, Result<Vec<Finding>, ProbeError>);

/// Runs every registered probe against one target and aggregates the results.
///
/// An orchestrator holds no per-scan state, so one instance can drive any
/// number of concurrent scans of different targets.
#[derive(Debug, Clone)]
pub struct ScanOrchestrator {
    config: ScanConfig,
    http: reqwest::Client,
}

impl ScanOrchestrator {
    /// # Errors
    /// Returns [`ScanError::HttpClient`] if the shared HTTP client cannot be built.
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        let http = build_http_client(&config).map_err(ScanError::HttpClient)?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scans `target` with every probe in `registry`.
    ///
    /// Probe failures never fail the scan; they end up in the report's
    /// `probe_errors`. Only an invalid target is an error.
    pub async fn scan(&self, target: &str, registry: &ProbeRegistry) -> Result<ScanReport, ScanError> {
        self.scan_with_cancel(target, registry, CancellationToken::new()).await
    }

    /// Like [`scan`](Self::scan), but `abort` can stop the scan early. An
    /// aborted scan is finalized exactly like one that hit the global deadline.
    pub async fn scan_with_cancel(
        &self,
        target: &str,
        registry: &ProbeRegistry,
        abort: CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let target = Target::parse(target).inspect_err(|e| warn!(error = %e, "Rejected scan target."))?;

        let started = Instant::now();
        let mut assembly = ScanReport::assemble(target.clone(), Utc::now());
        let mut queue: VecDeque<ProbeDescriptor> = registry.all().into();
        let mut pending: Vec<String> = queue.iter().map(|d| d.id().to_string()).collect();
        let max_in_flight = self.config.max_concurrency.max(1);
        info!(
            target = %target,
            probes = queue.len(),
            max_in_flight,
            deadline = ?self.config.scan_deadline,
            "Starting scan."
        );

        let cancel = abort.child_token();
        let deadline = tokio::time::sleep(self.config.scan_deadline);
        tokio::pin!(deadline);

        let mut in_flight: JoinSet<ProbeOutcome> = JoinSet::new();
        let mut interrupted = false;

        loop {
            while in_flight.len() < max_in_flight {
                let Some(descriptor) = queue.pop_front() else { break };
                self.launch(&mut in_flight, descriptor, &target, &cancel);
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(joined) = in_flight.join_next() => match joined {
                    Ok((probe_id, outcome)) => {
                        pending.retain(|id| id != &probe_id);
                        record(&mut assembly, &probe_id, outcome);
                    }
                    Err(e) => error!(error = %e, "Probe task could not be joined."),
                },
                _ = &mut deadline => {
                    warn!(deadline = ?self.config.scan_deadline, unfinished = pending.len(), "Scan deadline reached.");
                    interrupted = true;
                    break;
                }
                _ = cancel.cancelled() => {
                    warn!(unfinished = pending.len(), "Scan aborted.");
                    interrupted = true;
                    break;
                }
            }
        }

        if interrupted {
            cancel.cancel();
            in_flight.abort_all();
        }

        let leftover = if interrupted {
            ProbeError::Timeout { after: started.elapsed() }
        } else {
            ProbeError::InvalidResponse("probe task terminated unexpectedly".to_string())
        };
        for probe_id in &pending {
            assembly.record_failure(probe_id, &leftover);
        }

        let report = assembly.finish(interrupted);
        info!(
            target = %report.target(),
            findings = report.findings().len(),
            errors = report.probe_errors().len(),
            elapsed = ?started.elapsed(),
            "Scan finished."
        );
        Ok(report)
    }

    fn launch(
        &self,
        in_flight: &mut JoinSet<ProbeOutcome>,
        descriptor: ProbeDescriptor,
        target: &Target,
        cancel: &CancellationToken,
    ) {
        let timeout = descriptor.effective_timeout(self.config.probe_timeout);
        let ctx = ProbeContext::new(self.http.clone(), timeout, cancel.child_token());
        let target = target.clone();
        debug!(probe_id = %descriptor.id(), ?timeout, "Launching probe.");

        in_flight.spawn(async move {
            let outcome = run_probe(&descriptor, &target, &ctx).await;
            (descriptor.id().to_string(), outcome)
        });
    }
}

/// Runs one probe under its own timeout, turning a panic into `InvalidResponse`.
async fn run_probe(descriptor: &ProbeDescriptor, target: &Target, ctx: &ProbeContext) -> Result<Vec<Finding>, ProbeError> {
    let run = AssertUnwindSafe(descriptor.probe().run(target, ctx)).catch_unwind();

    match tokio::time::timeout(ctx.timeout(), run).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            error!(probe_id = %descriptor.id(), panic = %message, "Probe panicked.");
            Err(ProbeError::InvalidResponse(format!("probe panicked: {message}")))
        }
        Err(_) => {
            // Lets blocking helpers spawned by the probe notice.
            ctx.cancellation().cancel();
            Err(ProbeError::Timeout { after: ctx.timeout() })
        }
    }
}

fn record(assembly: &mut ReportAssembly, probe_id: &str, outcome: Result<Vec<Finding>, ProbeError>) {
    match outcome {
        Ok(findings) => {
            debug!(probe_id, findings = findings.len(), "Probe completed.");
            assembly.record_success(probe_id, findings);
        }
        Err(e) => {
            warn!(probe_id, error = %e, "Probe failed.");
            assembly.record_failure(probe_id, &e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
