// src/core/mod.rs

// Root of the scanning engine. Everything the CLI needs is re-exported here.

/// Data structures shared across the engine, such as `Target`, `Finding`
/// and `ScanReport`.
pub mod models;

/// Error types returned by the engine.
pub mod error;

/// Scan-wide defaults and tunables.
pub mod config;

/// Static table of finding codes with their titles, severities and
/// recommendations. Probes emit codes and this module turns them into
/// findings.
pub mod knowledge_base;

/// The `Probe` trait and the built-in probes.
pub mod probes;

pub mod registry;

/// Bounded-concurrency dispatch of probes against a target.
pub mod orchestrator;

/// File-backed persistence of scan reports.
pub mod store;

pub use config::ScanConfig;
pub use error::{InvalidTarget, ProbeError, ScanError, StoreError};
pub use models::{Finding, ReportSummary, ScanReport, Severity, Target};
pub use orchestrator::ScanOrchestrator;
pub use probes::{Probe, ProbeContext};
pub use registry::{ProbeDescriptor, ProbeRegistry};
pub use store::{ReportId, ResultStore};
