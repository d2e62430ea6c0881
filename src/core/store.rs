// src/core/store.rs

use crate::core::error::StoreError;
use crate::core::models::{ReportSummary, ScanReport};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Version of the on-disk report layout. Adding optional fields does not bump it.
pub const SCHEMA_VERSION: u32 = 1;

const ID_PREFIX: &str = "scan_";
const FILE_EXTENSION: &str = "json";
/// Attempts at publishing a report before giving up on id collisions with other processes.
const MAX_PUBLISH_ATTEMPTS: usize = 32;

static RE_REPORT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^scan_\d{8}_\d{6}_\d{6}_\d{6}$").unwrap());

/// Store-assigned identifier, e.g. `scan_20261019_142501_123456_000000`.
///
/// Ids sort lexicographically in save order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportId(String);

impl ReportId {
    /// Accepts only ids this store generates, so an id can never name a path
    /// outside the store directory and unrelated `scan_*` files are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        RE_REPORT_ID.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct StoredReportRef<'a> {
    schema_version: u32,
    #[serde(flatten)]
    report: &'a ScanReport,
}

#[derive(Deserialize)]
struct StoredReport {
    schema_version: u32,
    #[serde(flatten)]
    report: ScanReport,
}

/// Hands out strictly increasing ids even when the clock stalls or steps back.
#[derive(Debug, Default)]
struct IdClock {
    last_stamp: String,
    seq: u32,
}

impl IdClock {
    fn next(&mut self, now: DateTime<Utc>) -> ReportId {
        let stamp = now.format("%Y%m%d_%H%M%S_%6f").to_string();
        if stamp > self.last_stamp {
            self.last_stamp = stamp;
            self.seq = 0;
        } else {
            self.seq += 1;
        }
        ReportId(format!("{ID_PREFIX}{}_{:06}", self.last_stamp, self.seq))
    }

    /// Continues after an id that already exists on disk.
    fn observe(&mut self, id: &ReportId) {
        let Some(rest) = id.0.strip_prefix(ID_PREFIX) else { return };
        let Some((stamp, seq)) = rest.rsplit_once('_') else { return };
        let Ok(seq) = seq.parse::<u32>() else { return };
        if stamp > self.last_stamp.as_str() || (stamp == self.last_stamp && seq > self.seq) {
            self.last_stamp = stamp.to_string();
            self.seq = seq;
        }
    }
}

/// File-backed persistence of scan reports, one JSON file per report.
#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    clock: Mutex<IdClock>,
}

impl ResultStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::WriteFailed { path: dir.clone(), source })?;

        let mut clock = IdClock::default();
        if let Some(newest) = Self::stored_ids(&dir)?.into_iter().max() {
            clock.observe(&newest);
        }

        debug!(dir = %dir.display(), "Result store opened.");
        Ok(Self { dir, clock: Mutex::new(clock) })
    }

    /// `<platform data dir>/scans`.
    pub fn default_dir() -> PathBuf {
        crate::logging::get_data_dir().join("scans")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `report` atomically and returns its new id.
    ///
    /// The report is written to a temporary file in the store directory and
    /// then published under its final name without overwriting anything, so
    /// readers either see the whole report or nothing.
    ///
    /// # Errors
    /// [`StoreError::WriteFailed`] if the report cannot be written. The caller
    /// still owns `report` and can keep using it.
    pub fn save(&self, report: &ScanReport) -> Result<ReportId, StoreError> {
        let stored = StoredReportRef { schema_version: SCHEMA_VERSION, report };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| StoreError::WriteFailed { path: self.dir.clone(), source: io::Error::other(e) })?;

        let write_failed = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::WriteFailed { path, source }
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_failed(&self.dir))?;
        tmp.write_all(&bytes).map_err(write_failed(tmp.path()))?;
        tmp.as_file().sync_all().map_err(write_failed(tmp.path()))?;

        for _ in 0..MAX_PUBLISH_ATTEMPTS {
            let id = self.next_id();
            let path = self.path_for(&id);
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    info!(id = %id, target = %report.target(), "Report saved.");
                    return Ok(id);
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(id = %id, "Report id already taken on disk, retrying.");
                    tmp = e.file;
                }
                Err(e) => return Err(StoreError::WriteFailed { path, source: e.error }),
            }
        }

        Err(StoreError::WriteFailed {
            path: self.dir.clone(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "could not reserve a unique report id"),
        })
    }

    /// Loads the report saved under `id`.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for ids that are malformed or unknown.
    pub fn get(&self, id: &str) -> Result<ScanReport, StoreError> {
        let id = ReportId::parse(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.load(&id)
    }

    /// Summaries of the `limit` most recently saved reports, newest first.
    /// Unreadable files are skipped.
    pub fn list(&self, limit: usize) -> Result<Vec<ReportSummary>, StoreError> {
        let mut ids = Self::stored_ids(&self.dir)?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut summaries = Vec::with_capacity(limit.min(ids.len()));
        for id in ids {
            if summaries.len() >= limit {
                break;
            }
            match self.load(&id) {
                Ok(report) => summaries.push(ReportSummary::of(id.as_str(), &report)),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable report."),
            }
        }
        Ok(summaries)
    }

    fn load(&self, id: &ReportId) -> Result<ScanReport, StoreError> {
        let path = self.path_for(id);
        let raw = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
            _ => StoreError::ReadFailed { path: path.clone(), source },
        })?;

        let stored: StoredReport =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt { path: path.clone(), reason: e.to_string() })?;
        if stored.schema_version > SCHEMA_VERSION {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("schema version {} is newer than supported {SCHEMA_VERSION}", stored.schema_version),
            });
        }
        Ok(stored.report)
    }

    fn next_id(&self) -> ReportId {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).next(Utc::now())
    }

    fn path_for(&self, id: &ReportId) -> PathBuf {
        self.dir.join(format!("{id}.{FILE_EXTENSION}"))
    }

    fn stored_ids(dir: &Path) -> Result<Vec<ReportId>, StoreError> {
        let entries = fs::read_dir(dir).map_err(|source| StoreError::ReadFailed { path: dir.to_path_buf(), source })?;
        Ok(entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let stem = name.to_str()?.strip_suffix(&format!(".{FILE_EXTENSION}"))?.to_string();
                ReportId::parse(&stem)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn id_clock_is_monotonic_within_one_tick() {
        let mut clock = IdClock::default();
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 14, 25, 1).unwrap();
        let a = clock.next(now);
        let b = clock.next(now);
        assert!(b > a);
        assert_eq!(a.as_str(), "scan_20261019_142501_000000_000000");
        assert_eq!(b.as_str(), "scan_20261019_142501_000000_000001");
    }

    #[test]
    fn id_clock_survives_clock_going_backwards() {
        let mut clock = IdClock::default();
        let later = Utc.with_ymd_and_hms(2026, 10, 19, 14, 25, 1).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 10, 19, 14, 0, 0).unwrap();
        let a = clock.next(later);
        let b = clock.next(earlier);
        assert!(b > a);
    }

    #[test]
    fn observed_ids_are_continued() {
        let mut clock = IdClock::default();
        clock.observe(&ReportId::parse("scan_20991231_235959_999999_000004").unwrap());
        let next = clock.next(Utc::now());
        assert_eq!(next.as_str(), "scan_20991231_235959_999999_000005");
    }

    #[test]
    fn report_ids_reject_paths() {
        assert!(ReportId::parse("scan_20261019_142501_000000_000000").is_some());
        assert!(ReportId::parse("../scan_1").is_none());
        assert!(ReportId::parse("scan_1/../../etc").is_none());
        assert!(ReportId::parse("scan_").is_none());
        assert!(ReportId::parse("other_1").is_none());
        assert!(ReportId::parse("scan_manual_1").is_none());
        assert!(ReportId::parse("scan_20261019_142501_000000").is_none());
        assert!(ReportId::parse("scan_20261019_142501_000000_000000.json").is_none());
    }
}
