//! Bypass abuse tracker.
//!
//! Manual overrides are an escape hatch and are never blocked. This
//! module keeps an append-only record of them and raises advisory alerts
//! when the same condition keeps triggering overrides, which points at a
//! policy defect rather than a run of independent emergencies.
//!
//! The log is the engine's only shared mutable state. Writers append
//! whole lines under an exclusive file lock and never edit existing
//! records; readers take a point-in-time snapshot and tolerate a record
//! landing a few milliseconds late.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{GatekitError, Result};

/// Trailing window the abuse check looks at
pub const DEFAULT_WINDOW_MINUTES: i64 = 60;

/// Bypass count within the window that triggers the check
pub const DEFAULT_THRESHOLD: usize = 3;

/// One manual override event. Never mutated after being appended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BypassRecord {
    pub timestamp: DateTime<Utc>,
    /// Free-text justification supplied by the operator
    pub reason: String,
    pub branch: String,
}

/// Advisory alert produced by the abuse check. Never blocks anything.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AbuseAlert {
    /// Bypasses observed within the window
    pub count: usize,
    pub window_minutes: i64,
    /// Most-repeated reason when two or more bypasses share the text;
    /// repetition suggests a policy defect
    pub repeated_reason: Option<String>,
    pub message: String,
}

/// Tracker state derived from the trailing window. Decays back to
/// `Normal` on its own once the window slides past the triggering
/// events; there is no manual reset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackerState {
    Normal,
    Elevated,
}

/// Append-only bypass log backed by a JSONL file.
pub struct BypassLog {
    path: PathBuf,
}

impl BypassLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a bypass at the current time and run the abuse check.
    pub fn record(&self, reason: &str, branch: &str) -> Result<Option<AbuseAlert>> {
        self.record_at(Utc::now(), reason, branch)
    }

    /// Record a bypass with an explicit timestamp and run the abuse
    /// check against that same instant.
    pub fn record_at(
        &self,
        timestamp: DateTime<Utc>,
        reason: &str,
        branch: &str,
    ) -> Result<Option<AbuseAlert>> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| GatekitError::BypassWrite {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let record = BypassRecord {
            timestamp,
            reason: reason.to_string(),
            branch: branch.to_string(),
        };
        let mut line =
            serde_json::to_string(&record).map_err(|source| GatekitError::BypassSerialize { source })?;
        line.push('\n');

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| GatekitError::BypassWrite {
                path: self.path.clone(),
                source,
            })?;
        file.lock_exclusive().map_err(|source| GatekitError::BypassWrite {
            path: self.path.clone(),
            source,
        })?;
        let mut writer = &file;
        writer
            .write_all(line.as_bytes())
            .map_err(|source| GatekitError::BypassWrite {
                path: self.path.clone(),
                source,
            })?;
        drop(file);

        self.check_abuse_at(
            timestamp,
            Duration::minutes(DEFAULT_WINDOW_MINUTES),
            DEFAULT_THRESHOLD,
        )
    }

    /// Run the abuse check against the current time with defaults.
    pub fn check_abuse(&self) -> Result<Option<AbuseAlert>> {
        self.check_abuse_at(
            Utc::now(),
            Duration::minutes(DEFAULT_WINDOW_MINUTES),
            DEFAULT_THRESHOLD,
        )
    }

    /// Count bypasses in the trailing window ending at `now`. At or
    /// above `threshold`, cluster by reason text: a cluster of two or
    /// more marks the alert as a likely policy defect.
    pub fn check_abuse_at(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        threshold: usize,
    ) -> Result<Option<AbuseAlert>> {
        let cutoff = now - window;
        let recent: Vec<BypassRecord> = self
            .snapshot()?
            .into_iter()
            .filter(|record| record.timestamp > cutoff && record.timestamp <= now)
            .collect();
        if recent.len() < threshold {
            return Ok(None);
        }

        let mut clusters: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &recent {
            *clusters.entry(record.reason.as_str()).or_default() += 1;
        }
        let repeated = clusters
            .iter()
            .filter(|&(_, &count)| count >= 2)
            .max_by_key(|&(_, &count)| count)
            .map(|(reason, _)| (*reason).to_string());

        let count = recent.len();
        let minutes = window.num_minutes();
        let message = match &repeated {
            Some(reason) => {
                let shared = clusters[reason.as_str()];
                format!(
                    "{count} bypasses in the last {minutes} minutes; {shared} share the reason \
                     \"{reason}\". The same condition keeps triggering overrides, which suggests \
                     a policy defect rather than independent emergencies."
                )
            }
            None => format!("{count} bypasses in the last {minutes} minutes"),
        };
        tracing::warn!(
            count,
            repeated_reason = repeated.as_deref().unwrap_or("-"),
            "bypass abuse check raised an alert"
        );
        Ok(Some(AbuseAlert {
            count,
            window_minutes: minutes,
            repeated_reason: repeated,
            message,
        }))
    }

    /// Tracker state for the trailing window ending at `now`.
    pub fn state_at(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        threshold: usize,
    ) -> Result<TrackerState> {
        let cutoff = now - window;
        let count = self
            .snapshot()?
            .into_iter()
            .filter(|record| record.timestamp > cutoff && record.timestamp <= now)
            .count();
        Ok(if count >= threshold {
            TrackerState::Elevated
        } else {
            TrackerState::Normal
        })
    }

    /// Prune records older than `retain`, rewriting the file via a
    /// temporary and a rename. Existing records are never edited, only
    /// dropped wholesale by age. Returns the number pruned.
    ///
    /// Intended as an occasional maintenance call, not part of the
    /// record/check hot path.
    pub fn compact(&self, now: DateTime<Utc>, retain: Duration) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let file = File::open(&self.path).map_err(|source| GatekitError::BypassRead {
            path: self.path.clone(),
            source,
        })?;
        file.lock_exclusive().map_err(|source| GatekitError::BypassWrite {
            path: self.path.clone(),
            source,
        })?;

        let records = read_records(&file, &self.path)?;
        let cutoff = now - retain;
        let kept: Vec<&BypassRecord> = records.iter().filter(|r| r.timestamp > cutoff).collect();
        let pruned = records.len() - kept.len();
        if pruned == 0 {
            return Ok(0);
        }

        let mut contents = String::new();
        for record in kept {
            let line = serde_json::to_string(record)
                .map_err(|source| GatekitError::BypassSerialize { source })?;
            contents.push_str(&line);
            contents.push('\n');
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(|source| GatekitError::BypassWrite {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| GatekitError::BypassWrite {
            path: self.path.clone(),
            source,
        })?;
        Ok(pruned)
    }

    /// Point-in-time snapshot of the log.
    fn snapshot(&self) -> Result<Vec<BypassRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|source| GatekitError::BypassRead {
            path: self.path.clone(),
            source,
        })?;
        file.lock_shared().map_err(|source| GatekitError::BypassRead {
            path: self.path.clone(),
            source,
        })?;
        read_records(&file, &self.path)
    }
}

fn read_records(file: &File, path: &Path) -> Result<Vec<BypassRecord>> {
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| GatekitError::BypassRead {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            // A torn line can appear if a snapshot races a concurrent
            // append; tolerated, the record shows up on the next read.
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed bypass log line");
            }
        }
    }
    Ok(records)
}
