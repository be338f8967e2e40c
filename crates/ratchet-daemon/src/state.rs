//! On-disk layout of the state directory.

use directories::ProjectDirs;
use ratchet_engine::TickReport;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{DaemonError, Result};

/// Manages the state directory: config, store snapshot, stats and run log.
///
/// Tick reports are stored as JSON files in `runs/`, named so that
/// lexical order is chronological.
#[derive(Debug, Clone)]
pub struct StateDir {
    /// Base directory.
    base_path: PathBuf,
    /// Directory for tick reports.
    runs_path: PathBuf,
}

impl StateDir {
    /// Opens the state directory at `base_path`.
    ///
    /// Creates the necessary subdirectories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn new(base_path: PathBuf) -> Result<Self> {
        let runs_path = base_path.join("runs");

        for path in [&base_path, &runs_path] {
            if !path.exists() {
                fs::create_dir_all(path).map_err(|e| DaemonError::CreateDir {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }

        Ok(Self {
            base_path,
            runs_path,
        })
    }

    /// Returns the default state directory.
    ///
    /// - Linux: `~/.local/share/ratchet/`
    /// - macOS: `~/Library/Application Support/ratchet/`
    /// - Windows: `C:\Users\<User>\AppData\Roaming\ratchet\`
    ///
    /// Falls back to `~/.ratchet/`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "ratchet").map_or_else(dirs_fallback, |proj_dirs| {
            proj_dirs.data_dir().to_path_buf()
        })
    }

    /// Opens the state directory at the default path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn with_default_path() -> Result<Self> {
        Self::new(Self::default_path())
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Returns the run log directory.
    #[must_use]
    pub fn runs_path(&self) -> &Path {
        &self.runs_path
    }

    /// Store snapshot used when the config names none.
    #[must_use]
    pub fn default_store_path(&self) -> PathBuf {
        self.base_path.join("store.json")
    }

    /// Cumulative scheduler statistics.
    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.base_path.join("stats.json")
    }

    /// Returns the path a tick report is stored under.
    #[must_use]
    pub fn tick_report_path(&self, report: &TickReport) -> PathBuf {
        self.runs_path.join(format!(
            "{}-{}.json",
            report.started_at.format("%Y%m%dT%H%M%S%.3fZ"),
            report.worker
        ))
    }

    /// Saves a tick report to the run log.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be serialized or written.
    pub fn save_tick_report(&self, report: &TickReport) -> Result<PathBuf> {
        let path = self.tick_report_path(report);
        let json = serde_json::to_string_pretty(report)?;

        fs::write(&path, json).map_err(|e| DaemonError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Lists up to `limit` tick reports, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the run log cannot be read.
    pub fn list_tick_reports(&self, limit: usize) -> Result<Vec<TickReport>> {
        let mut reports = Vec::new();

        for path in self.report_files()?.into_iter().rev().take(limit) {
            let content = fs::read_to_string(&path).map_err(|e| DaemonError::ReadFile {
                path: path.clone(),
                source: e,
            })?;

            match serde_json::from_str::<TickReport>(&content) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable tick report");
                }
            }
        }

        Ok(reports)
    }

    /// Deletes all but the newest `keep` tick reports. Returns how many were
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the run log cannot be read or a file cannot be
    /// deleted.
    pub fn prune_tick_reports(&self, keep: usize) -> Result<usize> {
        let files = self.report_files()?;
        let excess = files.len().saturating_sub(keep);

        for path in &files[..excess] {
            fs::remove_file(path).map_err(|e| DaemonError::DeleteFile {
                path: path.clone(),
                source: e,
            })?;
        }

        Ok(excess)
    }

    /// Report files, oldest first.
    fn report_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.runs_path).map_err(|e| DaemonError::ReadDir {
            path: self.runs_path.clone(),
            source: e,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DaemonError::ReadDir {
                path: self.runs_path.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Fallback for determining home directory.
fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".ratchet")
}
