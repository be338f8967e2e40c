//! Error types for the daemon.

use ratchet_engine::EngineError;
use ratchet_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur while configuring or running the scheduler.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Failed to create a directory.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDir {
        /// The path that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to read a file.
    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        /// The path that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to delete a file.
    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        /// The path that could not be deleted.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to read a directory.
    #[error("Failed to read directory '{path}': {source}")]
    ReadDir {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a JSON file.
    #[error("Failed to parse '{path}': {source}")]
    ParseJson {
        /// The path that could not be parsed.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// Failed to serialize JSON.
    #[error("Failed to serialize: {0}")]
    SerializeJson(#[from] serde_json::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config '{path}': {source}")]
    ParseConfig {
        /// The config file.
        path: PathBuf,
        /// The underlying TOML error.
        source: toml::de::Error,
    },

    /// Failed to render the configuration.
    #[error("Failed to render config: {0}")]
    RenderConfig(#[from] toml::ser::Error),

    /// Configuration values are inconsistent.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Store failure outside of a task run.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Engine failure outside of a task run.
    #[error(transparent)]
    Engine(#[from] EngineError),
}
