//! Audit logging
//!
//! Structured JSON audit logging of session lifecycle and backend-call
//! outcomes, written to a rotatable log file by a background task. This is
//! an ambient observability concern, carried regardless of which protocol
//! features are in scope for a given build.

#![allow(dead_code)]

use crate::config::AuditConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Minimum log level for audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Log everything
    All,
    /// Log session lifecycle, auth failures, and config changes (default)
    #[default]
    Standard,
    /// Log only security-relevant events (auth failures, config changes)
    Security,
    /// Disable audit logging
    Off,
}

impl AuditLevel {
    fn should_log(&self, event_type: &AuditEventType) -> bool {
        match self {
            AuditLevel::Off => false,
            AuditLevel::Security => matches!(
                event_type,
                AuditEventType::VerifyFailed | AuditEventType::ConfigurationChange
            ),
            AuditLevel::Standard => true,
            AuditLevel::All => true,
        }
    }
}

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A connection was accepted by the listener
    ConnectionAccepted,
    /// A session's underlying connection closed
    ConnectionClosed,
    /// A device verified successfully
    SessionVerified,
    /// A device failed to verify
    VerifyFailed,
    /// A session was evicted by a newer verify for the same device
    SessionEvicted,
    /// A session closed on heartbeat timeout
    HeartbeatTimeout,
    /// An observation was established
    ObservationCreated,
    /// An observation ended
    ObservationDestroyed,
    /// A call to a backend HTTP contract failed
    BackendCallFailed,
    /// Configuration change
    ConfigurationChange,
    /// Server started
    ServerStarted,
    /// Server stopped
    ServerStopped,
}

/// Result of an operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
}

/// Details for different audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditDetails {
    Connection {
        #[serde(skip_serializing_if = "Option::is_none")]
        remote_addr: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Session {
        #[serde(skip_serializing_if = "Option::is_none")]
        observer_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Backend {
        target: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Config {
        setting: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        old_value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_value: Option<String>,
    },
    Server {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Message {
        message: String,
    },
}

/// A structured audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<AuditDetails>,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType, result: AuditResult) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| time_to_iso8601(d.as_secs()))
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());

        Self {
            timestamp,
            event_type,
            device_id: None,
            remote_addr: None,
            result,
            details: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    pub fn with_details(mut self, details: AuditDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Convert a Unix timestamp to ISO 8601, without pulling in a date crate for
/// a format this simple.
fn time_to_iso8601(secs: u64) -> String {
    const SECONDS_PER_DAY: u64 = 86400;
    const SECONDS_PER_HOUR: u64 = 3600;
    const SECONDS_PER_MINUTE: u64 = 60;

    let days = secs / SECONDS_PER_DAY;
    let remaining = secs % SECONDS_PER_DAY;
    let hours = remaining / SECONDS_PER_HOUR;
    let remaining = remaining % SECONDS_PER_HOUR;
    let minutes = remaining / SECONDS_PER_MINUTE;
    let seconds = remaining % SECONDS_PER_MINUTE;

    let (year, month, day) = days_to_ymd(days);

    format!("{year:04}-{month:02}-{day:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

fn days_to_ymd(days: u64) -> (u32, u32, u32) {
    let mut remaining_days = days as i64;
    let mut year = 1970i32;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let is_leap = is_leap_year(year);
    let days_in_months: [i64; 12] = if is_leap {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1u32;
    for &days_in_month in &days_in_months {
        if remaining_days < days_in_month {
            break;
        }
        remaining_days -= days_in_month;
        month += 1;
    }

    let day = (remaining_days + 1) as u32;
    (year as u32, month, day)
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

enum AuditMessage {
    Log(AuditEntry),
    Rotate,
    Shutdown,
}

/// Async audit logger that writes to a file in the background
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditMessage>,
    config: AuditConfig,
}

impl AuditLogger {
    /// Returns `None` if audit logging is disabled.
    pub fn new(config: AuditConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = AuditWriter::new(config.clone());

        tokio::spawn(async move {
            writer.run(receiver).await;
        });

        Some(Self { sender, config })
    }

    pub fn log(&self, entry: AuditEntry) {
        if !self.config.level.should_log(&entry.event_type) {
            return;
        }
        if let Err(e) = self.sender.send(AuditMessage::Log(entry)) {
            warn!("failed to send audit log entry: {}", e);
        }
    }

    pub fn rotate(&self) {
        if let Err(e) = self.sender.send(AuditMessage::Rotate) {
            warn!("failed to send rotate request: {}", e);
        }
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(AuditMessage::Shutdown);
    }

    pub fn log_connection_accepted(&self, remote_addr: &str) {
        self.log(
            AuditEntry::new(AuditEventType::ConnectionAccepted, AuditResult::Success)
                .with_remote_addr(remote_addr),
        );
    }

    pub fn log_session_verified(&self, device_id: &str, remote_addr: &str) {
        self.log(
            AuditEntry::new(AuditEventType::SessionVerified, AuditResult::Success)
                .with_device_id(device_id)
                .with_remote_addr(remote_addr),
        );
    }

    pub fn log_verify_failed(&self, device_id: &str, reason: &str) {
        self.log(
            AuditEntry::new(AuditEventType::VerifyFailed, AuditResult::Denied)
                .with_device_id(device_id)
                .with_details(AuditDetails::Session {
                    observer_count: None,
                    reason: Some(reason.to_string()),
                }),
        );
    }

    pub fn log_session_evicted(&self, device_id: &str) {
        self.log(
            AuditEntry::new(AuditEventType::SessionEvicted, AuditResult::Success)
                .with_device_id(device_id),
        );
    }

    pub fn log_heartbeat_timeout(&self, device_id: &str) {
        self.log(
            AuditEntry::new(AuditEventType::HeartbeatTimeout, AuditResult::Success)
                .with_device_id(device_id),
        );
    }

    pub fn log_connection_closed(&self, device_id: Option<&str>, reason: &str) {
        let mut entry = AuditEntry::new(AuditEventType::ConnectionClosed, AuditResult::Success)
            .with_details(AuditDetails::Session {
                observer_count: None,
                reason: Some(reason.to_string()),
            });
        if let Some(id) = device_id {
            entry = entry.with_device_id(id);
        }
        self.log(entry);
    }

    pub fn log_backend_call_failed(&self, target: &str, error: &str) {
        self.log(
            AuditEntry::new(AuditEventType::BackendCallFailed, AuditResult::Failure).with_details(
                AuditDetails::Backend {
                    target: target.to_string(),
                    error: Some(error.to_string()),
                },
            ),
        );
    }

    pub fn log_config_change(
        &self,
        setting: &str,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.log(
            AuditEntry::new(AuditEventType::ConfigurationChange, AuditResult::Success)
                .with_details(AuditDetails::Config {
                    setting: setting.to_string(),
                    old_value,
                    new_value,
                }),
        );
    }

    pub fn log_server_started(&self, version: &str) {
        self.log(
            AuditEntry::new(AuditEventType::ServerStarted, AuditResult::Success).with_details(
                AuditDetails::Server {
                    version: Some(version.to_string()),
                    reason: None,
                },
            ),
        );
    }

    pub fn log_server_stopped(&self, reason: Option<String>) {
        self.log(
            AuditEntry::new(AuditEventType::ServerStopped, AuditResult::Success)
                .with_details(AuditDetails::Server {
                    version: None,
                    reason,
                }),
        );
    }
}

struct AuditWriter {
    config: AuditConfig,
    file: Option<BufWriter<File>>,
    entries_written: u64,
    current_file_size: u64,
}

impl AuditWriter {
    fn new(config: AuditConfig) -> Self {
        Self {
            config,
            file: None,
            entries_written: 0,
            current_file_size: 0,
        }
    }

    fn open_file(&mut self) -> Result<()> {
        let path = &self.config.path;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit log directory: {parent:?}"))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {path:?}"))?;

        self.current_file_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.file = Some(BufWriter::new(file));
        self.entries_written = 0;

        debug!("opened audit log: {:?}", path);
        Ok(())
    }

    fn write_entry(&mut self, entry: &AuditEntry) -> Result<()> {
        if self.file.is_none() {
            self.open_file()?;
        }

        let json = serde_json::to_string(entry).context("failed to serialize audit entry")?;
        let line = format!("{json}\n");
        let line_bytes = line.as_bytes();

        if let Some(ref mut writer) = self.file {
            writer
                .write_all(line_bytes)
                .context("failed to write audit entry")?;
            writer.flush().context("failed to flush audit log")?;

            self.entries_written += 1;
            self.current_file_size += line_bytes.len() as u64;

            if self.should_rotate() {
                self.rotate()?;
            }
        }

        Ok(())
    }

    fn should_rotate(&self) -> bool {
        if let Some(max_size) = self.config.max_size_mb {
            if self.current_file_size >= max_size as u64 * 1024 * 1024 {
                return true;
            }
        }
        if let Some(max_entries) = self.config.max_entries {
            if self.entries_written >= max_entries {
                return true;
            }
        }
        false
    }

    fn rotate(&mut self) -> Result<()> {
        self.file = None;

        let path = &self.config.path;
        let max_files = self.config.max_files.unwrap_or(5);

        for i in (1..max_files).rev() {
            let old_path = Self::rotated_path(path, i);
            let new_path = Self::rotated_path(path, i + 1);

            if old_path.exists() {
                if i + 1 >= max_files {
                    std::fs::remove_file(&old_path).ok();
                } else {
                    std::fs::rename(&old_path, &new_path).ok();
                }
            }
        }

        if path.exists() {
            let rotated = Self::rotated_path(path, 1);
            std::fs::rename(path, &rotated).ok();
        }

        debug!("rotated audit log: {:?}", path);
        self.open_file()
    }

    fn rotated_path(base: &PathBuf, index: u32) -> PathBuf {
        let file_name = base
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("audit.log");
        base.with_file_name(format!("{file_name}.{index}"))
    }

    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<AuditMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                AuditMessage::Log(entry) => {
                    if let Err(e) = self.write_entry(&entry) {
                        error!("failed to write audit log entry: {:#}", e);
                    }
                }
                AuditMessage::Rotate => {
                    if let Err(e) = self.rotate() {
                        error!("failed to rotate audit log: {:#}", e);
                    }
                }
                AuditMessage::Shutdown => {
                    debug!("audit logger shutting down");
                    break;
                }
            }
        }

        if let Some(ref mut writer) = self.file {
            let _ = writer.flush();
        }
    }
}

/// Shared audit logger handle
pub type SharedAuditLogger = Arc<Option<AuditLogger>>;

pub fn create_audit_logger(config: AuditConfig) -> SharedAuditLogger {
    Arc::new(AuditLogger::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_entry_creation() {
        let entry = AuditEntry::new(AuditEventType::SessionVerified, AuditResult::Success)
            .with_device_id("dev-1");
        assert!(entry.timestamp.contains('T'));
        assert_eq!(entry.device_id.as_deref(), Some("dev-1"));
    }

    #[test]
    fn audit_level_filtering() {
        assert!(AuditLevel::Standard.should_log(&AuditEventType::SessionVerified));
        assert!(!AuditLevel::Security.should_log(&AuditEventType::SessionVerified));
        assert!(AuditLevel::Security.should_log(&AuditEventType::VerifyFailed));
        assert!(!AuditLevel::Off.should_log(&AuditEventType::VerifyFailed));
    }

    #[test]
    fn time_to_iso8601_handles_epoch_and_known_date() {
        assert_eq!(time_to_iso8601(0), "1970-01-01T00:00:00Z");
        assert_eq!(time_to_iso8601(1704067200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn days_to_ymd_matches_expected_dates() {
        assert_eq!(days_to_ymd(0), (1970, 1, 1));
        assert_eq!(days_to_ymd(365), (1971, 1, 1));
        assert_eq!(days_to_ymd(366), (1971, 1, 2));
    }

    #[test]
    fn leap_year_rule_matches_gregorian_calendar() {
        assert!(!is_leap_year(1900));
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(2023));
    }

    #[test]
    fn rotated_path_appends_index() {
        let base = PathBuf::from("/var/log/hub-audit.log");
        assert_eq!(
            AuditWriter::rotated_path(&base, 1),
            PathBuf::from("/var/log/hub-audit.log.1")
        );
    }

    #[test]
    fn audit_entry_serializes_to_expected_shape() {
        let entry = AuditEntry::new(AuditEventType::SessionVerified, AuditResult::Success)
            .with_device_id("abc123")
            .with_remote_addr("127.0.0.1:9000");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("session_verified"));
        assert!(json.contains("abc123"));
    }
}
