//! Decoupled session logging for provisioning runs.
//!
//! Every `log::` record is pushed onto an unbounded crossbeam channel and
//! persisted by a background thread, so a slow disk never stalls a stage.
//!
//! ```text
//! log::info!() / log::debug!()
//!     |
//! [LogCollector] (implements log::Log, never blocks)
//!     | (crossbeam unbounded channel)
//!     v
//! [DiskPersister thread] --> <log_dir>/<YYYYmmdd_HHMMSS>_provision.log
//!     |
//!     +--> stderr echo (records at or above the echo level)
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    /// Timestamp of when the log was created
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            level,
            message,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    fn render(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Ensure the logs directory exists
pub fn ensure_logs_dir_exists(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create logs directory: {}", e))
}

/// Session logger persisting every record of one run.
#[derive(Clone)]
pub struct LogCollector {
    /// crossbeam unbounded for cross-runtime reliability
    tx: Sender<LogMessage>,
    session_path: PathBuf,
    /// Records at or above this level are also echoed to stderr
    echo_level: Option<Level>,
}

impl LogCollector {
    /// Create the session log file and start the background persister.
    pub fn new(log_dir: &Path, echo_level: Option<Level>) -> Result<Self, String> {
        ensure_logs_dir_exists(log_dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let session_path = log_dir.join(format!("{}_provision.log", timestamp));

        let mut file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session_path)
            .map_err(|e| format!("Failed to create log file {}: {}", session_path.display(), e))?;

        let (tx, rx) = unbounded::<LogMessage>();

        // Plain thread, not a tokio task: must keep draining after the runtime
        // shuts down.
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(log_line) => {
                        let _ = file.write_all(log_line.render().as_bytes());
                    }
                    LogMessage::Flush(done) => {
                        let _ = file.flush();
                        let _ = file.sync_data();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            session_path,
            echo_level,
        })
    }

    /// Install as the global `log` backend.
    pub fn install(self) -> Result<(), String> {
        log::set_boxed_logger(Box::new(self))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(LevelFilter::Debug);
        Ok(())
    }

    pub fn session_log_path(&self) -> &Path {
        &self.session_path
    }

    /// Send a log line (non-blocking, cannot fail)
    pub fn log_line(&self, line: LogLine) {
        if self.echo_level.map_or(false, |echo| line.level <= echo) {
            eprintln!("[{}] {}", line.level, line.message);
        }
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, level: Level, message: impl Into<String>) {
        self.log_line(LogLine::new(level, message.into()));
    }

    /// Block until every line sent before this call is on disk.
    ///
    /// Call before the process exits so the final summary lines are kept.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();

        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

/// Wires all log::info!(), log::warn!(), log::debug!() calls into LogCollector
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_str(record.level(), record.args().to_string());
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_collector_creates_session_file() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path().join("logs");

        let collector = LogCollector::new(&log_dir, None).unwrap();

        let path = collector.session_log_path();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_provision.log"));
    }

    #[test]
    fn test_wait_for_empty_persists_all_lines() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path(), None).unwrap();

        for i in 0..500 {
            collector.log_str(Level::Debug, format!("esptool output line {}", i));
        }
        collector.log_str(Level::Info, "Upload completed");
        collector.wait_for_empty().unwrap();

        let content = fs::read_to_string(collector.session_log_path()).unwrap();
        assert_eq!(content.lines().count(), 501);
        assert!(content.contains("[DEBUG] esptool output line 0"));
        assert!(content.trim_end().ends_with("[INFO] Upload completed"));
    }

    #[test]
    fn test_log_trait_routes_records() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path(), None).unwrap();

        collector.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("erase failed"))
                .build(),
        );
        collector.wait_for_empty().unwrap();

        let content = fs::read_to_string(collector.session_log_path()).unwrap();
        assert!(content.contains("[WARN] erase failed"));
    }
}
