//! Competition audit log.
//!
//! Each soak line reads `{prefix}{action}_{marker_id}_{timestamp}Z_{lat}_{lon}`
//! with a UTC ISO-8601 timestamp, one line per event.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::geo::Coordinate;

pub const DEFAULT_PREFIX: &str = "RTXDC_2024 PVAMU_UGV_";

pub struct SoakLogger {
    prefix: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for SoakLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoakLogger")
            .field("prefix", &self.prefix)
            // Skip writer as it doesn't implement Debug
            .finish()
    }
}

impl SoakLogger {
    pub fn new(writer: impl Write + Send + 'static, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    /// Appends to `path`, creating it when missing.
    pub fn to_file(path: &Path, prefix: &str) -> Result<Self> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = path
            .file_name()
            .with_context(|| format!("Soak log path has no file name: {:?}", path))?;
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create soak log directory {:?}", directory))?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        info!("Soak log: {:?}", directory.join(file_name));
        Ok(Self::new(appender, prefix))
    }

    pub fn entry(
        &self,
        action: &str,
        marker_id: &str,
        location: &Coordinate,
        at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}{}_{}_{}_{}_{}",
            self.prefix,
            action,
            marker_id,
            at.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            location.latitude(),
            location.longitude()
        )
    }

    /// Writes one soak line stamped with the current UTC time.
    pub fn record(&self, action: &str, marker_id: &str, location: &Coordinate) -> Result<String> {
        let line = self.entry(action, marker_id, location, Utc::now());
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        writeln!(writer, "{}", line).context("Failed to write soak record")?;
        writer.flush().context("Failed to flush soak log")?;
        info!(action, marker_id, %location, "Soak recorded");
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn location() -> Coordinate {
        Coordinate::new(51.5074, 0.1278, 0.0).unwrap()
    }

    #[test]
    fn test_entry_format() {
        let logger = SoakLogger::new(std::io::sink(), DEFAULT_PREFIX);
        let at = Utc.with_ymd_and_hms(2024, 4, 20, 14, 5, 9).unwrap();
        assert_eq!(
            logger.entry("Soaked", "123", &location(), at),
            "RTXDC_2024 PVAMU_UGV_Soaked_123_2024-04-20T14:05:09.000000Z_51.5074_0.1278"
        );
    }

    #[test]
    fn test_record_writes_one_line() {
        let buffer = SharedBuffer::default();
        let logger = SoakLogger::new(buffer.clone(), "");
        let line = logger.record("Soaked", "7", &location()).unwrap();

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert_eq!(written, format!("{}\n", line));
        assert!(line.starts_with("Soaked_7_"));
        assert!(line.ends_with("Z_51.5074_0.1278"));
    }

    #[test]
    fn test_to_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("ugv_basic.log");
        let logger = SoakLogger::to_file(&path, DEFAULT_PREFIX).unwrap();
        logger.record("Soaked", "1", &location()).unwrap();
        logger.record("Soaked", "2", &location()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("RTXDC_2024 PVAMU_UGV_Soaked_2_"));
    }
}
