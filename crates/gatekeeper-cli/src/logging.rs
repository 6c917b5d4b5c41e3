use std::path::Path;

use anyhow::Context;
use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_NAME: &str = "gatekeeper.log";
pub const MAX_LOG_BYTES: u64 = 1024 * 1024;
pub const LOG_BACKUPS: usize = 5;

/// `gatekeeper.log` in `log_dir`, rolled over to `gatekeeper.log.1` ..
/// `gatekeeper.log.5` once it reaches 1 MiB.
pub fn file_appender(log_dir: &Path) -> anyhow::Result<BasicRollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    BasicRollingFileAppender::new(
        log_dir.join(LOG_FILE_NAME),
        RollingConditionBasic::new().max_size(MAX_LOG_BYTES),
        LOG_BACKUPS,
    )
    .context("Failed to open log file")
}

/// Console plus rolling file output. Keep the returned guard alive until exit
/// or buffered lines are lost.
pub fn init(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatekeeper=info,gatekeeper_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_rolls_over_at_one_mebibyte() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = file_appender(dir.path()).unwrap();

        let line = vec![b'x'; 64 * 1024];
        for _ in 0..17 {
            appender.write_all(&line).unwrap();
        }
        appender.write_all(b"after rollover\n").unwrap();
        appender.flush().unwrap();

        let current = std::fs::read(dir.path().join(LOG_FILE_NAME)).unwrap();
        let backup = std::fs::metadata(dir.path().join("gatekeeper.log.1")).unwrap();
        assert!(backup.len() >= MAX_LOG_BYTES);
        assert!((current.len() as u64) < MAX_LOG_BYTES);
        assert!(current.ends_with(b"after rollover\n"));
    }

    #[test]
    fn test_keeps_five_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut appender = file_appender(dir.path()).unwrap();

        let chunk = vec![b'y'; MAX_LOG_BYTES as usize];
        for _ in 0..8 {
            appender.write_all(&chunk).unwrap();
        }
        appender.flush().unwrap();

        for n in 1..=LOG_BACKUPS {
            assert!(dir.path().join(format!("gatekeeper.log.{}", n)).exists());
        }
        assert!(!dir.path().join("gatekeeper.log.6").exists());
    }
}
