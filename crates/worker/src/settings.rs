//! Command-line / environment configuration for the worker binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use resumeflow_core::RetryPolicy;
use resumeflow_infra::QueueConfig;

use crate::cleanup::CleanupConfig;
use crate::worker::WorkerConfig;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("worker concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("retry base delay ({base}s) exceeds max delay ({max}s)")]
    RetryDelays { base: u64, max: u64 },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "resumeflow-worker",
    version,
    about = "Resume processing queue worker"
)]
pub struct Cli {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Namespace prepended to every store key.
    #[arg(long, env = "RESUMEFLOW_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Concurrent processing slots.
    #[arg(short = 'c', long, env = "WORKER_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Task record lifetime while queued or running.
    #[arg(long, env = "JOB_TIMEOUT_SECS", default_value_t = 3600)]
    pub job_timeout_secs: u64,

    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value_t = 5)]
    pub retry_base_delay_secs: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 300)]
    pub retry_max_delay_secs: u64,

    /// How often due retries are promoted.
    #[arg(long, env = "RETRY_INTERVAL_SECS", default_value_t = 5)]
    pub retry_interval_secs: u64,

    /// How often due cleanup entries are executed.
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value_t = 60)]
    pub cleanup_interval_secs: u64,

    /// Grace period before a finished job's resources are deleted (0 disables).
    #[arg(long, env = "CLEANUP_DELAY_SECS", default_value_t = DAY_SECS)]
    pub cleanup_delay_secs: u64,

    /// Job record retention, and minimum age of orphaned uploads.
    #[arg(long, env = "RETENTION_DAYS", default_value_t = 7)]
    pub retention_days: u64,

    /// Durable upload root (`<dir>/<job_uid>/...`); enables file cleanup and
    /// the orphan sweep.
    #[arg(long, env = "UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Document processing endpoint.
    #[arg(long, env = "PROCESSOR_URL")]
    pub processor_url: String,

    #[arg(long, env = "PROCESSOR_TIMEOUT_SECS", default_value_t = 600)]
    pub processor_timeout_secs: u64,

    /// Per-request timeout for graph and vector store deletions.
    #[arg(long, env = "CLEANUP_TIMEOUT_SECS", default_value_t = 30)]
    pub cleanup_timeout_secs: u64,

    /// Graph store base URL for per-job deletion.
    #[arg(long, env = "GRAPH_CLEANUP_URL")]
    pub graph_cleanup_url: Option<String>,

    /// Vector store base URL for per-job deletion.
    #[arg(long, env = "VECTOR_CLEANUP_URL")]
    pub vector_cleanup_url: Option<String>,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub cleanup: CleanupConfig,
    pub upload_dir: Option<PathBuf>,
    pub processor_url: String,
    pub processor_timeout: Duration,
    pub cleanup_timeout: Duration,
    pub graph_cleanup_url: Option<String>,
    pub vector_cleanup_url: Option<String>,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, SettingsError> {
        if self.concurrency == 0 {
            return Err(SettingsError::ZeroConcurrency);
        }
        if self.retry_base_delay_secs > self.retry_max_delay_secs {
            return Err(SettingsError::RetryDelays {
                base: self.retry_base_delay_secs,
                max: self.retry_max_delay_secs,
            });
        }
        for (name, value) in [
            ("JOB_TIMEOUT_SECS", self.job_timeout_secs),
            ("RETRY_INTERVAL_SECS", self.retry_interval_secs),
            ("CLEANUP_INTERVAL_SECS", self.cleanup_interval_secs),
            ("RETENTION_DAYS", self.retention_days),
            ("PROCESSOR_TIMEOUT_SECS", self.processor_timeout_secs),
            ("CLEANUP_TIMEOUT_SECS", self.cleanup_timeout_secs),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroInterval(name));
            }
        }

        let retention = Duration::from_secs(self.retention_days.saturating_mul(DAY_SECS));
        let queue = QueueConfig::default()
            .with_prefix(self.key_prefix)
            .with_job_timeout(Duration::from_secs(self.job_timeout_secs))
            .with_job_retention(retention)
            .with_retry_policy(RetryPolicy::exponential(
                self.max_retries,
                Duration::from_secs(self.retry_base_delay_secs),
                Duration::from_secs(self.retry_max_delay_secs),
            ));

        let worker = WorkerConfig::default()
            .with_concurrency(self.concurrency)
            .with_retry_interval(Duration::from_secs(self.retry_interval_secs))
            .with_cleanup_delay(
                (self.cleanup_delay_secs > 0).then(|| Duration::from_secs(self.cleanup_delay_secs)),
            );

        let cleanup = CleanupConfig {
            interval: Duration::from_secs(self.cleanup_interval_secs),
            retention,
            ..CleanupConfig::default()
        };

        Ok(Settings {
            redis_url: self.redis_url,
            queue,
            worker,
            cleanup,
            upload_dir: self.upload_dir,
            processor_url: self.processor_url,
            processor_timeout: Duration::from_secs(self.processor_timeout_secs),
            cleanup_timeout: Duration::from_secs(self.cleanup_timeout_secs),
            graph_cleanup_url: self.graph_cleanup_url,
            vector_cleanup_url: self.vector_cleanup_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["resumeflow-worker", "--processor-url", "http://processor:8000/process"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = parse(&[]).into_settings().unwrap();
        assert_eq!(settings.worker.concurrency, 4);
        assert_eq!(settings.worker.cleanup_delay, Some(Duration::from_secs(DAY_SECS)));
        assert_eq!(settings.queue.job_timeout, Duration::from_secs(3600));
        assert_eq!(settings.queue.retry, RetryPolicy::default());
        assert_eq!(settings.queue.job_retention, Duration::from_secs(7 * DAY_SECS));
        assert_eq!(settings.queue.keys.normal_lane(), "queue:jobs");
        assert!(settings.upload_dir.is_none());
        assert_eq!(settings.processor_timeout, Duration::from_secs(600));
        assert_eq!(settings.cleanup_timeout, Duration::from_secs(30));
    }

    #[test]
    fn flags_override_defaults() {
        let settings = parse(&[
            "--key-prefix",
            "staging",
            "-c",
            "16",
            "--cleanup-delay-secs",
            "0",
            "--upload-dir",
            "/srv/uploads",
            "--cleanup-timeout-secs",
            "5",
        ])
        .into_settings()
        .unwrap();
        assert_eq!(settings.worker.concurrency, 16);
        assert_eq!(settings.worker.cleanup_delay, None);
        assert_eq!(settings.queue.keys.normal_lane(), "staging:queue:jobs");
        assert_eq!(settings.upload_dir, Some(PathBuf::from("/srv/uploads")));
        assert_eq!(settings.cleanup_timeout, Duration::from_secs(5));
        assert_eq!(settings.processor_timeout, Duration::from_secs(600));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_eq!(
            parse(&["-c", "0"]).into_settings().unwrap_err(),
            SettingsError::ZeroConcurrency
        );
        assert_eq!(
            parse(&["--retry-base-delay-secs", "60", "--retry-max-delay-secs", "10"])
                .into_settings()
                .unwrap_err(),
            SettingsError::RetryDelays { base: 60, max: 10 }
        );
        assert_eq!(
            parse(&["--retry-interval-secs", "0"]).into_settings().unwrap_err(),
            SettingsError::ZeroInterval("RETRY_INTERVAL_SECS")
        );
        assert_eq!(
            parse(&["--cleanup-timeout-secs", "0"]).into_settings().unwrap_err(),
            SettingsError::ZeroInterval("CLEANUP_TIMEOUT_SECS")
        );
    }

    #[test]
    fn processor_url_is_required() {
        assert!(Cli::try_parse_from(["resumeflow-worker"]).is_err());
    }
}
