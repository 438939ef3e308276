use crate::{DispatcherError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use workpool_core::MAX_PAYLOAD_SIZE;
use workpool_protocol::MAX_TASK_PAYLOAD;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers
    pub size: usize,
    pub max_payload_bytes: usize,
    pub worker: WorkerConfig,
    pub tasks: TaskConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub kind: WorkerKind,
    /// Program for process workers; the running executable when unset
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub respawn: RespawnPolicy,
    /// Respawns allowed over the pool's lifetime (0 = unlimited)
    pub max_respawns: u32,
    /// Workers in a row that may exit before their `Ready` before the pool
    /// stops replacing them
    pub max_startup_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Default per-task timeout (0 = none)
    pub timeout_secs: u64,
    /// Extra time past the timeout before the pool gives up on a worker
    pub lease_grace_ms: u64,
    pub lease_check_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Workers run as tokio tasks inside the pool's process
    InProcess,
    /// Workers are child processes speaking the framed protocol on stdio
    Process,
}

/// What happens to a worker slot after its worker dies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RespawnPolicy {
    /// Start a replacement worker
    Respawn,
    /// Leave the pool one worker smaller
    Shrink,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            size: 4,
            max_payload_bytes: MAX_PAYLOAD_SIZE,
            worker: WorkerConfig::default(),
            tasks: TaskConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            kind: WorkerKind::InProcess,
            program: None,
            args: vec!["worker".to_string()],
            respawn: RespawnPolicy::Respawn,
            max_respawns: 0,
            max_startup_failures: 3,
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            timeout_secs: 300, // 5 minutes default
            lease_grace_ms: 5_000,
            lease_check_interval_ms: 1_000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PoolConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Pool of `size` in-process workers with otherwise default settings
    pub fn in_process(size: usize) -> Self {
        PoolConfig {
            size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(DispatcherError::Config("size must be at least 1".to_string()));
        }
        if self.tasks.lease_check_interval_ms == 0 {
            return Err(DispatcherError::Config(
                "tasks.lease_check_interval_ms must be positive".to_string(),
            ));
        }
        if self.worker.max_startup_failures == 0 {
            return Err(DispatcherError::Config(
                "worker.max_startup_failures must be at least 1".to_string(),
            ));
        }
        if self.worker.kind == WorkerKind::Process && self.max_payload_bytes > MAX_TASK_PAYLOAD {
            return Err(DispatcherError::Config(format!(
                "max_payload_bytes {} exceeds the {} bytes a process worker frame can carry",
                self.max_payload_bytes, MAX_TASK_PAYLOAD
            )));
        }
        EnvFilter::try_new(&self.monitoring.log_level).map_err(|e| {
            DispatcherError::Config(format!(
                "invalid monitoring.log_level {:?}: {}",
                self.monitoring.log_level, e
            ))
        })?;
        Ok(())
    }

    /// Log filter from `RUST_LOG`, falling back to `monitoring.log_level`
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.monitoring.log_level))
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        (self.tasks.timeout_secs > 0).then(|| Duration::from_secs(self.tasks.timeout_secs))
    }

    pub fn lease_grace(&self) -> Duration {
        Duration::from_millis(self.tasks.lease_grace_ms)
    }

    pub fn lease_check_interval(&self) -> Duration {
        Duration::from_millis(self.tasks.lease_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.size, 4);
        assert_eq!(config.worker.kind, WorkerKind::InProcess);
        assert_eq!(config.worker.respawn, RespawnPolicy::Respawn);
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let mut config = PoolConfig::default();
        config.tasks.timeout_secs = 0;
        assert_eq!(config.default_timeout(), None);
    }

    #[test]
    fn test_zero_size_rejected() {
        let config = PoolConfig::in_process(0);
        assert!(matches!(config.validate(), Err(DispatcherError::Config(_))));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "size: 2\nworker:\n  kind: process\n  respawn: shrink\ntasks:\n  timeout_secs: 10\n"
        )
        .unwrap();

        let config = PoolConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.size, 2);
        assert_eq!(config.worker.kind, WorkerKind::Process);
        assert_eq!(config.worker.respawn, RespawnPolicy::Shrink);
        assert_eq!(config.worker.args, vec!["worker".to_string()]);
        assert_eq!(config.tasks.timeout_secs, 10);
        // Unset sections fall back to defaults
        assert_eq!(config.tasks.lease_grace_ms, 5_000);
        assert_eq!(config.monitoring.log_level, "info");
    }

    #[test]
    fn test_process_payload_limit_fits_a_frame() {
        let mut config = PoolConfig::default();
        config.max_payload_bytes = 20 * 1024 * 1024;
        assert!(config.validate().is_ok());

        config.worker.kind = WorkerKind::Process;
        assert!(matches!(config.validate(), Err(DispatcherError::Config(_))));

        config.max_payload_bytes = MAX_TASK_PAYLOAD;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_startup_failure_limit_must_be_positive() {
        let mut config = PoolConfig::default();
        assert_eq!(config.worker.max_startup_failures, 3);

        config.worker.max_startup_failures = 0;
        assert!(matches!(config.validate(), Err(DispatcherError::Config(_))));
    }

    #[test]
    fn test_log_level_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "monitoring:\n  log_level: workpool_dispatcher=debug").unwrap();

        let config = PoolConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.monitoring.log_level, "workpool_dispatcher=debug");
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = PoolConfig::default();
        config.monitoring.log_level = "workpool=loud".to_string();
        assert!(matches!(config.validate(), Err(DispatcherError::Config(_))));
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "size: 0").unwrap();
        assert!(PoolConfig::from_file(file.path().to_str().unwrap()).is_err());
    }
}
