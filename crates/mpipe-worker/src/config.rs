//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Capacity of the bounded work queue
    pub queue_length: usize,
    /// Number of concurrent workers
    pub pool_strength: usize,
    /// Root for per-worker scratch directories
    pub work_dir: PathBuf,
    /// Prometheus listener address, if metrics are exported
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_length: 10,
            pool_strength: 2,
            work_dir: PathBuf::from("/tmp/mpipe"),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            queue_length: std::env::var("QUEUE_LENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_length),
            pool_strength: std::env::var("WORKER_POOL_STRENGTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool_strength),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Scratch directory owned by one worker.
    pub fn scratch_dir(&self, worker_id: usize) -> PathBuf {
        self.work_dir.join(format!("worker-{}", worker_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_dir() {
        let config = WorkerConfig {
            work_dir: PathBuf::from("/data/mpipe"),
            ..WorkerConfig::default()
        };
        assert_eq!(config.scratch_dir(3), PathBuf::from("/data/mpipe/worker-3"));
    }
}
