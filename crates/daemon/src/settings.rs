// Daemon settings
//
// Sources, lowest precedence first:
// 1. serde defaults below
// 2. TOML file named by CONVEYOR_CONFIG (optional)
// 3. CONVEYOR__SECTION__KEY environment variables

use anyhow::{Context, Result};
use conveyor_core::application::WorkerConfig;
use conveyor_core::domain::{OverflowPolicy, QueueStorageOptions};
use conveyor_infra_sandbox::SandboxConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CONVEYOR_CONFIG";
const ENV_PREFIX: &str = "CONVEYOR";
const FALLBACK_DATA_DIR: &str = "~/.conveyor";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root for queues, blobs and scratch files unless overridden per section
    pub data_dir: String,
    pub queue: QueueSettings,
    pub sandbox: SandboxSettings,
    pub worker: WorkerSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub dir: Option<String>,
    pub max_queue_bytes: Option<u64>,
    pub max_queue_messages: usize,
    pub max_message_bytes: usize,
    pub overflow_policy: OverflowPolicy,
    pub cleanup_orphans: bool,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub blob_dir: Option<String>,
    pub scratch_dir: Option<String>,
    pub execution_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub dequeue_wait_secs: u64,
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub format: LogFormat,
    /// Daily-rolling log files are written here when set
    pub dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            queue: QueueSettings::default(),
            sandbox: SandboxSettings::default(),
            worker: WorkerSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        let defaults = QueueStorageOptions::default();
        Self {
            dir: None,
            max_queue_bytes: defaults.max_queue_bytes,
            max_queue_messages: defaults.max_queue_messages,
            max_message_bytes: defaults.max_message_bytes,
            overflow_policy: defaults.overflow_policy,
            cleanup_orphans: defaults.cleanup_orphans,
            lock_timeout_ms: defaults.lock_timeout.as_millis() as u64,
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            blob_dir: None,
            scratch_dir: None,
            execution_timeout_secs: 5 * 60,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let defaults = WorkerConfig::default();
        Self {
            dequeue_wait_secs: defaults.dequeue_wait.as_secs(),
            error_backoff_ms: defaults.error_backoff.as_millis() as u64,
        }
    }
}

impl Settings {
    /// Load from the optional config file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(expand);
        Self::load_from(file)
    }

    pub fn load_from(file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| match &file {
                Some(path) => format!("Invalid configuration in {}", path.display()),
                None => "Invalid configuration in environment".to_string(),
            })?;
        Ok(settings)
    }

    pub fn data_dir(&self) -> PathBuf {
        expand(&self.data_dir)
    }

    pub fn queue_options(&self) -> QueueStorageOptions {
        let q = &self.queue;
        let base_dir = q
            .dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| self.data_dir().join("queues"));

        let mut options = QueueStorageOptions::new(base_dir)
            .with_max_queue_messages(q.max_queue_messages)
            .with_max_message_bytes(q.max_message_bytes)
            .with_overflow_policy(q.overflow_policy)
            .with_cleanup_orphans(q.cleanup_orphans)
            .with_lock_timeout(Duration::from_millis(q.lock_timeout_ms));
        if let Some(max) = q.max_queue_bytes {
            options = options.with_max_queue_bytes(max);
        }
        options
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.sandbox
            .blob_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| self.data_dir().join("blobs"))
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        let scratch_dir = self
            .sandbox
            .scratch_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| self.data_dir().join("scratch"));
        SandboxConfig::new(scratch_dir)
            .with_execution_timeout(Duration::from_secs(self.sandbox.execution_timeout_secs))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            dequeue_wait: Duration::from_secs(self.worker.dequeue_wait_secs.max(1)),
            error_backoff: Duration::from_millis(self.worker.error_backoff_ms),
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log.dir.as_deref().map(expand)
    }
}

fn default_data_dir() -> String {
    directories::ProjectDirs::from("dev", "conveyor", "conveyor")
        .map(|dirs| dirs.data_dir().to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_DATA_DIR.to_string())
}

fn expand(path: impl AsRef<str>) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path.as_ref()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_derive_paths_from_data_dir() {
        let settings = Settings {
            data_dir: "/srv/conveyor".to_string(),
            ..Default::default()
        };

        assert_eq!(
            settings.queue_options().base_dir,
            PathBuf::from("/srv/conveyor/queues")
        );
        assert_eq!(settings.blob_dir(), PathBuf::from("/srv/conveyor/blobs"));
        assert_eq!(
            settings.sandbox_config().scratch_dir,
            PathBuf::from("/srv/conveyor/scratch")
        );
        assert_eq!(
            settings.sandbox_config().execution_timeout,
            Duration::from_secs(300)
        );
        assert_eq!(settings.worker_config().error_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
data_dir = "/tmp/conveyor-test"

[queue]
max_queue_messages = 5
max_queue_bytes = 4096
overflow_policy = "drop_oldest"

[log]
format = "json"
"#
        )
        .unwrap();

        let settings = Settings::load_from(Some(file.path().to_path_buf())).unwrap();
        let options = settings.queue_options();
        assert_eq!(options.max_queue_messages, 5);
        assert_eq!(options.max_queue_bytes, Some(4096));
        assert_eq!(options.overflow_policy, OverflowPolicy::DropOldest);
        assert!(options.cleanup_orphans);
        assert_eq!(settings.log.format, LogFormat::Json);
    }

    #[test]
    fn test_tilde_is_expanded() {
        let settings = Settings {
            data_dir: "~/conveyor".to_string(),
            ..Default::default()
        };
        assert!(!settings.data_dir().to_string_lossy().starts_with('~'));
    }
}
