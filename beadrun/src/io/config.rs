//! Scheduler configuration stored under `.beads/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Scheduler configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults. CLI flags override
/// individual values per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on concurrent units of work in swarm mode.
    pub max_workers: usize,

    /// Wall-clock budget for a single unit of work, in seconds. A unit that
    /// exceeds it resolves as a failure.
    pub unit_timeout_secs: u64,

    /// Keep at most this many bytes of executor stdout/stderr per unit.
    pub output_limit_bytes: usize,

    /// How often the cancel flag file is checked, in milliseconds.
    pub cancel_poll_millis: u64,

    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Command run once per bead; the bead payload is written to stdin.
    pub command: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["sh".to_string(), "-c".to_string(), "cat".to_string()],
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            unit_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            cancel_poll_millis: 500,
            executor: ExecutorConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be > 0"));
        }
        if self.unit_timeout_secs == 0 {
            return Err(anyhow!("unit_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.cancel_poll_millis == 0 {
            return Err(anyhow!("cancel_poll_millis must be > 0"));
        }
        match self.executor.command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => return Err(anyhow!("executor.command must be a non-empty array")),
        }
        Ok(())
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_millis)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunConfig> {
    if !path.exists() {
        let cfg = RunConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = RunConfig {
            max_workers: 5,
            executor: ExecutorConfig {
                command: vec!["./agent.sh".to_string()],
            },
            ..RunConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_workers = 8\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.unit_timeout_secs, RunConfig::default().unit_timeout_secs);
        assert_eq!(cfg.executor, ExecutorConfig::default());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_workers = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("max_workers must be > 0"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let cfg = RunConfig {
            executor: ExecutorConfig {
                command: Vec::new(),
            },
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
