use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxKind {
    #[default]
    Fork,
    Null,
}

impl SandboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxKind::Fork => "fork",
            SandboxKind::Null => "null",
        }
    }
}

impl std::str::FromStr for SandboxKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fork" => Ok(SandboxKind::Fork),
            "null" => Ok(SandboxKind::Null),
            other => Err(format!("unknown sandbox `{other}` (expected `fork` or `null`)")),
        }
    }
}

/// Worker pool sizes. Zero means "one per available core".
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ParallelizationSettings {
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub test_execution_workers: usize,
    #[serde(default)]
    pub mutant_execution_workers: usize,
}

impl Default for ParallelizationSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            test_execution_workers: 0,
            mutant_execution_workers: 0,
        }
        .normalize()
    }
}

impl ParallelizationSettings {
    /// Pins every worker count to the same value.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            test_execution_workers: workers,
            mutant_execution_workers: workers,
        }
        .normalize()
    }

    /// Replaces zero counts with the hardware concurrency.
    pub fn normalize(mut self) -> Self {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if self.workers == 0 {
            self.workers = available;
        }
        if self.test_execution_workers == 0 {
            self.test_execution_workers = self.workers;
        }
        if self.mutant_execution_workers == 0 {
            self.mutant_execution_workers = self.workers;
        }
        self
    }
}

fn default_timeout_multiplier() -> u32 {
    10
}

fn default_min_timeout_ms() -> u64 {
    30
}

fn default_test_timeout_ms() -> u64 {
    3000
}

fn default_show_progress() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutionSettings {
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub sandbox: SandboxKind,
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: u32,
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "default_test_timeout_ms")]
    pub test_timeout_ms: u64,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            fail_fast: false,
            dry_run: false,
            sandbox: SandboxKind::default(),
            timeout_multiplier: default_timeout_multiplier(),
            min_timeout_ms: default_min_timeout_ms(),
            test_timeout_ms: default_test_timeout_ms(),
            show_progress: default_show_progress(),
        }
    }
}

impl ExecutionSettings {
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            multiplier: self.timeout_multiplier,
            floor: Duration::from_millis(self.min_timeout_ms),
        }
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }
}

/// Deadline of a mutant run, derived from the test's unmutated running time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub multiplier: u32,
    pub floor: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        ExecutionSettings::default().timeout_policy()
    }
}

impl TimeoutPolicy {
    pub fn timeout_for(&self, baseline: Duration) -> Duration {
        baseline
            .checked_mul(self.multiplier)
            .unwrap_or(Duration::MAX)
            .max(self.floor)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TamperConfig {
    #[serde(default)]
    pub parallelization: ParallelizationSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

impl TamperConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: TamperConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config.normalize())
    }

    pub fn normalize(mut self) -> Self {
        self.parallelization = self.parallelization.normalize();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp config");
        file.write_all(content.as_bytes())
            .expect("Failed to write temp config");
        file
    }

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = TamperConfig::default();
        assert!(!config.execution.fail_fast);
        assert!(!config.execution.dry_run);
        assert_eq!(config.execution.sandbox, SandboxKind::Fork);
        assert_eq!(
            config.execution.timeout_policy(),
            TimeoutPolicy {
                multiplier: 10,
                floor: Duration::from_millis(30)
            }
        );
        assert!(config.parallelization.workers >= 1);
        assert!(config.parallelization.mutant_execution_workers >= 1);
    }

    #[test]
    fn loads_full_file() {
        let file = write_config(
            r#"
            [parallelization]
            workers = 3
            test-execution-workers = 2
            mutant-execution-workers = 5

            [execution]
            fail-fast = true
            dry-run = true
            sandbox = "null"
            timeout-multiplier = 4
            min-timeout-ms = 100
            test-timeout-ms = 500
            show-progress = false
            "#,
        );

        let config = TamperConfig::load_from_file(file.path()).expect("valid config");
        assert_eq!(
            config.parallelization,
            ParallelizationSettings {
                workers: 3,
                test_execution_workers: 2,
                mutant_execution_workers: 5,
            }
        );
        assert!(config.execution.fail_fast);
        assert!(config.execution.dry_run);
        assert_eq!(config.execution.sandbox, SandboxKind::Null);
        assert_eq!(config.execution.timeout_multiplier, 4);
        assert_eq!(config.execution.test_timeout(), Duration::from_millis(500));
        assert!(!config.execution.show_progress);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let file = write_config("[execution]\nfail-fast = true\n");
        let config = TamperConfig::load_from_file(file.path()).expect("valid config");
        assert!(config.execution.fail_fast);
        assert_eq!(config.execution.min_timeout_ms, 30);
        assert!(config.parallelization.test_execution_workers >= 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[execution]\nfail-quickly = true\n");
        let err = TamperConfig::load_from_file(file.path()).expect_err("unknown key");
        assert!(err.to_string().contains("Failed to parse TOML"), "{err}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = TamperConfig::load_from_file(Path::new("/definitely/not/here.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("Failed to read config file"), "{err}");
    }

    #[test]
    fn zero_worker_counts_inherit_general_workers() {
        let settings = ParallelizationSettings {
            workers: 6,
            test_execution_workers: 0,
            mutant_execution_workers: 2,
        }
        .normalize();
        assert_eq!(settings.test_execution_workers, 6);
        assert_eq!(settings.mutant_execution_workers, 2);
    }

    #[test]
    fn timeout_scales_baseline_with_a_floor() {
        let policy = TimeoutPolicy {
            multiplier: 10,
            floor: Duration::from_millis(30),
        };
        assert_eq!(policy.timeout_for(Duration::ZERO), Duration::from_millis(30));
        assert_eq!(
            policy.timeout_for(Duration::from_millis(2)),
            Duration::from_millis(30)
        );
        assert_eq!(
            policy.timeout_for(Duration::from_millis(100)),
            Duration::from_secs(1)
        );
        assert_eq!(policy.timeout_for(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn sandbox_kind_parses_from_cli_strings() {
        assert_eq!("fork".parse::<SandboxKind>(), Ok(SandboxKind::Fork));
        assert_eq!("null".parse::<SandboxKind>(), Ok(SandboxKind::Null));
        assert!("docker".parse::<SandboxKind>().is_err());
        assert_eq!(SandboxKind::Null.as_str(), "null");
    }
}
