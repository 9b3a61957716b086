//! Configuration for the conversion service and its engine.
//!
//! Every knob lives in [`ConverterConfig`], built via its
//! [`ConverterConfigBuilder`] or loaded from a JSON file with
//! [`ConverterConfig::from_json_file`]. Keys in JSON are camelCase
//! (`taskTimeoutMs`, `maxTasksPerProcess`, …) and any key may be omitted.

use crate::error::DocsconvError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the engine supervisor, the queue and the façade.
///
/// # Example
/// ```rust
/// use docsconv::ConverterConfig;
///
/// let config = ConverterConfig::builder()
///     .port(2010)
///     .task_timeout_ms(30_000)
///     .max_tasks_per_process(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.port, 2010);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConverterConfig {
    /// TCP port the engine listens on (loopback only). Default: 2002.
    pub port: u16,

    /// Execution budget of a single conversion in milliseconds. Default: 120 000.
    ///
    /// When exceeded the caller receives `TaskError::Timeout` and the engine
    /// is recycled before the next task.
    pub task_timeout_ms: u64,

    /// Tasks served by one engine process before it is recycled. Default: 10.
    ///
    /// LibreOffice leaks memory across documents; a periodic restart keeps
    /// the footprint bounded.
    pub max_tasks_per_process: u32,

    /// LibreOffice installation directory. Default: `/usr/lib/libreoffice`.
    pub office_home: PathBuf,

    /// Turn OpenGL off in the engine profile. Default: true.
    pub disable_hardware_acceleration: bool,

    /// How long the engine may take to accept connections after launch. Default: 60 000.
    pub start_timeout_ms: u64,

    /// Grace period between SIGTERM and a forced kill. Default: 10 000.
    pub stop_grace_ms: u64,

    /// How long `stop()` waits for queued work before abandoning it. Default: 30 000.
    pub drain_grace_ms: u64,

    /// Executable whose presence means the engine is installed. Default: `/usr/bin/soffice`.
    pub install_probe: PathBuf,

    /// Run the bootstrap when the probe is missing. Default: true.
    ///
    /// When false a missing engine is reported as an install error straight away.
    pub auto_install: bool,

    /// Shell script used to install the engine. `None` uses the built-in
    /// `apt-get` script.
    pub bootstrap_script: Option<String>,

    /// Client program that submits documents to the running engine. Default: `unoconv`.
    pub converter_program: PathBuf,

    /// Directory for per-process engine profiles. `None` uses the platform cache dir.
    pub work_dir: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            port: 2002,
            task_timeout_ms: 120_000,
            max_tasks_per_process: 10,
            office_home: PathBuf::from(office_auto::DEFAULT_OFFICE_HOME),
            disable_hardware_acceleration: true,
            start_timeout_ms: 60_000,
            stop_grace_ms: 10_000,
            drain_grace_ms: 30_000,
            install_probe: PathBuf::from(office_auto::DEFAULT_PROBE),
            auto_install: true,
            bootstrap_script: None,
            converter_program: PathBuf::from("unoconv"),
            work_dir: None,
            download_timeout_secs: 120,
        }
    }
}

impl ConverterConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> ConverterConfigBuilder {
        ConverterConfigBuilder {
            config: Self::default(),
        }
    }

    /// Turn an existing config back into a builder, e.g. to apply CLI overrides.
    pub fn into_builder(self) -> ConverterConfigBuilder {
        ConverterConfigBuilder { config: self }
    }

    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DocsconvError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DocsconvError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            DocsconvError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.into_builder().build()
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// The bootstrap command the supervisor runs when the engine is missing.
    pub fn bootstrap(&self) -> office_auto::Bootstrap {
        match &self.bootstrap_script {
            Some(script) => office_auto::Bootstrap::shell(script.clone()),
            None => office_auto::Bootstrap::default(),
        }
    }

    /// Profile directory root, falling back to the platform cache dir.
    pub fn resolved_work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| office_auto::default_work_dir().join("profiles"))
    }
}

/// Builder for [`ConverterConfig`].
#[derive(Debug)]
pub struct ConverterConfigBuilder {
    config: ConverterConfig,
}

impl ConverterConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn task_timeout_ms(mut self, ms: u64) -> Self {
        self.config.task_timeout_ms = ms;
        self
    }

    pub fn max_tasks_per_process(mut self, n: u32) -> Self {
        self.config.max_tasks_per_process = n;
        self
    }

    pub fn office_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.config.office_home = home.into();
        self
    }

    pub fn disable_hardware_acceleration(mut self, v: bool) -> Self {
        self.config.disable_hardware_acceleration = v;
        self
    }

    pub fn start_timeout_ms(mut self, ms: u64) -> Self {
        self.config.start_timeout_ms = ms;
        self
    }

    pub fn stop_grace_ms(mut self, ms: u64) -> Self {
        self.config.stop_grace_ms = ms;
        self
    }

    pub fn drain_grace_ms(mut self, ms: u64) -> Self {
        self.config.drain_grace_ms = ms;
        self
    }

    pub fn install_probe(mut self, probe: impl Into<PathBuf>) -> Self {
        self.config.install_probe = probe.into();
        self
    }

    pub fn auto_install(mut self, v: bool) -> Self {
        self.config.auto_install = v;
        self
    }

    pub fn bootstrap_script(mut self, script: impl Into<String>) -> Self {
        self.config.bootstrap_script = Some(script.into());
        self
    }

    pub fn converter_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConverterConfig, DocsconvError> {
        let c = &self.config;
        if c.port == 0 {
            return Err(DocsconvError::InvalidConfig(
                "port must be a fixed, non-zero TCP port".into(),
            ));
        }
        if c.task_timeout_ms == 0 {
            return Err(DocsconvError::InvalidConfig(
                "taskTimeoutMs must be ≥ 1".into(),
            ));
        }
        if c.max_tasks_per_process == 0 {
            return Err(DocsconvError::InvalidConfig(
                "maxTasksPerProcess must be ≥ 1".into(),
            ));
        }
        if c.start_timeout_ms == 0 {
            return Err(DocsconvError::InvalidConfig(
                "startTimeoutMs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConverterConfig::default();
        assert_eq!(c.port, 2002);
        assert_eq!(c.task_timeout(), Duration::from_secs(120));
        assert_eq!(c.max_tasks_per_process, 10);
        assert_eq!(c.office_home, PathBuf::from("/usr/lib/libreoffice"));
        assert!(c.disable_hardware_acceleration);
        assert!(c.auto_install);
    }

    #[test]
    fn builder_rejects_zero_limits() {
        assert!(ConverterConfig::builder().port(0).build().is_err());
        assert!(ConverterConfig::builder().task_timeout_ms(0).build().is_err());
        assert!(ConverterConfig::builder()
            .max_tasks_per_process(0)
            .build()
            .is_err());
    }

    #[test]
    fn json_file_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docsconv.json");
        std::fs::write(
            &path,
            r#"{ "port": 2100, "taskTimeoutMs": 5000, "disableHardwareAcceleration": false }"#,
        )
        .unwrap();

        let c = ConverterConfig::from_json_file(&path).unwrap();
        assert_eq!(c.port, 2100);
        assert_eq!(c.task_timeout_ms, 5000);
        assert!(!c.disable_hardware_acceleration);
        assert_eq!(c.max_tasks_per_process, 10);
        assert_eq!(c.converter_program, PathBuf::from("unoconv"));
    }

    #[test]
    fn json_file_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "maxTasksPerProcess": 0 }"#).unwrap();
        assert!(matches!(
            ConverterConfig::from_json_file(&path),
            Err(DocsconvError::InvalidConfig(_))
        ));
    }

    #[test]
    fn custom_bootstrap_script_runs_through_shell() {
        let c = ConverterConfig::builder()
            .bootstrap_script("apk add libreoffice")
            .build()
            .unwrap();
        let b = c.bootstrap();
        assert_eq!(b.args, vec!["-c".to_string(), "apk add libreoffice".to_string()]);
    }
}
